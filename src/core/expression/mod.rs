pub mod evaluate;
pub mod parser;
pub mod rewrite;
pub mod types;

pub use evaluate::{Binding, EvaluationContext};
pub use types::{MapTypeContext, TypeContext};

use crate::core::tensor::{format_number, Aggregator, TensorType};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl ArithmeticOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
            ArithmeticOperator::Modulo => "%",
            ArithmeticOperator::Power => "^",
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            ArithmeticOperator::Add | ArithmeticOperator::Subtract => 1,
            ArithmeticOperator::Multiply | ArithmeticOperator::Divide | ArithmeticOperator::Modulo => 2,
            ArithmeticOperator::Power => 3,
        }
    }

    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            ArithmeticOperator::Add => a + b,
            ArithmeticOperator::Subtract => a - b,
            ArithmeticOperator::Multiply => a * b,
            ArithmeticOperator::Divide => a / b,
            ArithmeticOperator::Modulo => a % b,
            ArithmeticOperator::Power => a.powf(b),
        }
    }

    fn from_symbol(c: char) -> Option<Self> {
        Some(match c {
            '+' => ArithmeticOperator::Add,
            '-' => ArithmeticOperator::Subtract,
            '*' => ArithmeticOperator::Multiply,
            '/' => ArithmeticOperator::Divide,
            '%' => ArithmeticOperator::Modulo,
            '^' => ArithmeticOperator::Power,
            _ => return None,
        })
    }
}

/// Cell-wise scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFunction {
    Exp,
    Log,
    Sqrt,
    Tanh,
    Sigmoid,
    Relu,
    Abs,
    Floor,
    Ceil,
    Sin,
    Cos,
    Max,
    Min,
    Pow,
}

impl ScalarFunction {
    const ALL: [ScalarFunction; 14] = [
        ScalarFunction::Exp,
        ScalarFunction::Log,
        ScalarFunction::Sqrt,
        ScalarFunction::Tanh,
        ScalarFunction::Sigmoid,
        ScalarFunction::Relu,
        ScalarFunction::Abs,
        ScalarFunction::Floor,
        ScalarFunction::Ceil,
        ScalarFunction::Sin,
        ScalarFunction::Cos,
        ScalarFunction::Max,
        ScalarFunction::Min,
        ScalarFunction::Pow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScalarFunction::Exp => "exp",
            ScalarFunction::Log => "log",
            ScalarFunction::Sqrt => "sqrt",
            ScalarFunction::Tanh => "tanh",
            ScalarFunction::Sigmoid => "sigmoid",
            ScalarFunction::Relu => "relu",
            ScalarFunction::Abs => "abs",
            ScalarFunction::Floor => "floor",
            ScalarFunction::Ceil => "ceil",
            ScalarFunction::Sin => "sin",
            ScalarFunction::Cos => "cos",
            ScalarFunction::Max => "max",
            ScalarFunction::Min => "min",
            ScalarFunction::Pow => "pow",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn arity(&self) -> usize {
        match self {
            ScalarFunction::Max | ScalarFunction::Min | ScalarFunction::Pow => 2,
            _ => 1,
        }
    }

    pub fn apply1(&self, x: f64) -> f64 {
        match self {
            ScalarFunction::Exp => x.exp(),
            ScalarFunction::Log => x.ln(),
            ScalarFunction::Sqrt => x.sqrt(),
            ScalarFunction::Tanh => x.tanh(),
            ScalarFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ScalarFunction::Relu => x.max(0.0),
            ScalarFunction::Abs => x.abs(),
            ScalarFunction::Floor => x.floor(),
            ScalarFunction::Ceil => x.ceil(),
            ScalarFunction::Sin => x.sin(),
            ScalarFunction::Cos => x.cos(),
            ScalarFunction::Max | ScalarFunction::Min | ScalarFunction::Pow => f64::NAN,
        }
    }

    pub fn apply2(&self, x: f64, y: f64) -> f64 {
        match self {
            ScalarFunction::Max => x.max(y),
            ScalarFunction::Min => x.min(y),
            ScalarFunction::Pow => x.powf(y),
            _ => f64::NAN,
        }
    }
}

/// A reference to a named value: a function, a constant, an input feature or
/// a lambda argument, e.g. `input`, `constant(W)`, `query(x)` or `model(a).out`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub name: String,
    pub arguments: Vec<ExpressionNode>,
    pub output: Option<String>,
}

impl Reference {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            output: None,
        }
    }

    /// `name(argument)`, the form of `constant(W)` and `query(x)`.
    pub fn feature(name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: vec![ExpressionNode::Reference(Reference::simple(argument))],
            output: None,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.arguments.is_empty() && self.output.is_none()
    }

    /// The argument of `constant(name)`, if this is one.
    pub fn constant_name(&self) -> Option<&str> {
        match (self.name.as_str(), self.arguments.as_slice(), &self.output) {
            ("constant", [ExpressionNode::Reference(argument)], None) if argument.is_simple() => {
                Some(&argument.name)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.arguments.is_empty() {
            write!(f, "(")?;
            write_list(f, &self.arguments)?;
            write!(f, ")")?;
        }
        if let Some(output) = &self.output {
            write!(f, ".{}", output)?;
        }
        Ok(())
    }
}

/// `f(x,y)(body)`: a scalar function applied per cell by join, map and generate.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub arguments: Vec<String>,
    pub body: Box<ExpressionNode>,
}

impl Lambda {
    pub fn new(arguments: &[&str], body: ExpressionNode) -> Self {
        Self {
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
            body: Box::new(body),
        }
    }

    /// `f(x,y)(x * y)` and friends reduce to their operator.
    pub fn as_binary_operator(&self) -> Option<ArithmeticOperator> {
        match (self.arguments.as_slice(), self.body.as_ref()) {
            (
                [x, y],
                ExpressionNode::Arithmetic {
                    operator,
                    left,
                    right,
                },
            ) => match (left.as_ref(), right.as_ref()) {
                (ExpressionNode::Reference(l), ExpressionNode::Reference(r))
                    if l.is_simple() && r.is_simple() && &l.name == x && &r.name == y =>
                {
                    Some(*operator)
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f({})({})", self.arguments.join(","), self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    Constant(f64),
    Reference(Reference),
    Arithmetic {
        operator: ArithmeticOperator,
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
    },
    Negate(Box<ExpressionNode>),
    Function {
        function: ScalarFunction,
        arguments: Vec<ExpressionNode>,
    },
    Reduce {
        argument: Box<ExpressionNode>,
        aggregator: Aggregator,
        dimensions: Vec<String>,
    },
    Join {
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
        lambda: Lambda,
    },
    Map {
        argument: Box<ExpressionNode>,
        lambda: Lambda,
    },
    Rename {
        argument: Box<ExpressionNode>,
        from: Vec<String>,
        to: Vec<String>,
    },
    /// `tensor(d0[2],d1[3])(body)`, where the body sees dimension names as indices.
    Generate {
        ty: TensorType,
        body: Box<ExpressionNode>,
    },
}

impl ExpressionNode {
    pub fn parse(text: &str) -> Result<Self> {
        parser::parse(text)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ExpressionNode::Reference(Reference::simple(name))
    }

    pub fn constant_reference(name: impl Into<String>) -> Self {
        ExpressionNode::Reference(Reference::feature("constant", name))
    }

    pub fn arithmetic(operator: ArithmeticOperator, left: ExpressionNode, right: ExpressionNode) -> Self {
        ExpressionNode::Arithmetic {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn reduce(argument: ExpressionNode, aggregator: Aggregator, dimensions: Vec<String>) -> Self {
        ExpressionNode::Reduce {
            argument: Box::new(argument),
            aggregator,
            dimensions,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            ExpressionNode::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            ExpressionNode::Arithmetic { operator, .. } => operator.precedence(),
            _ => u8::MAX,
        }
    }

    /// Whether a leading `-` can be printed directly in front of this node.
    fn is_call_like(&self) -> bool {
        !matches!(
            self,
            ExpressionNode::Constant(_) | ExpressionNode::Arithmetic { .. } | ExpressionNode::Negate(_)
        )
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionNode::Constant(value) => write!(f, "{}", format_number(*value)),
            ExpressionNode::Reference(reference) => write!(f, "{}", reference),
            ExpressionNode::Arithmetic {
                operator,
                left,
                right,
            } => {
                if left.precedence() < operator.precedence() {
                    write!(f, "({})", left)?;
                } else {
                    write!(f, "{}", left)?;
                }
                write!(f, " {} ", operator.symbol())?;
                if right.precedence() <= operator.precedence() {
                    write!(f, "({})", right)
                } else {
                    write!(f, "{}", right)
                }
            }
            ExpressionNode::Negate(argument) if argument.is_call_like() => write!(f, "-{}", argument),
            ExpressionNode::Negate(argument) => write!(f, "-({})", argument),
            ExpressionNode::Function {
                function,
                arguments,
            } => {
                write!(f, "{}(", function.name())?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            ExpressionNode::Reduce {
                argument,
                aggregator,
                dimensions,
            } => {
                write!(f, "reduce({}, {}", argument, aggregator)?;
                for dimension in dimensions {
                    write!(f, ", {}", dimension)?;
                }
                write!(f, ")")
            }
            ExpressionNode::Join { left, right, lambda } => write!(f, "join({}, {}, {})", left, right, lambda),
            ExpressionNode::Map { argument, lambda } => write!(f, "map({}, {})", argument, lambda),
            ExpressionNode::Rename { argument, from, to } if from.len() == 1 && to.len() == 1 => {
                write!(f, "rename({}, {}, {})", argument, from[0], to[0])
            }
            ExpressionNode::Rename { argument, from, to } => {
                write!(f, "rename({}, ({}), ({}))", argument, from.join(","), to.join(","))
            }
            ExpressionNode::Generate { ty, body } => write!(f, "{}({})", ty, body),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, nodes: &[ExpressionNode]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", node)?;
    }
    Ok(())
}

impl FromStr for ExpressionNode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parser::parse(s)
    }
}

impl serde::Serialize for ExpressionNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ExpressionNode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parser::parse(&text).map_err(serde::de::Error::custom)
    }
}
