use super::{ArithmeticOperator, ExpressionNode, Lambda, Reference, ScalarFunction};
use crate::core::tensor::{Aggregator, TensorType};
use crate::error::{Error, Result};

pub fn parse(text: &str) -> Result<ExpressionNode> {
    let mut parser = Parser {
        text,
        chars: text.chars().collect(),
        position: 0,
    };
    let node = parser.expression()?;
    parser.skip_whitespace();
    if parser.position < parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(node)
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    position: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> Error {
        Error::parse(self.text, format!("{} at position {}", message, self.position))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek_after_whitespace(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.peek()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.position += 1;
        }
    }

    fn consume(&mut self, expected: char) -> bool {
        if self.peek_after_whitespace() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.consume(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    /// Precedence climbing over the binary operators; all are left associative.
    fn expression(&mut self) -> Result<ExpressionNode> {
        self.binary(1)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<ExpressionNode> {
        let mut left = self.unary()?;
        loop {
            let operator = match self.peek_after_whitespace().and_then(ArithmeticOperator::from_symbol) {
                Some(operator) if operator.precedence() >= min_precedence => operator,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.binary(operator.precedence() + 1)?;
            left = ExpressionNode::arithmetic(operator, left, right);
        }
    }

    fn unary(&mut self) -> Result<ExpressionNode> {
        if self.peek_after_whitespace() != Some('-') {
            return self.primary();
        }
        self.position += 1;
        if self.peek().map_or(false, |c| c.is_ascii_digit() || c == '.') {
            return Ok(ExpressionNode::Constant(-self.number()?));
        }
        Ok(ExpressionNode::Negate(Box::new(self.unary()?)))
    }

    fn primary(&mut self) -> Result<ExpressionNode> {
        match self.peek_after_whitespace() {
            None => Err(self.error("unexpected end of expression")),
            Some('(') => {
                self.position += 1;
                let node = self.expression()?;
                self.expect(')')?;
                Ok(node)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => Ok(ExpressionNode::Constant(self.number()?)),
            Some(c) if is_identifier_start(c) => {
                let name = self.identifier()?;
                self.named(name)
            }
            Some(c) => Err(self.error(&format!("unexpected '{}'", c))),
        }
    }

    fn named(&mut self, name: String) -> Result<ExpressionNode> {
        let has_arguments = self.peek_after_whitespace() == Some('(');
        if has_arguments {
            match name.as_str() {
                "reduce" => return self.reduce(),
                "join" => return self.join(),
                "map" => return self.map(),
                "rename" => return self.rename(),
                "tensor" => return self.generate(),
                _ => {}
            }
            if let Some(function) = ScalarFunction::from_name(&name) {
                self.position += 1;
                let arguments = self.arguments()?;
                if arguments.len() != function.arity() {
                    return Err(self.error(&format!(
                        "{} takes {} argument(s), got {}",
                        name,
                        function.arity(),
                        arguments.len()
                    )));
                }
                return Ok(ExpressionNode::Function { function, arguments });
            }
        }

        let mut reference = Reference::simple(name);
        if has_arguments {
            self.position += 1;
            reference.arguments = self.arguments()?;
        }
        if self.peek() == Some('.') {
            self.position += 1;
            reference.output = Some(self.identifier()?);
        }
        Ok(ExpressionNode::Reference(reference))
    }

    /// Comma separated expressions up to and including the closing parenthesis.
    fn arguments(&mut self) -> Result<Vec<ExpressionNode>> {
        let mut arguments = Vec::new();
        if self.consume(')') {
            return Ok(arguments);
        }
        loop {
            arguments.push(self.expression()?);
            if self.consume(')') {
                return Ok(arguments);
            }
            self.expect(',')?;
        }
    }

    fn reduce(&mut self) -> Result<ExpressionNode> {
        self.expect('(')?;
        let argument = self.expression()?;
        self.expect(',')?;
        let aggregator: Aggregator = self.identifier()?.parse()?;
        let mut dimensions = Vec::new();
        while self.consume(',') {
            dimensions.push(self.identifier()?);
        }
        self.expect(')')?;
        Ok(ExpressionNode::reduce(argument, aggregator, dimensions))
    }

    fn join(&mut self) -> Result<ExpressionNode> {
        self.expect('(')?;
        let left = self.expression()?;
        self.expect(',')?;
        let right = self.expression()?;
        self.expect(',')?;
        let lambda = self.lambda(2)?;
        self.expect(')')?;
        Ok(ExpressionNode::Join {
            left: Box::new(left),
            right: Box::new(right),
            lambda,
        })
    }

    fn map(&mut self) -> Result<ExpressionNode> {
        self.expect('(')?;
        let argument = self.expression()?;
        self.expect(',')?;
        let lambda = self.lambda(1)?;
        self.expect(')')?;
        Ok(ExpressionNode::Map {
            argument: Box::new(argument),
            lambda,
        })
    }

    fn lambda(&mut self, arity: usize) -> Result<Lambda> {
        if self.identifier()? != "f" {
            return Err(self.error("expected a lambda 'f(...)(...)'"));
        }
        self.expect('(')?;
        let mut arguments = vec![self.identifier()?];
        while self.consume(',') {
            arguments.push(self.identifier()?);
        }
        self.expect(')')?;
        if arguments.len() != arity {
            return Err(self.error(&format!("expected a lambda of {} argument(s)", arity)));
        }
        self.expect('(')?;
        let body = self.expression()?;
        self.expect(')')?;
        Ok(Lambda {
            arguments,
            body: Box::new(body),
        })
    }

    fn rename(&mut self) -> Result<ExpressionNode> {
        self.expect('(')?;
        let argument = self.expression()?;
        self.expect(',')?;
        let from = self.dimension_list()?;
        self.expect(',')?;
        let to = self.dimension_list()?;
        self.expect(')')?;
        if from.len() != to.len() {
            return Err(self.error("rename needs as many new names as old ones"));
        }
        Ok(ExpressionNode::Rename {
            argument: Box::new(argument),
            from,
            to,
        })
    }

    fn dimension_list(&mut self) -> Result<Vec<String>> {
        if !self.consume('(') {
            return Ok(vec![self.identifier()?]);
        }
        let mut names = vec![self.identifier()?];
        while self.consume(',') {
            names.push(self.identifier()?);
        }
        self.expect(')')?;
        Ok(names)
    }

    fn generate(&mut self) -> Result<ExpressionNode> {
        self.expect('(')?;
        let start = self.position;
        while self.peek().map_or(false, |c| c != ')') {
            self.position += 1;
        }
        let dimensions: String = self.chars[start..self.position].iter().collect();
        self.expect(')')?;
        let ty = TensorType::from_spec(&format!("tensor({})", dimensions))?;
        self.expect('(')?;
        let body = self.expression()?;
        self.expect(')')?;
        Ok(ExpressionNode::Generate {
            ty,
            body: Box::new(body),
        })
    }

    fn identifier(&mut self) -> Result<String> {
        self.skip_whitespace();
        let start = self.position;
        if self.peek().map_or(false, is_identifier_start) {
            while self.peek().map_or(false, |c| c.is_alphanumeric() || c == '_') {
                self.position += 1;
            }
        }
        if start == self.position {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.position].iter().collect())
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.position;
        while self.peek().map_or(false, |c| c.is_ascii_digit() || c == '.') {
            self.position += 1;
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.position;
            self.position += 1;
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.position += 1;
            }
            if self.peek().map_or(false, |c| c.is_ascii_digit()) {
                while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.position += 1;
                }
            } else {
                self.position = mark;
            }
        }
        let text: String = self.chars[start..self.position].iter().collect();
        text.parse()
            .map_err(|_| self.error(&format!("'{}' is not a number", text)))
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let node = parse("1 + 2 * 3 ^ 2").unwrap();
        let expected = ExpressionNode::arithmetic(
            ArithmeticOperator::Add,
            ExpressionNode::Constant(1.0),
            ExpressionNode::arithmetic(
                ArithmeticOperator::Multiply,
                ExpressionNode::Constant(2.0),
                ExpressionNode::arithmetic(
                    ArithmeticOperator::Power,
                    ExpressionNode::Constant(3.0),
                    ExpressionNode::Constant(2.0),
                ),
            ),
        );
        assert_eq!(node, expected);
    }

    #[test]
    fn test_references() {
        let node = parse("query(x)").unwrap();
        assert_eq!(node, ExpressionNode::Reference(Reference::feature("query", "x")));

        let node = parse("model(a, 1).out").unwrap();
        let reference = node.as_reference().unwrap();
        assert_eq!(reference.name, "model");
        assert_eq!(reference.arguments.len(), 2);
        assert_eq!(reference.output.as_deref(), Some("out"));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse("1e-3").unwrap(), ExpressionNode::Constant(0.001));
        assert_eq!(parse("2.5E2").unwrap(), ExpressionNode::Constant(250.0));
        assert_eq!(parse(".5").unwrap(), ExpressionNode::Constant(0.5));
    }

    #[test]
    fn test_tensor_functions() {
        match parse("reduce(a, max, x, y)").unwrap() {
            ExpressionNode::Reduce {
                aggregator,
                dimensions,
                ..
            } => {
                assert_eq!(aggregator, Aggregator::Max);
                assert_eq!(dimensions, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("unexpected {}", other),
        }
        match parse("tensor(b[2], a[3])(a + b)").unwrap() {
            ExpressionNode::Generate { ty, .. } => assert_eq!(ty.to_string(), "tensor(a[3],b[2])"),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_errors() {
        for text in [
            "",
            "1 +",
            "(a",
            "reduce(a, median, x)",
            "join(a, b, f(x)(x))",
            "exp(a, b)",
            "rename(a, (x,y), z)",
            "a b",
            "tensor(x{)(1)",
        ] {
            assert!(matches!(parse(text), Err(Error::Parse { .. })), "{}", text);
        }
    }
}
