use super::{ExpressionNode, Lambda, Reference};
use crate::core::tensor::{Tensor, TensorOps};
use crate::error::{Error, Result};

/// What a reference stands for during evaluation.
pub enum Binding<'a> {
    Value(&'a Tensor),
    /// A function body, evaluated in the same context.
    Expression(&'a ExpressionNode),
}

pub trait EvaluationContext {
    fn resolve(&self, reference: &Reference) -> Result<Binding<'_>>;
}

/// Scalar names bound by enclosing lambdas and generate bodies.
type Scope<'s> = [(&'s str, f64)];

impl ExpressionNode {
    pub fn evaluate(&self, context: &dyn EvaluationContext) -> Result<Tensor> {
        evaluate(self, context, &[])
    }
}

fn evaluate(node: &ExpressionNode, context: &dyn EvaluationContext, scope: &Scope<'_>) -> Result<Tensor> {
    match node {
        ExpressionNode::Constant(value) => Ok(Tensor::scalar(*value)),
        ExpressionNode::Reference(reference) => {
            if reference.is_simple() {
                if let Some((_, value)) = scope.iter().rev().find(|(name, _)| *name == reference.name) {
                    return Ok(Tensor::scalar(*value));
                }
            }
            match context.resolve(reference)? {
                Binding::Value(tensor) => Ok(tensor.clone()),
                Binding::Expression(body) => evaluate(body, context, &[]),
            }
        }
        ExpressionNode::Arithmetic {
            operator,
            left,
            right,
        } => {
            let left = evaluate(left, context, scope)?;
            let right = evaluate(right, context, scope)?;
            left.join(&right, |a, b| Ok(operator.apply(a, b)))
        }
        ExpressionNode::Negate(argument) => evaluate(argument, context, scope)?.map(|x| Ok(-x)),
        ExpressionNode::Function {
            function,
            arguments,
        } => match arguments.as_slice() {
            [x] => evaluate(x, context, scope)?.map(|v| Ok(function.apply1(v))),
            [x, y] => {
                let x = evaluate(x, context, scope)?;
                let y = evaluate(y, context, scope)?;
                x.join(&y, |a, b| Ok(function.apply2(a, b)))
            }
            _ => Err(Error::evaluation(format!(
                "{} called with {} arguments",
                function.name(),
                arguments.len()
            ))),
        },
        ExpressionNode::Reduce {
            argument,
            aggregator,
            dimensions,
        } => evaluate(argument, context, scope)?.reduce(*aggregator, dimensions),
        ExpressionNode::Join { left, right, lambda } => {
            let left = evaluate(left, context, scope)?;
            let right = evaluate(right, context, scope)?;
            match lambda.as_binary_operator() {
                Some(operator) => left.join(&right, |a, b| Ok(operator.apply(a, b))),
                None => left.join(&right, |a, b| apply(lambda, &[a, b], context, scope)),
            }
        }
        ExpressionNode::Map { argument, lambda } => {
            evaluate(argument, context, scope)?.map(|v| apply(lambda, &[v], context, scope))
        }
        ExpressionNode::Rename { argument, from, to } => evaluate(argument, context, scope)?.rename(from, to),
        ExpressionNode::Generate { ty, body } => {
            let names = ty.dimension_names();
            Tensor::generate(ty.clone(), |indices| {
                let mut inner: Vec<(&str, f64)> = scope.to_vec();
                inner.extend(names.iter().zip(indices).map(|(name, i)| (*name, *i as f64)));
                evaluate(body, context, &inner)?.as_double()
            })
        }
    }
}

fn apply(lambda: &Lambda, values: &[f64], context: &dyn EvaluationContext, scope: &Scope<'_>) -> Result<f64> {
    if lambda.arguments.len() != values.len() {
        return Err(Error::evaluation(format!(
            "Lambda {} applied to {} values",
            lambda,
            values.len()
        )));
    }
    let mut inner: Vec<(&str, f64)> = scope.to_vec();
    inner.extend(lambda.arguments.iter().map(String::as_str).zip(values.iter().copied()));
    evaluate(&lambda.body, context, &inner)?.as_double()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Values {
        tensors: HashMap<String, Tensor>,
        functions: HashMap<String, ExpressionNode>,
    }

    impl EvaluationContext for Values {
        fn resolve(&self, reference: &Reference) -> Result<Binding<'_>> {
            let key = reference.to_string();
            if let Some(tensor) = self.tensors.get(&key) {
                return Ok(Binding::Value(tensor));
            }
            self.functions
                .get(&key)
                .map(Binding::Expression)
                .ok_or_else(|| Error::evaluation(format!("Unknown '{}'", key)))
        }
    }

    fn eval(text: &str, values: &Values) -> Tensor {
        ExpressionNode::parse(text).unwrap().evaluate(values).unwrap()
    }

    fn tensor(text: &str) -> Tensor {
        text.parse().unwrap()
    }

    #[test]
    fn test_scalar_arithmetic() {
        let values = Values::default();
        assert_eq!(eval("1 + 2 * 3", &values), Tensor::scalar(7.0));
        assert_eq!(eval("-(2 ^ 3) % 5", &values), Tensor::scalar(-3.0));
        assert_eq!(eval("max(relu(-1), sigmoid(0))", &values), Tensor::scalar(0.5));
    }

    #[test]
    fn test_matrix_product() {
        let mut values = Values::default();
        values.tensors.insert("input".into(), tensor("tensor(d1[2]):[1,2]"));
        values
            .tensors
            .insert("constant(W)".into(), tensor("tensor(d1[2],d2[2]):[[1,2],[3,4]]"));
        let result = eval("reduce(input * constant(W), sum, d1)", &values);
        assert_eq!(result, tensor("tensor(d2[2]):[7,10]"));
    }

    #[test]
    fn test_functions_and_lambdas() {
        let mut values = Values::default();
        values.tensors.insert("a".into(), tensor("tensor(x[3]):[1,2,3]"));
        values
            .functions
            .insert("double_a".into(), ExpressionNode::parse("a * 2").unwrap());
        assert_eq!(eval("double_a + 1", &values), tensor("tensor(x[3]):[3,5,7]"));
        assert_eq!(eval("map(a, f(v)(v * v))", &values), tensor("tensor(x[3]):[1,4,9]"));
        assert_eq!(
            eval("join(a, double_a, f(p,q)(max(p, q) - 1))", &values),
            tensor("tensor(x[3]):[1,3,5]")
        );
        assert_eq!(
            eval("tensor(i[2],j[2])(i * 2 + j)", &values),
            tensor("tensor(i[2],j[2]):[[0,1],[2,3]]")
        );
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let values = Values::default();
        let node = ExpressionNode::parse("missing + 1").unwrap();
        assert!(matches!(node.evaluate(&values), Err(Error::Evaluation(_))));
    }
}
