use super::{ExpressionNode, Lambda, Reference};
use crate::core::tensor::TensorType;
use std::collections::HashMap;

pub trait TypeContext {
    fn type_of_reference(&self, reference: &Reference) -> Option<TensorType>;
}

/// Types keyed by the reference text, e.g. `input` or `query(x)`.
#[derive(Debug, Clone, Default)]
pub struct MapTypeContext {
    types: HashMap<String, TensorType>,
}

impl MapTypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, ty: TensorType) -> Self {
        self.types.insert(reference.into(), ty);
        self
    }

    pub fn set(&mut self, reference: impl Into<String>, ty: TensorType) {
        self.types.insert(reference.into(), ty);
    }
}

impl TypeContext for MapTypeContext {
    fn type_of_reference(&self, reference: &Reference) -> Option<TensorType> {
        self.types.get(&reference.to_string()).cloned()
    }
}

/// Lambda arguments and generated dimension names are scalars.
struct ScalarNames<'a> {
    names: &'a [String],
    parent: &'a dyn TypeContext,
}

impl TypeContext for ScalarNames<'_> {
    fn type_of_reference(&self, reference: &Reference) -> Option<TensorType> {
        if reference.is_simple() && self.names.contains(&reference.name) {
            return Some(TensorType::scalar());
        }
        self.parent.type_of_reference(reference)
    }
}

impl ExpressionNode {
    pub fn type_of(&self, context: &dyn TypeContext) -> Option<TensorType> {
        match self {
            ExpressionNode::Constant(_) => Some(TensorType::scalar()),
            ExpressionNode::Reference(reference) => context.type_of_reference(reference),
            ExpressionNode::Arithmetic { left, right, .. } => {
                left.type_of(context)?.join(&right.type_of(context)?)
            }
            ExpressionNode::Negate(argument) => argument.type_of(context),
            ExpressionNode::Function { arguments, .. } => {
                let mut types = arguments.iter().map(|a| a.type_of(context));
                let first = types.next()??;
                types.try_fold(first, |ty, next| ty.join(&next?))
            }
            ExpressionNode::Reduce {
                argument,
                dimensions,
                ..
            } => argument.type_of(context)?.reduce(dimensions),
            ExpressionNode::Join { left, right, lambda } => {
                scalar_lambda(lambda, context)?;
                left.type_of(context)?.join(&right.type_of(context)?)
            }
            ExpressionNode::Map { argument, lambda } => {
                scalar_lambda(lambda, context)?;
                argument.type_of(context)
            }
            ExpressionNode::Rename { argument, from, to } => argument.type_of(context)?.rename(from, to),
            ExpressionNode::Generate { ty, body } => {
                if ty.dimensions().iter().any(|d| d.size().is_none()) {
                    return None;
                }
                let names: Vec<String> = ty.dimension_names().iter().map(|n| n.to_string()).collect();
                let scope = ScalarNames {
                    names: &names,
                    parent: context,
                };
                body.type_of(&scope)?.is_scalar().then(|| ty.clone())
            }
        }
    }
}

fn scalar_lambda(lambda: &Lambda, context: &dyn TypeContext) -> Option<()> {
    let scope = ScalarNames {
        names: &lambda.arguments,
        parent: context,
    };
    lambda.body.type_of(&scope)?.is_scalar().then_some(())
}
