use crate::core::expression::{ExpressionNode, Lambda, Reference};
use crate::core::tensor::{Tensor, TensorType};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

use super::ExpressionFunction;

/// What a reference in a function body resolves to, keyed by reference text.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// An externally bound value, by slot index.
    Slot(usize),
    Constant(Arc<Tensor>),
    /// A referenced function instance with its arguments bound.
    Function(Arc<ExpressionNode>),
}

#[derive(Debug)]
pub(crate) struct SlotLayout {
    pub names: Vec<String>,
    pub types: Vec<Option<TensorType>>,
    pub index: HashMap<String, usize>,
}

/// The resolved layout of one free function, computed once when a model is
/// built and shared read-only by every evaluator of that function.
#[derive(Debug, Clone)]
pub struct ContextTemplate {
    pub(crate) function: Arc<ExpressionFunction>,
    pub(crate) resolutions: Arc<HashMap<String, Resolution>>,
    pub(crate) slots: Arc<SlotLayout>,
}

impl ContextTemplate {
    pub fn function_name(&self) -> &str {
        &self.function.name
    }

    /// Names of the values an evaluator must bind, e.g. `query(x)`.
    pub fn slot_names(&self) -> &[String] {
        &self.slots.names
    }

    pub fn slot_type(&self, name: &str) -> Option<&TensorType> {
        let index = *self.slots.index.get(name)?;
        self.slots.types[index].as_ref()
    }
}

/// Everything a function body can refer to besides bindable slots.
pub(crate) struct Scope<'a> {
    pub functions: &'a HashMap<String, Arc<ExpressionFunction>>,
    pub constants: &'a HashMap<String, Arc<Tensor>>,
    pub input_types: &'a HashMap<String, TensorType>,
    /// Bound function instances shared across all templates of a model.
    pub instances: &'a mut HashMap<String, Arc<ExpressionNode>>,
}

pub(crate) fn build(function: Arc<ExpressionFunction>, scope: &mut Scope<'_>) -> Result<ContextTemplate> {
    let mut builder = Builder {
        scope,
        resolutions: HashMap::new(),
        slots: SlotLayout {
            names: Vec::new(),
            types: Vec::new(),
            index: HashMap::new(),
        },
        stack: vec![function.name.clone()],
    };
    // Arguments of a free function are bound by the caller.
    for argument in &function.arguments {
        builder.add_slot(argument.clone(), function.argument_types.get(argument).cloned());
    }
    builder.walk(&function.body, &[])?;

    Ok(ContextTemplate {
        function,
        resolutions: Arc::new(builder.resolutions),
        slots: Arc::new(builder.slots),
    })
}

struct Builder<'s, 'a> {
    scope: &'s mut Scope<'a>,
    resolutions: HashMap<String, Resolution>,
    slots: SlotLayout,
    /// Function instances being resolved, for cycle detection.
    stack: Vec<String>,
}

impl Builder<'_, '_> {
    fn add_slot(&mut self, name: String, ty: Option<TensorType>) {
        let index = self.slots.names.len();
        self.slots.index.insert(name.clone(), index);
        self.resolutions.insert(name.clone(), Resolution::Slot(index));
        self.slots.names.push(name);
        self.slots.types.push(ty);
    }

    /// Resolves every reference under `node`. `bound` holds the scalar names
    /// introduced by enclosing lambdas or generate bodies.
    fn walk(&mut self, node: &ExpressionNode, bound: &[String]) -> Result<()> {
        match node {
            // Arguments are walked as part of the bound instance when the
            // reference is a function call, and are plain names otherwise.
            ExpressionNode::Reference(reference) => {
                if reference.is_simple() && bound.contains(&reference.name) {
                    return Ok(());
                }
                self.resolve(reference)
            }
            ExpressionNode::Join { left, right, lambda } => {
                self.walk(left, bound)?;
                self.walk(right, bound)?;
                self.walk_lambda(lambda, bound)
            }
            ExpressionNode::Map { argument, lambda } => {
                self.walk(argument, bound)?;
                self.walk_lambda(lambda, bound)
            }
            ExpressionNode::Generate { ty, body } => {
                let mut inner = bound.to_vec();
                inner.extend(ty.dimension_names().iter().map(|n| n.to_string()));
                self.walk(body, &inner)
            }
            other => {
                for child in other.children() {
                    self.walk(child, bound)?;
                }
                Ok(())
            }
        }
    }

    fn walk_lambda(&mut self, lambda: &Lambda, bound: &[String]) -> Result<()> {
        let mut inner = bound.to_vec();
        inner.extend(lambda.arguments.iter().cloned());
        self.walk(&lambda.body, &inner)
    }

    fn resolve(&mut self, reference: &Reference) -> Result<()> {
        let key = reference.to_string();
        if self.resolutions.contains_key(&key) {
            return Ok(());
        }

        if let Some(name) = reference.constant_name() {
            let value = self
                .scope
                .constants
                .get(name)
                .ok_or_else(|| Error::config(format!("Constant '{}' is not defined", name)))?;
            self.resolutions.insert(key, Resolution::Constant(Arc::clone(value)));
            return Ok(());
        }

        if reference.output.is_none() {
            if let Some(function) = self.scope.functions.get(&reference.name).cloned() {
                return self.resolve_function(key, &function, &reference.arguments);
            }
            if reference.is_simple() {
                if let Some(value) = self.scope.constants.get(&reference.name) {
                    self.resolutions.insert(key, Resolution::Constant(Arc::clone(value)));
                    return Ok(());
                }
            }
        }

        let ty = self.scope.input_types.get(&key).cloned();
        self.add_slot(key, ty);
        Ok(())
    }

    fn resolve_function(
        &mut self,
        key: String,
        function: &ExpressionFunction,
        arguments: &[ExpressionNode],
    ) -> Result<()> {
        if self.stack.contains(&key) {
            return Err(Error::config(format!(
                "Invocation loop: {} -> {}",
                self.stack.join(" -> "),
                key
            )));
        }
        if function.arguments.len() != arguments.len() {
            return Err(Error::config(format!(
                "Function '{}' takes {} argument(s) but '{}' passes {}",
                function.name,
                function.arguments.len(),
                key,
                arguments.len()
            )));
        }

        let instance = match self.scope.instances.get(&key) {
            Some(instance) => Arc::clone(instance),
            None => {
                let bindings = function
                    .arguments
                    .iter()
                    .cloned()
                    .zip(arguments.iter().cloned())
                    .collect();
                let instance = Arc::new(function.body.substitute(&bindings));
                self.scope.instances.insert(key.clone(), Arc::clone(&instance));
                instance
            }
        };

        self.stack.push(key.clone());
        let walked = self.walk(&instance, &[]);
        self.stack.pop();
        walked?;
        self.resolutions.insert(key, Resolution::Function(instance));
        Ok(())
    }
}
