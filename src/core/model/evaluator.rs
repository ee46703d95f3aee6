use super::context::{ContextTemplate, Resolution};
use crate::core::expression::{Binding, EvaluationContext, Reference};
use crate::core::tensor::{Tensor, TensorType};
use crate::error::{Error, Result};

/// A single-use evaluation of one function. Bind every slot, then evaluate.
///
/// Each evaluator owns its slot values; the template it copies is shared
/// read-only, so any number of evaluators may run in parallel.
#[derive(Debug)]
pub struct FunctionEvaluator {
    template: ContextTemplate,
    values: Vec<Option<Tensor>>,
}

impl FunctionEvaluator {
    pub fn new(template: ContextTemplate) -> Self {
        let values = vec![None; template.slot_names().len()];
        Self { template, values }
    }

    pub fn function_name(&self) -> &str {
        self.template.function_name()
    }

    pub fn slot_names(&self) -> &[String] {
        self.template.slot_names()
    }

    pub fn bind(mut self, name: &str, value: impl Into<Tensor>) -> Result<Self> {
        let value = value.into();
        let index = self.slot_index(name)?;
        if let Some(required) = &self.template.slots.types[index] {
            if !value.ty().is_assignable_to(required) {
                return Err(Error::evaluation(format!(
                    "'{}' in function '{}' requires {} but was given {}",
                    name,
                    self.function_name(),
                    required,
                    value.ty()
                )));
            }
        }
        self.values[index] = Some(value);
        Ok(self)
    }

    /// Binds a value given as a tensor literal, read against the slot's
    /// declared type when it has one.
    pub fn bind_literal(self, name: &str, literal: &str) -> Result<Self> {
        let index = self.slot_index(name)?;
        let declared: Option<&TensorType> = self.template.slots.types[index].as_ref();
        let value = Tensor::from_literal(declared.filter(|ty| is_fully_bound(ty)), literal)?;
        self.bind(name, value)
    }

    pub fn evaluate(self) -> Result<Tensor> {
        if let Some(index) = self.values.iter().position(Option::is_none) {
            return Err(Error::evaluation(format!(
                "Missing value for '{}' in function '{}'",
                self.template.slots.names[index],
                self.function_name()
            )));
        }
        self.template.function.body.evaluate(&self)
    }

    fn slot_index(&self, name: &str) -> Result<usize> {
        self.template.slots.index.get(name).copied().ok_or_else(|| {
            Error::evaluation(format!(
                "Function '{}' has no input '{}'. Inputs: {}",
                self.function_name(),
                name,
                self.slot_names().join(", ")
            ))
        })
    }
}

fn is_fully_bound(ty: &TensorType) -> bool {
    ty.dimensions().iter().all(|d| !d.is_indexed() || d.size().is_some())
}

impl EvaluationContext for FunctionEvaluator {
    fn resolve(&self, reference: &Reference) -> Result<Binding<'_>> {
        let key = reference.to_string();
        match self.template.resolutions.get(&key) {
            Some(Resolution::Slot(index)) => self.values[*index]
                .as_ref()
                .map(Binding::Value)
                .ok_or_else(|| Error::evaluation(format!("Missing value for '{}'", key))),
            Some(Resolution::Constant(value)) => Ok(Binding::Value(value)),
            Some(Resolution::Function(body)) => Ok(Binding::Expression(body)),
            None => Err(Error::evaluation(format!(
                "'{}' is not resolved in function '{}'",
                key,
                self.function_name()
            ))),
        }
    }
}
