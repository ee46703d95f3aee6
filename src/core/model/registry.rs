use super::{FunctionEvaluator, Model};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Models by name. Built once and shared read-only between evaluating threads.
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<Model>>,
}

impl ModelRegistry {
    pub fn new<I>(models: I) -> Result<Self>
    where
        I: IntoIterator<Item = Model>,
    {
        let mut registry = Self::default();
        for model in models {
            let name = model.name().to_string();
            if registry.models.insert(name.clone(), Arc::new(model)).is_some() {
                return Err(Error::config(format!("Model '{}' is registered more than once", name)));
            }
        }
        Ok(registry)
    }

    pub fn model(&self, name: &str) -> Result<Arc<Model>> {
        self.models.get(name).map(Arc::clone).ok_or_else(|| {
            Error::NotFound(format!(
                "No model named '{}'. Available models: {}",
                name,
                self.model_names().join(", ")
            ))
        })
    }

    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn evaluator_of(&self, model: &str, function: &str) -> Result<FunctionEvaluator> {
        self.model(model)?.evaluator_of(function)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
