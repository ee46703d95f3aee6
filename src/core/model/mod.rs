pub mod context;
pub mod evaluator;
pub mod registry;

pub use context::ContextTemplate;
pub use evaluator::FunctionEvaluator;
pub use registry::ModelRegistry;

use crate::core::expression::ExpressionNode;
use crate::core::profile::RankProfile;
use crate::core::tensor::{Tensor, TensorType};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionFunction {
    pub name: String,
    pub arguments: Vec<String>,
    /// Declared types of arguments; undeclared arguments accept any value.
    pub argument_types: HashMap<String, TensorType>,
    pub body: ExpressionNode,
}

impl ExpressionFunction {
    pub fn new(name: impl Into<String>, body: ExpressionNode) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            argument_types: HashMap::new(),
            body,
        }
    }

    pub fn parse(name: impl Into<String>, body: &str) -> Result<Self> {
        Ok(Self::new(name, ExpressionNode::parse(body)?))
    }

    pub fn with_argument(mut self, name: impl Into<String>, ty: Option<TensorType>) -> Self {
        let name = name.into();
        if let Some(ty) = ty {
            self.argument_types.insert(name.clone(), ty);
        }
        self.arguments.push(name);
        self
    }
}

/// A named set of free functions. Evaluation contexts are prepared for every
/// free function when the model is built; afterwards the model is read-only.
#[derive(Debug)]
pub struct Model {
    name: String,
    functions: Vec<Arc<ExpressionFunction>>,
    referenced_functions: HashMap<String, Arc<ExpressionNode>>,
    contexts: HashMap<String, ContextTemplate>,
}

#[derive(Debug, Default)]
pub struct ModelBuilder {
    name: String,
    functions: Vec<ExpressionFunction>,
    referenced: Vec<ExpressionFunction>,
    constants: HashMap<String, Arc<Tensor>>,
    input_types: HashMap<String, TensorType>,
}

impl ModelBuilder {
    /// A function callers can evaluate.
    pub fn function(mut self, function: ExpressionFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// A function only reachable through references from other functions.
    pub fn referenced_function(mut self, function: ExpressionFunction) -> Self {
        self.referenced.push(function);
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.constants.insert(name.into(), Arc::new(value));
        self
    }

    /// Declares the type of an input such as `query(x)`; bound values are
    /// checked against it.
    pub fn input_type(mut self, reference: impl Into<String>, ty: TensorType) -> Self {
        self.input_types.insert(reference.into(), ty);
        self
    }

    pub fn build(self) -> Result<Model> {
        let mut by_name: HashMap<String, Arc<ExpressionFunction>> = HashMap::new();
        let mut free = Vec::with_capacity(self.functions.len());
        for (function, is_free) in self
            .functions
            .into_iter()
            .map(|f| (f, true))
            .chain(self.referenced.into_iter().map(|f| (f, false)))
        {
            let function = Arc::new(function);
            if by_name.insert(function.name.clone(), Arc::clone(&function)).is_some() {
                return Err(Error::config(format!(
                    "Function '{}' is defined more than once in model '{}'",
                    function.name, self.name
                )));
            }
            if is_free {
                free.push(function);
            }
        }

        let mut instances = HashMap::new();
        let mut contexts = HashMap::new();
        for function in &free {
            let mut scope = context::Scope {
                functions: &by_name,
                constants: &self.constants,
                input_types: &self.input_types,
                instances: &mut instances,
            };
            let template = context::build(Arc::clone(function), &mut scope).map_err(|e| {
                Error::config(format!(
                    "Could not prepare an evaluation context for {}: {}",
                    function.name, e
                ))
            })?;
            debug!(model = %self.name, function = %function.name, slots = template.slot_names().len(), "prepared evaluation context");
            contexts.insert(function.name.clone(), template);
        }

        Ok(Model {
            name: self.name,
            functions: free,
            referenced_functions: instances,
            contexts,
        })
    }
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            ..ModelBuilder::default()
        }
    }

    pub fn new(name: impl Into<String>, functions: Vec<ExpressionFunction>) -> Result<Self> {
        functions
            .into_iter()
            .fold(Self::builder(name), ModelBuilder::function)
            .build()
    }

    /// A model of a converted profile: its own functions are free, the
    /// functions generated by conversion are only referenced, and file
    /// constants take their values from `ranking_constant_values`.
    pub fn from_profile(profile: &RankProfile, ranking_constant_values: &HashMap<String, Tensor>) -> Result<Self> {
        let mut builder = Self::builder(profile.name());
        for (name, value) in profile.constants() {
            builder = builder.constant(name.clone(), value.clone());
        }
        for constant in profile.ranking_constants() {
            let value = ranking_constant_values.get(&constant.name).ok_or_else(|| {
                Error::config(format!(
                    "Ranking constant '{}' has no value (expected from '{}')",
                    constant.name, constant.path
                ))
            })?;
            if value.ty() != &constant.ty {
                return Err(Error::config(format!(
                    "Ranking constant '{}' is declared as {} but its value has type {}",
                    constant.name,
                    constant.ty,
                    value.ty()
                )));
            }
            builder = builder.constant(constant.name.clone(), value.clone());
        }
        for (reference, ty) in profile.inputs() {
            builder = builder.input_type(reference.clone(), ty.clone());
        }
        for function in profile.functions() {
            let converted = ExpressionFunction {
                name: function.name.clone(),
                arguments: function.arguments.clone(),
                argument_types: HashMap::new(),
                body: function.expression.clone(),
            };
            builder = match function.generated_by {
                Some(_) => builder.referenced_function(converted),
                None => builder.function(converted),
            };
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions(&self) -> impl Iterator<Item = &ExpressionFunction> {
        self.functions.iter().map(|f| f.as_ref())
    }

    pub fn function(&self, name: &str) -> Option<&ExpressionFunction> {
        self.functions().find(|f| f.name == name)
    }

    pub fn require_function(&self, name: &str) -> Result<&ExpressionFunction> {
        self.function(name).ok_or_else(|| self.no_such_function(name))
    }

    /// Bound instances of every function reached through a reference.
    pub fn referenced_functions(&self) -> &HashMap<String, Arc<ExpressionNode>> {
        &self.referenced_functions
    }

    pub fn context_template(&self, name: &str) -> Result<&ContextTemplate> {
        self.contexts.get(name).ok_or_else(|| self.no_such_function(name))
    }

    /// A single-use evaluator of the named function.
    pub fn evaluator_of(&self, name: &str) -> Result<FunctionEvaluator> {
        Ok(FunctionEvaluator::new(self.context_template(name)?.clone()))
    }

    fn no_such_function(&self, name: &str) -> Error {
        let available: Vec<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        Error::NotFound(format!(
            "No function named '{}' in model '{}'. Available functions: {}",
            name,
            self.name,
            available.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::RankingConstant;

    fn t(spec: &str) -> TensorType {
        TensorType::from_spec(spec).unwrap()
    }

    #[test]
    fn test_missing_function_lists_available() {
        let model = Model::new(
            "m",
            vec![
                ExpressionFunction::parse("first", "1").unwrap(),
                ExpressionFunction::parse("second", "2").unwrap(),
            ],
        )
        .unwrap();
        let error = model.evaluator_of("third").unwrap_err();
        assert_eq!(
            error.to_string(),
            "No function named 'third' in model 'm'. Available functions: first, second"
        );
        assert!(model.require_function("second").is_ok());
    }

    #[test]
    fn test_referenced_functions_are_bound() {
        let model = Model::builder("m")
            .function(ExpressionFunction::parse("score", "scaled(query(a)) + scaled(2)").unwrap())
            .referenced_function(
                ExpressionFunction::parse("scaled", "v * 10")
                    .unwrap()
                    .with_argument("v", None),
            )
            .build()
            .unwrap();
        let mut instances: Vec<String> = model.referenced_functions().keys().cloned().collect();
        instances.sort();
        assert_eq!(instances, vec!["scaled(2.0)", "scaled(query(a))"]);
        assert_eq!(model.context_template("score").unwrap().slot_names(), &["query(a)".to_string()]);
        assert!(model.function("scaled").is_none());
    }

    #[test]
    fn test_construction_failures() {
        let cyclic = Model::builder("m")
            .function(ExpressionFunction::parse("a", "b + 1").unwrap())
            .referenced_function(ExpressionFunction::parse("b", "a * 2").unwrap())
            .build();
        let message = cyclic.unwrap_err().to_string();
        assert!(message.starts_with("Could not prepare an evaluation context for a"), "{}", message);

        let missing_constant = Model::new("m", vec![ExpressionFunction::parse("a", "constant(W)").unwrap()]);
        assert!(matches!(missing_constant, Err(Error::Config(_))));

        let duplicate = Model::new(
            "m",
            vec![
                ExpressionFunction::parse("a", "1").unwrap(),
                ExpressionFunction::parse("a", "2").unwrap(),
            ],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_from_profile() {
        let mut profile = RankProfile::new("p");
        profile.declare_input("query(x)", t("tensor(d1[2])"));
        profile.add_ranking_constant(RankingConstant {
            name: "W".into(),
            ty: t("tensor(d1[2],d2[2])"),
            path: "w.tbf".into(),
        });
        profile
            .add_generated_function("hidden", ExpressionNode::parse("query(x) * constant(W)").unwrap(), "mnist")
            .unwrap();
        profile
            .add_function("output", vec![], ExpressionNode::parse("reduce(hidden, sum, d1)").unwrap())
            .unwrap();

        assert!(Model::from_profile(&profile, &HashMap::new()).is_err());

        let mut values = HashMap::new();
        values.insert("W".to_string(), "tensor(d1[2],d2[2]):[[1,2],[3,4]]".parse().unwrap());
        let model = Model::from_profile(&profile, &values).unwrap();
        assert!(model.function("hidden").is_none());
        let result = model
            .evaluator_of("output")
            .unwrap()
            .bind("query(x)", "tensor(d1[2]):[1,1]".parse::<Tensor>().unwrap())
            .unwrap()
            .evaluate()
            .unwrap();
        assert_eq!(result, "tensor(d2[2]):[4,6]".parse().unwrap());
    }
}
