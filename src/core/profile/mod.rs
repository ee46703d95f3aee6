use crate::core::expression::{ExpressionNode, Reference, TypeContext};
use crate::core::tensor::{Tensor, TensorType};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A large constant distributed as a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingConstant {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TensorType,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankProfileFunction {
    pub name: String,
    pub arguments: Vec<String>,
    pub expression: ExpressionNode,
    /// The model path whose conversion generated this function, if any.
    pub generated_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankProfile {
    name: String,
    constants: BTreeMap<String, Tensor>,
    ranking_constants: BTreeMap<String, RankingConstant>,
    functions: BTreeMap<String, RankProfileFunction>,
    inputs: BTreeMap<String, TensorType>,
}

#[derive(Debug, Deserialize)]
struct ProfileConfig {
    name: String,
    #[serde(default)]
    inputs: BTreeMap<String, TensorType>,
    #[serde(default)]
    functions: Vec<FunctionConfig>,
    #[serde(default)]
    constants: BTreeMap<String, Tensor>,
}

#[derive(Debug, Deserialize)]
struct FunctionConfig {
    name: String,
    #[serde(default)]
    arguments: Vec<String>,
    expression: String,
}

impl RankProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Reads `{"name": .., "inputs": {"query(x)": "tensor(..)"}, "functions": [..], "constants": {..}}`.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ProfileConfig = serde_json::from_str(text)?;
        let mut profile = RankProfile::new(config.name);
        for (reference, ty) in config.inputs {
            profile.declare_input(reference, ty);
        }
        for (name, value) in config.constants {
            profile.add_constant(name, value);
        }
        for function in config.functions {
            let expression = ExpressionNode::parse(&function.expression)?;
            profile.add_function(function.name, function.arguments, expression)?;
        }
        Ok(profile)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declare_input(&mut self, reference: impl Into<String>, ty: TensorType) {
        self.inputs.insert(reference.into(), ty);
    }

    pub fn inputs(&self) -> &BTreeMap<String, TensorType> {
        &self.inputs
    }

    pub fn add_constant(&mut self, name: impl Into<String>, value: Tensor) {
        let name = name.into();
        debug!(profile = %self.name, constant = %name, "adding constant");
        self.constants.insert(name, value);
    }

    pub fn constant(&self, name: &str) -> Option<&Tensor> {
        self.constants.get(name)
    }

    pub fn constants(&self) -> &BTreeMap<String, Tensor> {
        &self.constants
    }

    /// Registers a file constant unless one with the same name exists.
    /// Returns whether it was added.
    pub fn add_ranking_constant(&mut self, constant: RankingConstant) -> bool {
        if self.ranking_constants.contains_key(&constant.name) {
            return false;
        }
        debug!(profile = %self.name, constant = %constant.name, path = %constant.path, "adding ranking constant");
        self.ranking_constants.insert(constant.name.clone(), constant);
        true
    }

    pub fn ranking_constant(&self, name: &str) -> Option<&RankingConstant> {
        self.ranking_constants.get(name)
    }

    pub fn ranking_constants(&self) -> impl Iterator<Item = &RankingConstant> {
        self.ranking_constants.values()
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        arguments: Vec<String>,
        expression: ExpressionNode,
    ) -> Result<()> {
        self.insert_function(RankProfileFunction {
            name: name.into(),
            arguments,
            expression,
            generated_by: None,
        })
    }

    pub fn add_generated_function(
        &mut self,
        name: impl Into<String>,
        expression: ExpressionNode,
        model_path: impl Into<String>,
    ) -> Result<()> {
        self.insert_function(RankProfileFunction {
            name: name.into(),
            arguments: Vec::new(),
            expression,
            generated_by: Some(model_path.into()),
        })
    }

    fn insert_function(&mut self, function: RankProfileFunction) -> Result<()> {
        if self.functions.contains_key(&function.name) {
            return Err(Error::config(format!(
                "Function '{}' is already defined in rank profile '{}'",
                function.name, self.name
            )));
        }
        debug!(profile = %self.name, function = %function.name, "adding function");
        self.functions.insert(function.name.clone(), function);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&RankProfileFunction> {
        self.functions.get(name)
    }

    /// Replaces the body of an existing function, keeping its arguments and origin.
    pub fn replace_function_expression(&mut self, name: &str, expression: ExpressionNode) -> Result<()> {
        match self.functions.get_mut(name) {
            Some(function) => {
                function.expression = expression;
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "No function named '{}' in rank profile '{}'",
                name, self.name
            ))),
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &RankProfileFunction> {
        self.functions.values()
    }

    pub fn inferred_type(&self, expression: &ExpressionNode) -> Option<TensorType> {
        let context = ProfileTypes {
            profile: self,
            resolving: RefCell::new(Vec::new()),
        };
        expression.type_of(&context)
    }

    /// The type a reference resolves to in this profile, e.g. of `query(x)`.
    pub fn reference_type(&self, reference: &Reference) -> Option<TensorType> {
        ProfileTypes {
            profile: self,
            resolving: RefCell::new(Vec::new()),
        }
        .type_of_reference(reference)
    }
}

/// Types of references in a profile. Functions being resolved are tracked so
/// that recursive definitions come out as unknown.
struct ProfileTypes<'a> {
    profile: &'a RankProfile,
    resolving: RefCell<Vec<String>>,
}

impl TypeContext for ProfileTypes<'_> {
    fn type_of_reference(&self, reference: &Reference) -> Option<TensorType> {
        if let Some(name) = reference.constant_name() {
            return match self.profile.ranking_constants.get(name) {
                Some(constant) => Some(constant.ty.clone()),
                None => self.profile.constants.get(name).map(|c| c.ty().clone()),
            };
        }
        if let Some(ty) = self.profile.inputs.get(&reference.to_string()) {
            return Some(ty.clone());
        }
        if reference.name == "query" && reference.arguments.len() == 1 && reference.output.is_none() {
            return Some(TensorType::scalar());
        }
        if reference.output.is_some() {
            return None;
        }
        if let Some(function) = self.profile.functions.get(&reference.name) {
            return self.function_type(function, &reference.arguments);
        }
        if reference.is_simple() {
            return self.profile.constants.get(&reference.name).map(|c| c.ty().clone());
        }
        None
    }
}

impl ProfileTypes<'_> {
    fn function_type(&self, function: &RankProfileFunction, arguments: &[ExpressionNode]) -> Option<TensorType> {
        if function.arguments.len() != arguments.len() || self.resolving.borrow().contains(&function.name) {
            return None;
        }
        let argument_types: HashMap<&str, TensorType> = function
            .arguments
            .iter()
            .zip(arguments)
            .map(|(name, argument)| Some((name.as_str(), argument.type_of(self)?)))
            .collect::<Option<_>>()?;

        self.resolving.borrow_mut().push(function.name.clone());
        let scope = ArgumentTypes {
            types: argument_types,
            parent: self,
        };
        let ty = function.expression.type_of(&scope);
        self.resolving.borrow_mut().pop();
        ty
    }
}

struct ArgumentTypes<'a> {
    types: HashMap<&'a str, TensorType>,
    parent: &'a dyn TypeContext,
}

impl TypeContext for ArgumentTypes<'_> {
    fn type_of_reference(&self, reference: &Reference) -> Option<TensorType> {
        if reference.is_simple() {
            if let Some(ty) = self.types.get(reference.name.as_str()) {
                return Some(ty.clone());
            }
        }
        self.parent.type_of_reference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(spec: &str) -> TensorType {
        TensorType::from_spec(spec).unwrap()
    }

    fn parse(text: &str) -> ExpressionNode {
        ExpressionNode::parse(text).unwrap()
    }

    #[test]
    fn test_function_types() {
        let mut profile = RankProfile::new("test");
        profile.declare_input("query(x)", t("tensor(d0[1],d1[10])"));
        profile.add_function("input", vec![], parse("query(x)")).unwrap();
        profile
            .add_function("scaled", vec!["v".into()], parse("v * 2"))
            .unwrap();
        assert_eq!(profile.inferred_type(&parse("input")), Some(t("tensor(d0[1],d1[10])")));
        assert_eq!(profile.inferred_type(&parse("scaled(input)")), Some(t("tensor(d0[1],d1[10])")));
        assert_eq!(profile.inferred_type(&parse("scaled(1)")), Some(TensorType::scalar()));
        assert_eq!(profile.inferred_type(&parse("scaled")), None);
        assert_eq!(profile.inferred_type(&parse("query(undeclared)")), Some(TensorType::scalar()));
        assert_eq!(profile.inferred_type(&parse("nothing")), None);
    }

    #[test]
    fn test_replace_function_expression() {
        let mut profile = RankProfile::new("test");
        profile.add_generated_function("f", parse("a"), "m").unwrap();
        profile.replace_function_expression("f", parse("a + 1")).unwrap();
        let function = profile.function("f").unwrap();
        assert_eq!(function.expression.to_string(), "a + 1.0");
        assert_eq!(function.generated_by.as_deref(), Some("m"));
        assert!(matches!(
            profile.replace_function_expression("g", parse("1")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_recursive_function_is_unknown() {
        let mut profile = RankProfile::new("test");
        profile.add_function("a", vec![], parse("b + 1")).unwrap();
        profile.add_function("b", vec![], parse("a * 2")).unwrap();
        assert_eq!(profile.inferred_type(&parse("a")), None);
    }

    #[test]
    fn test_constants() {
        let mut profile = RankProfile::new("test");
        profile.add_constant("c", "tensor(x[2]):[1,2]".parse().unwrap());
        let w = RankingConstant {
            name: "W".into(),
            ty: t("tensor(d1[10],d2[5])"),
            path: "models.generated/m/constants/W.tbf".into(),
        };
        assert!(profile.add_ranking_constant(w.clone()));
        let other = RankingConstant {
            path: "elsewhere.tbf".into(),
            ..w
        };
        assert!(!profile.add_ranking_constant(other));
        assert_eq!(profile.ranking_constant("W").unwrap().path, "models.generated/m/constants/W.tbf");
        assert_eq!(profile.inferred_type(&parse("constant(W)")), Some(t("tensor(d1[10],d2[5])")));
        assert_eq!(profile.inferred_type(&parse("constant(c) + c")), Some(t("tensor(x[2])")));
    }

    #[test]
    fn test_duplicate_function_fails() {
        let mut profile = RankProfile::new("test");
        profile.add_function("f", vec![], parse("1")).unwrap();
        let error = profile.add_generated_function("f", parse("2"), "m").unwrap_err();
        assert!(matches!(error, Error::Config(_)));
        assert_eq!(profile.function("f").unwrap().expression, parse("1"));
    }

    #[test]
    fn test_from_json() {
        let profile = RankProfile::from_json(
            r#"{
                "name": "default",
                "inputs": {"query(x)": "tensor(x[2])"},
                "functions": [{"name": "input", "expression": "query(x) * 2"}],
                "constants": {"bias": "tensor(x[2]):[1,1]"}
            }"#,
        )
        .unwrap();
        assert_eq!(profile.name(), "default");
        assert_eq!(profile.inferred_type(&parse("input + bias")), Some(t("tensor(x[2])")));
        assert!(RankProfile::from_json(r#"{"name": "p", "functions": [{"name": "f", "expression": "1 +"}]}"#).is_err());
    }
}
