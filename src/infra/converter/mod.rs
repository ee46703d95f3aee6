pub mod batch;

use crate::core::expression::ExpressionNode;
use crate::core::profile::RankProfile;
use crate::core::tensor::TensorType;
use crate::error::{Error, Result};
use crate::infra::importer::{ImportedModel, ImportedModelCache, ModelImporter, Signature};
use crate::infra::storage::{
    FeatureArguments, FileStore, MacroRecord, ModelStore, PendingWrites, SmallConstantRecord,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub use batch::{expand_batch_dimensions_at_output, reduce_batch_dimensions_at_input};

pub struct ModelConverter<'a> {
    store: &'a dyn FileStore,
    importer: &'a dyn ModelImporter,
    cache: &'a ImportedModelCache,
}

impl<'a> ModelConverter<'a> {
    pub fn new(store: &'a dyn FileStore, importer: &'a dyn ModelImporter, cache: &'a ImportedModelCache) -> Self {
        Self { store, importer, cache }
    }

    /// Converts the model output named by `arguments`, registering its
    /// constants and functions in `profile`. The profile is left untouched
    /// when the conversion fails.
    pub fn convert(&self, arguments: &FeatureArguments, profile: &mut RankProfile) -> Result<ExpressionNode> {
        let store = ModelStore::new(self.store, arguments.clone());
        let mut staged = profile.clone();
        let expression = if store.has_stored_model() {
            info!(model = %arguments, profile = %profile.name(), "replaying stored conversion");
            replay(&store, &mut staged)?
        } else {
            info!(model = %arguments, profile = %profile.name(), "converting model");
            let model = self.cache.get_or_try_insert_with(arguments.model_path(), || {
                self.importer
                    .import_model(&arguments.model_name(), &arguments.model_directory())
            })?;
            model.validate()?;
            let mut pending = PendingWrites::default();
            let expression = Conversion {
                model: &model,
                arguments,
                store: &store,
                profile: &mut staged,
                pending: &mut pending,
            }
            .run()?;
            store.commit(pending)?;
            info!(model = %arguments, path = %arguments.expression_path(), "stored converted model");
            expression
        };
        *profile = staged;
        Ok(expression)
    }
}

fn replay(store: &ModelStore<'_>, profile: &mut RankProfile) -> Result<ExpressionNode> {
    let model_path = store.arguments().model_path();
    for record in store.read_small_constants()? {
        profile.add_constant(record.name, record.value);
    }
    for record in store.read_large_constants()? {
        if !profile.add_ranking_constant(record.to_ranking_constant()) {
            debug!(constant = %record.name, "ranking constant already registered");
        }
    }
    for record in store.read_macros()? {
        match profile.function(&record.name) {
            Some(existing) => {
                if existing.generated_by.as_deref() != Some(model_path) {
                    warn!(
                        function = %record.name,
                        model = %model_path,
                        "stored function is shadowed by an existing function"
                    );
                }
            }
            None => profile.add_generated_function(record.name, record.expression, model_path)?,
        }
    }
    store.read_expression()
}

/// One first-time conversion, applied to a staged copy of the profile.
struct Conversion<'a, 'b> {
    model: &'a ImportedModel,
    arguments: &'a FeatureArguments,
    store: &'a ModelStore<'b>,
    profile: &'a mut RankProfile,
    pending: &'a mut PendingWrites,
}

impl Conversion<'_, '_> {
    fn run(mut self) -> Result<ExpressionNode> {
        let overrides = self.materialize_constants()?;
        let expression = self.select_expression()?;
        let expression = expression.replace_constants_by_functions(&overrides);
        let functions: BTreeMap<String, ExpressionNode> = self
            .model
            .functions
            .iter()
            .map(|(name, body)| (name.clone(), body.replace_constants_by_functions(&overrides)))
            .collect();

        self.verify_required_inputs(&expression, &functions)?;
        let added = self.add_generated_functions(&functions)?;
        let expression = self.reduce_batch_dimensions(expression, &functions, &added)?;

        for name in functions.keys() {
            if let Some(function) = self.profile.function(name) {
                self.pending.macros.push(MacroRecord {
                    name: name.clone(),
                    expression: function.expression.clone(),
                });
            }
        }
        self.pending.expression = Some(expression.clone());
        Ok(expression)
    }

    /// Registers the model constants. Returns the names of large constants
    /// replaced by profile functions of the same name.
    fn materialize_constants(&mut self) -> Result<Vec<String>> {
        let model = self.model;
        for (name, value) in &model.small_constants {
            self.pending.small_constants.push(SmallConstantRecord {
                name: name.clone(),
                value: value.clone(),
            });
            self.profile.add_constant(name.clone(), value.clone());
        }

        let mut overrides = Vec::new();
        for (name, value) in &model.large_constants {
            if let Some(function) = self.profile.function(name) {
                let actual = self.profile.inferred_type(&function.expression);
                match &actual {
                    Some(ty) if ty.is_assignable_to(value.ty()) => {
                        debug!(constant = %name, "constant replaced by profile function");
                        overrides.push(name.clone());
                    }
                    _ => {
                        return Err(Error::config(format!(
                            "Function '{}' replaces the constant with this name. {}",
                            name,
                            type_mismatch_explanation(value.ty(), actual.as_ref())
                        )))
                    }
                }
                continue;
            }
            let record = self.store.large_constant_record(name, value);
            self.profile.add_ranking_constant(record.to_ranking_constant());
            self.pending.large_constants.push((record, value.clone()));
        }
        Ok(overrides)
    }

    fn select_expression(&self) -> Result<ExpressionNode> {
        let (signature_name, signature) = self.choose_signature()?;
        let output = self.choose_output(signature_name, signature)?;
        if let Some(reason) = signature.skipped_outputs.get(output) {
            let mut message = format!("Could not import model output '{}': {}", output, reason);
            if !signature.import_warnings.is_empty() {
                message.push_str(": ");
                message.push_str(&signature.import_warnings.join(", "));
            }
            return Err(Error::config(message));
        }
        let expression_name = &signature.outputs[output];
        self.model.expression(expression_name).cloned().ok_or_else(|| {
            Error::config(format!(
                "Model output '{}' refers to the missing expression '{}'",
                output, expression_name
            ))
        })
    }

    fn choose_signature(&self) -> Result<(&str, &Signature)> {
        let signatures = &self.model.signatures;
        match self.arguments.signature() {
            Some(name) => signatures
                .get_key_value(name)
                .map(|(name, signature)| (name.as_str(), signature))
                .ok_or_else(|| {
                    Error::config(format!("Model does not have the specified signature '{}'", name))
                }),
            None => {
                let mut entries = signatures.iter();
                match (entries.next(), entries.next()) {
                    (None, _) => Err(Error::config("No signatures are available")),
                    (Some((name, signature)), None) => Ok((name.as_str(), signature)),
                    _ => Err(Error::config(format!(
                        "Model has multiple signatures ({}), one must be specified as a second argument",
                        join_names(signatures.keys())
                    ))),
                }
            }
        }
    }

    fn choose_output<'s>(&self, signature_name: &str, signature: &'s Signature) -> Result<&'s str> {
        match self.arguments.output() {
            Some(name) => {
                if let Some((name, _)) = signature.outputs.get_key_value(name) {
                    return Ok(name.as_str());
                }
                match signature.skipped_outputs.get(name) {
                    Some(reason) => Err(Error::config(format!("Could not use output '{}': {}", name, reason))),
                    None => Err(Error::config(format!("Model does not have the specified output '{}'", name))),
                }
            }
            None => {
                let mut outputs = signature.outputs.keys();
                match (outputs.next(), outputs.next()) {
                    (None, _) => Err(Error::config(format!(
                        "No outputs are available{}",
                        skipped_outputs_description(signature)
                    ))),
                    (Some(name), None) => Ok(name.as_str()),
                    _ => Err(Error::config(format!(
                        "{} has multiple outputs ({}), one must be specified as a third argument",
                        signature_name,
                        join_names(signature.outputs.keys())
                    ))),
                }
            }
        }
    }

    /// Every required input the expression reaches must be a profile
    /// function whose type is assignable to the required type.
    fn verify_required_inputs(
        &self,
        expression: &ExpressionNode,
        functions: &BTreeMap<String, ExpressionNode>,
    ) -> Result<()> {
        for name in function_names_in(expression, functions) {
            let Some(required) = self.model.required_input_type(&name) else {
                continue;
            };
            let Some(function) = self.profile.function(&name) else {
                return Err(Error::config(format!(
                    "Model refers input '{}' of type {} but this function is not present in rank profile '{}'",
                    name,
                    required,
                    self.profile.name()
                )));
            };
            match self.profile.inferred_type(&function.expression) {
                None => {
                    return Err(Error::config(format!(
                        "Model refers input '{}' of type {} which must be produced by a function in the rank \
                         profile, but this function references a feature which is not declared",
                        name, required
                    )))
                }
                Some(actual) if !actual.is_assignable_to(required) => {
                    return Err(Error::config(format!(
                        "Model refers input '{}'. {}",
                        name,
                        type_mismatch_explanation(required, Some(&actual))
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Adds the model's generated functions. Returns the names added now,
    /// leaving out ones an earlier conversion of this model added.
    fn add_generated_functions(&mut self, functions: &BTreeMap<String, ExpressionNode>) -> Result<Vec<String>> {
        let model_path = self.arguments.model_path();
        let mut added = Vec::new();
        for (name, body) in functions {
            if let Some(existing) = self.profile.function(name) {
                if existing.generated_by.as_deref() == Some(model_path) {
                    continue;
                }
                return Err(Error::config(format!(
                    "Generated function '{}' already exists in rank profile '{}'",
                    name,
                    self.profile.name()
                )));
            }
            self.profile.add_generated_function(name.clone(), body.clone(), model_path)?;
            added.push(name.clone());
        }
        Ok(added)
    }

    fn reduce_batch_dimensions(
        &mut self,
        expression: ExpressionNode,
        functions: &BTreeMap<String, ExpressionNode>,
        added: &[String],
    ) -> Result<ExpressionNode> {
        let model = self.model;
        let required = &model.required_inputs;
        let before = self.profile.inferred_type(&expression);

        for name in function_names_in(&expression, functions) {
            if !added.contains(&name) {
                continue;
            }
            if let Some(body) = functions.get(&name) {
                let reduced = reduce_batch_dimensions_at_input(body, required, self.profile);
                self.profile.replace_function_expression(&name, reduced)?;
            }
        }
        let reduced = reduce_batch_dimensions_at_input(&expression, required, self.profile);
        let after = self.profile.inferred_type(&reduced);

        match (before, after) {
            (Some(before), Some(after)) => Ok(expand_batch_dimensions_at_output(reduced, &before, &after)),
            (before, after) => {
                warn!(
                    model = %self.arguments,
                    before = ?before.map(|t| t.to_string()),
                    after = ?after.map(|t| t.to_string()),
                    "output type could not be inferred; batch dimensions are not restored"
                );
                Ok(reduced)
            }
        }
    }
}

/// Names of the simple references reachable from `node`, following the
/// generated functions it calls.
fn function_names_in(node: &ExpressionNode, functions: &BTreeMap<String, ExpressionNode>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_function_names(node, functions, &mut names);
    names
}

fn collect_function_names(
    node: &ExpressionNode,
    functions: &BTreeMap<String, ExpressionNode>,
    names: &mut BTreeSet<String>,
) {
    match node {
        ExpressionNode::Reference(reference) => {
            if reference.output.is_some() || !names.insert(reference.name.clone()) {
                return;
            }
            if let Some(body) = functions.get(&reference.name) {
                collect_function_names(body, functions, names);
            }
        }
        other => {
            for child in other.children() {
                collect_function_names(child, functions, names);
            }
        }
    }
}

fn type_mismatch_explanation(required: &TensorType, actual: Option<&TensorType>) -> String {
    match actual {
        None => format!(
            "The required type of this is {}, but the type of this function could not be inferred",
            required
        ),
        Some(actual) => {
            let mut explanation = format!(
                "The required type of this is {}, but this function returns {}",
                required, actual
            );
            if actual.rank() == 0 {
                explanation.push_str(
                    ". This is often due to missing declaration of query tensor features in the rank profile inputs",
                );
            }
            explanation
        }
    }
}

fn skipped_outputs_description(signature: &Signature) -> String {
    signature
        .skipped_outputs
        .iter()
        .map(|(name, reason)| format!(": Skipping output '{}': {}", name, reason))
        .collect()
}

fn join_names<'s>(names: impl Iterator<Item = &'s String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(", ")
}
