use anyhow::{bail, Context, Result};
use rankmodel::core::{Model, RankProfile, Tensor};
use rankmodel::infra::storage::load_ranking_constant_values;
use rankmodel::infra::{
    DiskFileStore, FeatureArguments, FileStore, ImportedModelCache, JsonModelImporter, ModelConverter, ModelStore,
};
use rankmodel::ExpressionNode;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// The function name the converted expression is registered under for evaluation.
pub const OUTPUT_FUNCTION: &str = "output";

pub struct Target {
    pub model: String,
    pub signature: Option<String>,
    pub output: Option<String>,
    pub profile: Option<PathBuf>,
}

impl Target {
    fn arguments(&self) -> Result<FeatureArguments> {
        FeatureArguments::new(self.model.clone(), self.signature.clone(), self.output.clone())
            .with_context(|| format!("invalid model reference '{}'", self.model))
    }

    fn load_profile(&self) -> Result<RankProfile> {
        match &self.profile {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read rank profile {}", path.display()))?;
                RankProfile::from_json(&text)
                    .with_context(|| format!("failed to load rank profile {}", path.display()))
            }
            None => Ok(RankProfile::new("default")),
        }
    }
}

struct Converted {
    profile: RankProfile,
    expression: ExpressionNode,
}

fn run_conversion(app_root: &Path, target: &Target) -> Result<Converted> {
    let store = DiskFileStore::new(app_root);
    let importer = JsonModelImporter::new(&store);
    let cache = ImportedModelCache::new();
    let arguments = target.arguments()?;
    let mut profile = target.load_profile()?;
    let expression = ModelConverter::new(&store, &importer, &cache)
        .convert(&arguments, &mut profile)
        .with_context(|| format!("failed to convert {}", arguments))?;
    Ok(Converted { profile, expression })
}

pub fn convert(app_root: &Path, target: &Target) -> Result<()> {
    let converted = run_conversion(app_root, target)?;
    println!("{}", converted.expression);
    match converted.profile.inferred_type(&converted.expression) {
        Some(ty) => println!("type: {}", ty),
        None => println!("type: unknown"),
    }
    Ok(())
}

pub fn eval(
    app_root: &Path,
    target: &Target,
    function: Option<&str>,
    bindings: &[String],
    rows: Option<&Path>,
) -> Result<()> {
    let Converted { mut profile, expression } = run_conversion(app_root, target)?;
    profile
        .add_function(OUTPUT_FUNCTION, Vec::new(), expression)
        .context("failed to register the converted expression")?;

    let store = DiskFileStore::new(app_root);
    let values = load_ranking_constant_values(&store, &profile).context("failed to load ranking constants")?;
    let model = Model::from_profile(&profile, &values).context("failed to build model")?;
    let function = function.unwrap_or(OUTPUT_FUNCTION);

    let mut fixed = Vec::new();
    for binding in bindings {
        let (slot, literal) = binding
            .split_once('=')
            .with_context(|| format!("binding '{}' is not of the form slot=literal", binding))?;
        fixed.push((slot.to_string(), literal.to_string()));
    }

    let rows = match rows {
        Some(path) => read_rows(path)?,
        None => vec![BTreeMap::new()],
    };
    info!(function = %function, rows = rows.len(), "evaluating");

    let results: Vec<Result<Tensor>> = rows
        .par_iter()
        .map(|row| evaluate_row(&model, function, &fixed, row))
        .collect();
    for (i, result) in results.into_iter().enumerate() {
        let value = result.with_context(|| format!("row {} failed", i + 1))?;
        println!("{}", value);
    }
    Ok(())
}

fn evaluate_row(
    model: &Model,
    function: &str,
    fixed: &[(String, String)],
    row: &BTreeMap<String, String>,
) -> Result<Tensor> {
    let mut evaluator = model.evaluator_of(function)?;
    for (slot, literal) in fixed.iter().map(|(slot, literal)| (slot, literal)).chain(row.iter()) {
        evaluator = evaluator
            .bind_literal(slot, literal)
            .with_context(|| format!("failed to bind '{}'", slot))?;
    }
    Ok(evaluator.evaluate()?)
}

/// One JSON object per line, mapping slot names to tensor literals or numbers.
fn read_rows(path: &Path) -> Result<Vec<BTreeMap<String, String>>> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read rows {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).with_context(|| format!("{}:{}: invalid JSON", path.display(), i + 1))?;
        let Value::Object(object) = value else {
            bail!("{}:{}: expected a JSON object", path.display(), i + 1);
        };
        let mut row = BTreeMap::new();
        for (slot, value) in object {
            let literal = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                other => bail!("{}:{}: unsupported value for '{}': {}", path.display(), i + 1, slot, other),
            };
            row.insert(slot, literal);
        }
        rows.push(row);
    }
    Ok(rows)
}

pub fn show(app_root: &Path, model: &str) -> Result<()> {
    let files = DiskFileStore::new(app_root);
    let arguments = FeatureArguments::new(model, None, None)
        .with_context(|| format!("invalid model reference '{}'", model))?;
    let store = ModelStore::new(&files, arguments.clone());

    println!("Model: {}", arguments.model_path());
    println!("\nExpressions:");
    for path in files.list_children(&arguments.expressions_directory())? {
        let text = files.read_to_string(&path)?;
        println!("  {}: {}", file_name(&path), text.trim());
    }

    println!("\nSmall constants:");
    for record in store.read_small_constants()? {
        println!("  {}: {}", record.name, record.value.ty());
    }

    println!("\nLarge constants:");
    for record in store.read_large_constants()? {
        println!("  {}: {} ({})", record.name, record.ty, record.path);
    }

    println!("\nFunctions:");
    for record in store.read_macros()? {
        println!("  {}: {}", record.name, record.expression);
    }
    Ok(())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
