use rankmodel::infra::storage::load_ranking_constant_values;
use rankmodel::{
    DiskFileStore, Error, ExpressionNode, FeatureArguments, FileStore, ImportedModel, ImportedModelCache,
    MemoryFileStore, Model, ModelConverter, ModelImporter, RankProfile, Result, Signature, Tensor, TensorType,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn t(spec: &str) -> TensorType {
    TensorType::from_spec(spec).unwrap()
}

fn parse(text: &str) -> ExpressionNode {
    ExpressionNode::parse(text).unwrap()
}

/// Serves one in-memory model and counts how often it is imported.
struct FixedImporter {
    model: ImportedModel,
    imports: AtomicUsize,
}

impl FixedImporter {
    fn new(model: ImportedModel) -> Self {
        Self {
            model,
            imports: AtomicUsize::new(0),
        }
    }
}

impl ModelImporter for FixedImporter {
    fn import_model(&self, model_name: &str, _model_directory: &str) -> Result<ImportedModel> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        let mut model = self.model.clone();
        model.name = model_name.to_string();
        Ok(model)
    }
}

/// `reduce(input * constant(W), sum, d1)` over a batch dimension `d0`.
fn dense_model() -> ImportedModel {
    let weights: Vec<f64> = (0..50).map(|i| (i as f64) * 0.1 - 2.0).collect();
    let mut model = ImportedModel::new("dense");
    model
        .large_constants
        .insert("W".into(), Tensor::dense(t("tensor(d1[10],d2[5])"), &weights).unwrap());
    model
        .required_inputs
        .insert("input".into(), t("tensor(d0[1],d1[10])"));
    model
        .expressions
        .insert("out".into(), parse("reduce(input * constant(W), sum, d1)"));
    model
        .signatures
        .insert("serving_default".into(), Signature::default().output("y", "out"));
    model
}

fn profile() -> RankProfile {
    let mut profile = RankProfile::new("ranking");
    profile.declare_input("query(x)", t("tensor(d0[1],d1[10])"));
    profile.add_function("input", vec![], parse("query(x)")).unwrap();
    profile
}

fn arguments(signature: Option<&str>, output: Option<&str>) -> FeatureArguments {
    FeatureArguments::new("dense", signature.map(String::from), output.map(String::from)).unwrap()
}

fn convert(
    files: &dyn FileStore,
    importer: &dyn ModelImporter,
    arguments: &FeatureArguments,
    profile: &mut RankProfile,
) -> Result<ExpressionNode> {
    let cache = ImportedModelCache::new();
    ModelConverter::new(files, importer, &cache).convert(arguments, profile)
}

mod test_conversion {
    use super::*;

    #[test]
    fn test_output_type_keeps_batch_dimension() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let mut profile = profile();
        let expression = convert(&files, &importer, &arguments(None, None), &mut profile).unwrap();

        assert_eq!(
            expression.to_string(),
            "join(reduce(reduce(input, sum, d0) * constant(W), sum, d1), tensor(d0[1])(1.0), f(a,b)(a * b))"
        );
        assert_eq!(profile.inferred_type(&expression), Some(t("tensor(d0[1],d2[5])")));
        assert!(files.exists("models.generated.replicated/dense/expressions/single.expression"));
        assert!(files.exists("models.generated/dense/constants/W.tbf"));
    }

    #[test]
    fn test_converted_expression_computes_the_original() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let mut profile = profile();
        let expression = convert(&files, &importer, &arguments(None, None), &mut profile).unwrap();
        profile.add_function("converted", vec![], expression).unwrap();
        profile
            .add_function("original", vec![], parse("reduce(input * constant(W), sum, d1)"))
            .unwrap();

        let values = load_ranking_constant_values(&files, &profile).unwrap();
        let model = Model::from_profile(&profile, &values).unwrap();
        let x = "[[1,2,3,4,5,6,7,8,9,10]]";
        let evaluate = |function: &str| {
            model
                .evaluator_of(function)
                .unwrap()
                .bind_literal("query(x)", x)
                .unwrap()
                .evaluate()
                .unwrap()
        };
        let converted = evaluate("converted");
        let original = evaluate("original");
        assert_eq!(converted.ty(), &t("tensor(d0[1],d2[5])"));
        assert!(converted.approx_eq(&original, 1e-9));
    }

    #[test]
    fn test_missing_output_is_reported() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let err = convert(&files, &importer, &arguments(None, Some("z")), &mut profile()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Model does not have the specified output 'z'");
        assert!(files.paths().is_empty());
    }

    #[test]
    fn test_multiple_signatures_are_listed() {
        let mut model = dense_model();
        model
            .signatures
            .insert("other".into(), Signature::default().output("y", "out"));
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(model);
        let err = convert(&files, &importer, &arguments(None, None), &mut profile()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Model has multiple signatures (other, serving_default), one must be specified as a second argument"
        );
        assert!(convert(&files, &importer, &arguments(Some("other"), None), &mut profile()).is_ok());
    }

    #[test]
    fn test_skipped_outputs_are_described() {
        let mut model = dense_model();
        model.signatures.insert(
            "serving_default".into(),
            Signature::default()
                .skipped_output("y", "unsupported op")
                .import_warning("graph truncated"),
        );
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(model);
        let err = convert(&files, &importer, &arguments(None, None), &mut profile()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No outputs are available: Skipping output 'y': unsupported op"
        );
    }

    #[test]
    fn test_override_of_large_constant() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let mut profile = profile();
        profile
            .add_function("W", vec![], parse("tensor(d1[10],d2[5])(d1 + d2)"))
            .unwrap();
        let expression = convert(&files, &importer, &arguments(None, None), &mut profile).unwrap();
        assert!(expression.to_string().contains("reduce(input, sum, d0) * W"));
        assert!(profile.ranking_constant("W").is_none());
    }
}

mod test_store {
    use super::*;

    #[test]
    fn test_replay_needs_no_model_source() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let mut first = profile();
        let converted = convert(&files, &importer, &arguments(None, None), &mut first).unwrap();
        let stored = files
            .read("models.generated.replicated/dense/expressions/single.expression")
            .unwrap();

        let mut second = profile();
        let replayed = convert(&files, &importer, &arguments(None, None), &mut second).unwrap();
        assert_eq!(importer.imports.load(Ordering::SeqCst), 1);
        assert_eq!(replayed, converted);
        assert_eq!(second, first);
        assert_eq!(
            files
                .read("models.generated.replicated/dense/expressions/single.expression")
                .unwrap(),
            stored
        );
    }

    #[test]
    fn test_argument_combinations_have_their_own_files() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        convert(&files, &importer, &arguments(Some("serving_default"), None), &mut profile()).unwrap();
        convert(&files, &importer, &arguments(None, Some("y")), &mut profile()).unwrap();
        convert(&files, &importer, &arguments(Some("serving_default"), Some("y")), &mut profile()).unwrap();
        let expressions = files
            .list_children("models.generated.replicated/dense/expressions")
            .unwrap();
        assert_eq!(
            expressions,
            vec![
                "models.generated.replicated/dense/expressions/.y.expression",
                "models.generated.replicated/dense/expressions/serving_default..expression",
                "models.generated.replicated/dense/expressions/serving_default.y.expression",
            ]
        );
    }

    #[test]
    fn test_constant_names_cannot_leave_the_store_layout() {
        for name in ["dense/kernel", "../x", "a:b", "a\tb", "a\nb"] {
            let mut model = dense_model();
            model
                .large_constants
                .insert(name.into(), Tensor::dense(t("tensor(d2[2])"), &[1.0, 2.0]).unwrap());
            let files = MemoryFileStore::new();
            let importer = FixedImporter::new(model);
            let mut profile = profile();
            let err = convert(&files, &importer, &arguments(None, None), &mut profile).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{:?}", name);
            assert!(err.to_string().contains(&format!("'{}'", name)));
            assert!(files.paths().is_empty());
            assert_eq!(profile, super::profile());
        }
    }

    #[test]
    fn test_disk_store_round_trip() {
        let root = std::env::temp_dir().join(format!("rankmodel-{}", uuid::Uuid::new_v4()));
        let files = DiskFileStore::new(&root);
        let importer = FixedImporter::new(dense_model());
        let mut first = profile();
        let converted = convert(&files, &importer, &arguments(None, None), &mut first).unwrap();

        let reopened = DiskFileStore::new(&root);
        let mut second = profile();
        let replayed = convert(&reopened, &importer, &arguments(None, None), &mut second).unwrap();
        assert_eq!(replayed, converted);
        assert_eq!(second, first);
        let _ = std::fs::remove_dir_all(&root);
    }
}

mod test_concurrency {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_one_import_per_model_path() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let cache = ImportedModelCache::new();
        let results: Vec<String> = (0..8)
            .into_par_iter()
            .map(|_| {
                let mut profile = profile();
                let converter = ModelConverter::new(&files, &importer, &cache);
                let arguments = FeatureArguments::new("dense", None, Some("y".into())).unwrap();
                converter.convert(&arguments, &mut profile).unwrap().to_string()
            })
            .collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(importer.imports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parallel_evaluation_over_rows() {
        let files = MemoryFileStore::new();
        let importer = FixedImporter::new(dense_model());
        let mut profile = profile();
        let expression = convert(&files, &importer, &arguments(None, None), &mut profile).unwrap();
        profile.add_function("output", vec![], expression).unwrap();
        let values = load_ranking_constant_values(&files, &profile).unwrap();
        let model = Arc::new(Model::from_profile(&profile, &values).unwrap());

        let sums: Vec<f64> = (0..32)
            .into_par_iter()
            .map(|i| {
                let x = Tensor::dense(t("tensor(d0[1],d1[10])"), &[i as f64; 10]).unwrap();
                let result = model.evaluator_of("output").unwrap().bind("query(x)", x).unwrap().evaluate().unwrap();
                result.cells().values().sum()
            })
            .collect();
        let base = sums[1];
        for (i, sum) in sums.iter().enumerate() {
            assert!((sum - base * i as f64).abs() < 1e-6);
        }
    }

    #[test]
    fn test_independent_conversions_agree() {
        let expressions: BTreeMap<usize, String> = (0..4)
            .into_par_iter()
            .map(|i| {
                let files = MemoryFileStore::new();
                let importer = FixedImporter::new(dense_model());
                let mut profile = profile();
                (i, convert(&files, &importer, &arguments(None, None), &mut profile).unwrap().to_string())
            })
            .collect();
        assert_eq!(expressions.len(), 4);
        assert!(expressions.values().all(|e| e == &expressions[&0]));
    }
}
