use chrono::{Duration, NaiveDate, NaiveDateTime};
use price_pipeline::config::{EncoderPolicy, PipelineConfig};
use price_pipeline::ml::{predict_price, InferenceContext, Trainer};
use price_pipeline::models::FeatureMatrix;
use price_pipeline::processor::RecordNormalizer;
use price_pipeline::storage::{ArtifactStore, BatchStore, ENCODER_FILE, PERFORMANCE_FILE};
use price_pipeline::PipelineError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::path::Path;

const CATALOG: [(&str, f64); 6] = [
    ("Samsung Galaxy S25 Ultra 5G", 129_999.0),
    ("Samsung Galaxy S25 FE", 59_999.0),
    ("Apple iPhone 16 Pro", 119_900.0),
    ("OnePlus 13", 69_999.0),
    ("Vivo Y39", 16_999.0),
    ("Redmi Note 14", 18_999.0),
];

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 10)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn config_in(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.output_dir = root.join("outputs");
    config.paths.model_dir = root.join("model");
    config.training.n_trees = 20;
    config
}

fn raw_records(count: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(11);
    (0..count)
        .map(|i| {
            let (title, base) = CATALOG[i % CATALOG.len()];
            let price = base * rng.gen_range(0.9..1.1);
            json!({
                "title": title,
                "price": format!("₹{:.0}", price),
                "rating": format!("{:.1}", rng.gen_range(3.5..5.0)),
                "url": format!("https://example.com/{}", i),
                "platform": if i % 2 == 0 { "Amazon" } else { "Flipkart" },
            })
        })
        .collect()
}

/// Normalize and save `count` records, stamped a few days before `now()`.
fn seed_batch(config: &PipelineConfig, count: usize) {
    let captured = now() - Duration::days(3);
    let records = RecordNormalizer::new().normalize_all(&raw_records(count), captured);
    BatchStore::from_config(&config.paths)
        .save(&records, captured)
        .unwrap()
        .unwrap();
}

#[test]
fn test_end_to_end_training_writes_one_row_per_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    seed_batch(&config, 100);

    let report = Trainer::new(&config).train_latest_at(now()).unwrap();
    assert_eq!(report.rows, 100);
    assert_eq!(report.test_rows, 20);
    assert_eq!(report.train_rows, 80);
    assert!(report.failures().is_empty());

    let store = ArtifactStore::new(&config.paths.model_dir);
    let rows = store.load_performance().unwrap();
    let mut models: Vec<&str> = rows.iter().map(|r| r.model.as_str()).collect();
    models.sort();
    assert_eq!(models, vec!["lr", "rf"]);
    for row in &rows {
        assert!(row.rmse >= 0.0);
        assert!(row.r2 <= 1.0);
    }
    assert!(config.paths.model_dir.join(PERFORMANCE_FILE).exists());
    assert_eq!(store.available_models().unwrap(), vec!["lr", "rf"]);
}

#[test]
fn test_samsung_prediction_within_training_range() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    seed_batch(&config, 100);
    let report = Trainer::new(&config).train_latest_at(now()).unwrap();

    let record = json!({"title": "Samsung Galaxy S25 Ultra 5G", "platform": "Amazon", "rating": 4.5});
    let price = predict_price(&config.paths.model_dir, &record, "rf").unwrap();

    let (low, high) = report.price_range;
    assert!(price > 0.0);
    assert!(price >= low - 0.01 && price <= high + 0.01, "{} not in [{}, {}]", price, low, high);
}

#[test]
fn test_unseen_platform_and_unknown_brand_still_predict() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    seed_batch(&config, 60);
    Trainer::new(&config).train_latest_at(now()).unwrap();

    let context = InferenceContext::load(config.paths.model_dir.clone()).unwrap();
    let record = json!({"title": "NONEXISTENTBRAND Phone", "platform": "Meesho"});

    let features = context.features_for(&record, now()).unwrap();
    for category in &context.state().encoder.categories {
        assert_eq!(features.get(&format!("platform_{}", category)), Some(0.0));
    }

    for model in ["rf", "lr"] {
        let price = context.predict_at(&record, model, now()).unwrap();
        assert!(price.is_finite() && price >= 0.0);
    }
}

#[test]
fn test_prediction_without_artifacts_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = predict_price(dir.path(), &json!({"title": "Samsung S25"}), "rf").unwrap_err();
    assert!(matches!(err, PipelineError::MissingArtifact(_)));
}

#[test]
fn test_training_without_batch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let err = Trainer::new(&config).train_latest_at(now()).unwrap_err();
    assert!(matches!(err, PipelineError::NoBatchFile { .. }));
    assert!(!config.paths.model_dir.exists());
}

#[test]
fn test_unparseable_batch_leaves_artifacts_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let records = RecordNormalizer::new().normalize_all(
        &[json!({"title": "Samsung S25", "price": "N/A"})],
        now(),
    );
    BatchStore::from_config(&config.paths).save(&records, now()).unwrap();

    let err = Trainer::new(&config).train_latest_at(now()).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyBatch));
    assert!(!config.paths.model_dir.join(ENCODER_FILE).exists());
}

#[test]
fn test_retraining_bumps_schema_unless_frozen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    seed_batch(&config, 40);

    let first = Trainer::new(&config).train_latest_at(now()).unwrap();
    let second = Trainer::new(&config).train_latest_at(now()).unwrap();
    assert_eq!(first.schema_version, 1);
    assert_eq!(second.schema_version, 2);

    config.training.encoder_policy = EncoderPolicy::Frozen;
    let frozen = Trainer::new(&config).train_latest_at(now()).unwrap();
    assert_eq!(frozen.schema_version, 2);

    let mut context = InferenceContext::load(config.paths.model_dir.clone()).unwrap();
    context.reload().unwrap();
    assert_eq!(context.state().schema.version, 2);
}

#[test]
fn test_small_batch_keeps_forest_when_linear_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    // 8 rows -> 6 training rows against 9 feature columns
    seed_batch(&config, 8);

    let report = Trainer::new(&config).train_latest_at(now()).unwrap();
    assert_eq!(report.train_rows, 6);

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "lr");

    let trained: Vec<&str> = report.performance().iter().map(|r| r.model.as_str()).collect();
    assert_eq!(trained, vec!["rf"]);

    let store = ArtifactStore::new(&config.paths.model_dir);
    let rows = store.load_performance().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].model, "rf");
    assert_eq!(store.available_models().unwrap(), vec!["rf"]);
    assert!(config.paths.model_dir.join(ENCODER_FILE).exists());
}

#[test]
fn test_failed_retrain_drops_previous_model() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.training.encoder_policy = EncoderPolicy::Frozen;

    seed_batch(&config, 100);
    let first = Trainer::new(&config).train_latest_at(now()).unwrap();
    assert!(first.failures().is_empty());

    // same capture second, so this batch gets a suffixed, later name
    seed_batch(&config, 8);
    let second = Trainer::new(&config).train_latest_at(now()).unwrap();
    assert_eq!(second.rows, 8);
    assert_eq!(second.schema_version, first.schema_version);
    assert_eq!(second.failures()[0].0, "lr");

    let context = InferenceContext::load(config.paths.model_dir.clone()).unwrap();
    assert_eq!(context.model_names(), vec!["rf"]);
    assert_eq!(context.state().run_id, Some(second.run_id));

    let record = json!({"title": "Samsung Galaxy S25 Ultra 5G", "platform": "Amazon"});
    assert!(matches!(
        context.predict_at(&record, "lr", now()),
        Err(PipelineError::ModelNotFound(_))
    ));
    assert!(context.predict_at(&record, "rf", now()).is_ok());
}

#[test]
fn test_reindex_fills_and_drops() {
    let matrix = FeatureMatrix::from_rows(
        vec!["rating".to_string(), "legacy".to_string()],
        vec![vec![4.5, 7.0]],
    );
    let aligned = matrix.align_to(&["platform_Amazon".to_string(), "rating".to_string()]);
    assert_eq!(aligned.names(), ["platform_Amazon".to_string(), "rating".to_string()]);
    assert_eq!(aligned.row(0).values(), [0.0, 4.5]);
}
