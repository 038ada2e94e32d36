use crate::error::{PipelineError, Result};
use crate::ml::regressor::TrainedModel;
use crate::models::{FeatureVector, RawRecord};
use crate::processor::{FeatureEngineer, PreprocessState, RecordNormalizer};
use crate::storage::ArtifactStore;
use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Preprocessing state plus every model found in the model directory.
/// Built once and reused across requests.
pub struct InferenceContext {
    store: ArtifactStore,
    normalizer: RecordNormalizer,
    engineer: FeatureEngineer,
    state: PreprocessState,
    models: BTreeMap<String, TrainedModel>,
}

impl InferenceContext {
    pub fn load(model_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = ArtifactStore::new(model_dir);
        let (state, models) = Self::read_artifacts(&store)?;

        Ok(InferenceContext {
            store,
            normalizer: RecordNormalizer::new(),
            engineer: FeatureEngineer::default(),
            state,
            models,
        })
    }

    /// Re-read state and models, e.g. after a training run replaced them.
    pub fn reload(&mut self) -> Result<()> {
        let (state, models) = Self::read_artifacts(&self.store)?;
        self.state = state;
        self.models = models;
        Ok(())
    }

    fn read_artifacts(store: &ArtifactStore) -> Result<(PreprocessState, BTreeMap<String, TrainedModel>)> {
        let state = store.load()?;

        let mut models = BTreeMap::new();
        for name in store.available_models()? {
            let model = store.load_model(&name)?;
            if let Some(run_id) = state.run_id {
                if model.run_id != run_id {
                    warn!(
                        "⚠️ Skipping model {}: trained in run {} but state belongs to run {}",
                        name, model.run_id, run_id
                    );
                    continue;
                }
            }
            if model.schema_version != state.schema.version {
                warn!(
                    "⚠️ Model {} was trained on schema v{} but state is v{}; features will be reindexed by name",
                    name, model.schema_version, state.schema.version
                );
            }
            models.insert(name, model);
        }

        info!(
            "📦 Loaded inference context from {} ({} model(s): {:?})",
            store.model_dir().display(),
            models.len(),
            models.keys().collect::<Vec<_>>()
        );
        Ok((state, models))
    }

    pub fn state(&self) -> &PreprocessState {
        &self.state
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn model_dir(&self) -> &Path {
        self.store.model_dir()
    }

    /// Engineered, scaled features for one request, in state schema order.
    pub fn features_for(&self, record: &Value, now: NaiveDateTime) -> Result<FeatureVector> {
        let raw = RawRecord::from_value(record.clone()).ok_or_else(|| {
            PipelineError::InvalidInput("prediction input must be a JSON object".to_string())
        })?;
        if raw.get("title").is_none() && raw.get("name").is_none() {
            return Err(PipelineError::InvalidInput(
                "prediction input needs a 'title' or 'name' field".to_string(),
            ));
        }

        let normalized = self.normalizer.normalize_request(&raw);
        Ok(self.engineer.transform(&normalized, &self.state, now))
    }

    pub fn predict(&self, record: &Value, model_name: &str) -> Result<f64> {
        self.predict_at(record, model_name, Local::now().naive_local())
    }

    /// Predicted price in currency units, never negative, rounded to 2 decimals.
    pub fn predict_at(&self, record: &Value, model_name: &str, now: NaiveDateTime) -> Result<f64> {
        let features = self.features_for(record, now)?;
        let model = self
            .models
            .get(model_name)
            .ok_or_else(|| PipelineError::ModelNotFound(model_name.to_string()))?;

        let log_price = model.predict(&features.to_matrix())?;
        let log_price = log_price.first().copied().ok_or_else(|| {
            PipelineError::PredictionError(format!("{} model returned no output", model_name))
        })?;

        let price = round_price(log_price.exp_m1());
        debug!("{} predicted log-price {:.6} -> {:.2}", model_name, log_price, price);
        Ok(price)
    }
}

fn round_price(price: f64) -> f64 {
    (price.max(0.0) * 100.0).round() / 100.0
}

/// Load everything from `model_dir` and score a single record.
pub fn predict_price(model_dir: impl Into<PathBuf>, record: &Value, model_name: &str) -> Result<f64> {
    InferenceContext::load(model_dir)?.predict(record, model_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::ml::regressor::RegressorKind;
    use chrono::NaiveDate;
    use polars::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn trained_dir() -> tempfile::TempDir {
        let df = df!(
            "title" => [
                "Samsung Galaxy S25 Ultra", "Samsung Galaxy S25", "Samsung Galaxy S25 FE",
                "Apple iPhone 16 Pro", "Apple iPhone 16", "Vivo X200", "Vivo Y39",
                "OnePlus 13", "OnePlus 13R", "Redmi Note 14",
            ],
            "price" => [
                "₹1,29,999", "₹80,999", "₹59,999", "₹1,19,900", "₹79,900",
                "₹65,999", "₹16,999", "₹69,999", "₹42,999", "₹18,999",
            ],
            "rating" => ["4.5", "4.4", "4.2", "4.6", "4.5", "4.3", "4.0", "4.4", "4.3", "4.1"],
            "platform" => [
                "Amazon", "Flipkart", "Amazon", "Flipkart", "Amazon",
                "Flipkart", "Amazon", "Flipkart", "Amazon", "Flipkart",
            ],
            "timestamp" => ["2025-06-01 10:00:00"; 10]
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let fit = FeatureEngineer::default().fit(&df, now(), None).unwrap();
        store.save_state(&fit.state).unwrap();

        let mut params = TrainingConfig::default();
        params.n_trees = 10;
        for kind in RegressorKind::ALL {
            let model = TrainedModel::fit(
                kind,
                &fit.features,
                &fit.targets,
                &params,
                fit.state.schema.version,
                Uuid::new_v4(),
                now(),
            )
            .unwrap();
            store.save_model(&model).unwrap();
        }
        dir
    }

    #[test]
    fn test_context_loads_models() {
        let dir = trained_dir();
        let context = InferenceContext::load(dir.path()).unwrap();
        assert_eq!(context.model_names(), vec!["lr", "rf"]);
        assert_eq!(context.state().encoder.categories, vec!["Amazon", "Flipkart"]);
    }

    #[test]
    fn test_prediction_is_rounded_and_non_negative() {
        let dir = trained_dir();
        let context = InferenceContext::load(dir.path()).unwrap();
        let record = json!({"title": "Samsung Galaxy S25 Ultra", "platform": "Amazon", "rating": 4.5});

        for model in ["rf", "lr"] {
            let price = context.predict_at(&record, model, now()).unwrap();
            assert!(price >= 0.0);
            assert_eq!((price * 100.0).round() / 100.0, price);
        }
    }

    #[test]
    fn test_repeated_predictions_identical() {
        let dir = trained_dir();
        let context = InferenceContext::load(dir.path()).unwrap();
        let record = json!({"title": "Vivo X200", "platform": "Flipkart"});

        let first = context.predict_at(&record, "rf", now()).unwrap();
        let second = context.predict_at(&record, "rf", now()).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_rejects_non_object_and_untitled_input() {
        let dir = trained_dir();
        let context = InferenceContext::load(dir.path()).unwrap();

        assert!(matches!(
            context.predict_at(&json!(["Samsung"]), "rf", now()),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            context.predict_at(&json!({"platform": "Amazon"}), "rf", now()),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_model_name() {
        let dir = trained_dir();
        let context = InferenceContext::load(dir.path()).unwrap();
        let err = context
            .predict_at(&json!({"title": "Samsung S25"}), "xgb", now())
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotFound(name) if name == "xgb"));
    }

    #[test]
    fn test_models_from_another_run_are_skipped() {
        let dir = trained_dir();
        let store = ArtifactStore::new(dir.path());
        let mut state = store.load().unwrap();
        state.run_id = Some(Uuid::new_v4());
        store.save_state(&state).unwrap();

        let context = InferenceContext::load(dir.path()).unwrap();
        assert!(context.model_names().is_empty());
        assert!(matches!(
            context.predict_at(&json!({"title": "Samsung S25"}), "rf", now()),
            Err(PipelineError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_load_without_state_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            InferenceContext::load(dir.path()),
            Err(PipelineError::MissingArtifact(_))
        ));
    }

    #[test]
    fn test_round_price() {
        assert_eq!(round_price(-12.5), 0.0);
        assert_eq!(round_price(1234.5678), 1234.57);
    }
}
