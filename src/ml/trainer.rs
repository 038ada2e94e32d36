use crate::config::{PipelineConfig, TrainingConfig};
use crate::error::{PipelineError, Result};
use crate::ml::regressor::{RegressorKind, TrainedModel};
use crate::models::FeatureMatrix;
use crate::processor::FeatureEngineer;
use crate::storage::{read_batch, ArtifactStore, BatchStore};
use chrono::{Local, NaiveDateTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRow {
    pub model: String,
    pub rmse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone)]
pub enum ModelOutcome {
    Trained {
        performance: PerformanceRow,
        artifact: PathBuf,
    },
    Failed {
        model: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub batch: PathBuf,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub schema_version: u32,
    /// Smallest and largest training price after outlier clipping.
    pub price_range: (f64, f64),
    pub outcomes: Vec<ModelOutcome>,
    pub performance_path: PathBuf,
}

impl TrainingReport {
    pub fn performance(&self) -> Vec<&PerformanceRow> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ModelOutcome::Trained { performance, .. } => Some(performance),
                ModelOutcome::Failed { .. } => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ModelOutcome::Failed { model, reason } => Some((model.as_str(), reason.as_str())),
                ModelOutcome::Trained { .. } => None,
            })
            .collect()
    }
}

/// Fits every configured regressor on the latest batch and persists the
/// preprocessing state, the models and the performance table.
pub struct Trainer {
    batches: BatchStore,
    artifacts: ArtifactStore,
    engineer: FeatureEngineer,
    training: TrainingConfig,
    kinds: Vec<RegressorKind>,
}

impl Trainer {
    pub fn new(config: &PipelineConfig) -> Self {
        Trainer {
            batches: BatchStore::from_config(&config.paths),
            artifacts: ArtifactStore::new(config.paths.model_dir.clone()),
            engineer: FeatureEngineer::new(
                config.outliers.clone(),
                config.training.encoder_policy,
            ),
            training: config.training.clone(),
            kinds: RegressorKind::ALL.to_vec(),
        }
    }

    pub fn with_models(mut self, kinds: Vec<RegressorKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn train_and_save(&self) -> Result<TrainingReport> {
        self.train_latest_at(Local::now().naive_local())
    }

    pub fn train_latest_at(&self, now: NaiveDateTime) -> Result<TrainingReport> {
        let batch = self.batches.latest_batch()?;
        self.train_batch(&batch, now)
    }

    pub fn train_batch(&self, batch: &Path, now: NaiveDateTime) -> Result<TrainingReport> {
        let df = read_batch(batch)?;

        let previous = match self.artifacts.load_encoder() {
            Ok(previous) => previous,
            Err(e) => {
                warn!("⚠️ Ignoring unreadable platform encoder: {}", e);
                None
            }
        };

        let fit = self.engineer.fit(&df, now, previous.as_ref())?;
        let rows = fit.features.nrows();

        let (train_idx, test_idx) =
            train_test_split(rows, self.training.test_size, self.training.seed);
        if train_idx.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }
        info!(
            "✅ Preprocessing and train-test split complete: {} train / {} test rows",
            train_idx.len(),
            test_idx.len()
        );

        let x_train = fit.features.select_rows(&train_idx);
        let y_train: Vec<f64> = train_idx.iter().map(|&i| fit.targets[i]).collect();
        let x_test = fit
            .features
            .select_rows(&test_idx)
            .align_to(x_train.names());
        let y_test: Vec<f64> = test_idx.iter().map(|&i| fit.targets[i]).collect();

        let run_id = Uuid::new_v4();
        let schema_version = fit.state.schema.version;

        // Fit and score everything before touching the model directory.
        let mut fitted = Vec::new();
        let mut failed = Vec::new();
        for kind in &self.kinds {
            let name = kind.artifact_name();
            let result = TrainedModel::fit(
                *kind,
                &x_train,
                &y_train,
                &self.training,
                schema_version,
                run_id,
                now,
            )
            .and_then(|model| {
                let performance = score(&model, &x_test, &y_test)?;
                Ok((model, performance))
            });

            match result {
                Ok(pair) => fitted.push(pair),
                Err(e) => {
                    error!("❌ Error training model {}: {}", name, e);
                    failed.push((name.to_string(), e.to_string()));
                }
            }
        }

        if fitted.is_empty() {
            let reasons: Vec<String> = failed
                .iter()
                .map(|(model, reason)| format!("{}: {}", model, reason))
                .collect();
            return Err(PipelineError::Model {
                name: "all".to_string(),
                reason: reasons.join("; "),
            });
        }

        let mut state = fit.state;
        state.run_id = Some(run_id);
        self.artifacts.save_state(&state)?;

        let mut outcomes = Vec::with_capacity(self.kinds.len());
        for (model, performance) in fitted {
            let artifact = self.artifacts.save_model(&model)?;
            info!(
                "✅ {} model trained. RMSE={:.4}, R2={:.4}",
                model.name.to_uppercase(),
                performance.rmse,
                performance.r2
            );
            outcomes.push(ModelOutcome::Trained {
                performance,
                artifact,
            });
        }
        for (model, reason) in failed {
            // a previous run's artifact no longer matches the new state
            self.artifacts.remove_model(&model)?;
            outcomes.push(ModelOutcome::Failed { model, reason });
        }

        let rows_written: Vec<PerformanceRow> = outcomes
            .iter()
            .filter_map(|o| match o {
                ModelOutcome::Trained { performance, .. } => Some(performance.clone()),
                ModelOutcome::Failed { .. } => None,
            })
            .collect();
        let performance_path = self.artifacts.save_performance(&rows_written)?;

        let low = fit.prices.iter().copied().fold(f64::INFINITY, f64::min);
        let high = fit.prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        info!("🎯 Training run {} completed", run_id);
        Ok(TrainingReport {
            run_id,
            batch: batch.to_path_buf(),
            rows,
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            schema_version,
            price_range: (low, high),
            outcomes,
            performance_path,
        })
    }
}

fn score(model: &TrainedModel, x_test: &FeatureMatrix, y_test: &[f64]) -> Result<PerformanceRow> {
    let predictions = model.predict(x_test)?;
    let (rmse, r2) = regression_metrics(y_test, &predictions);
    Ok(PerformanceRow {
        model: model.name.clone(),
        rmse,
        r2,
    })
}

/// Root-mean-squared error and coefficient of determination.
pub fn regression_metrics(y_true: &[f64], y_pred: &[f64]) -> (f64, f64) {
    let y_true = y_true.to_vec();
    let y_pred = y_pred.to_vec();
    let mse: f64 = smartcore::metrics::mean_squared_error(&y_true, &y_pred);
    let r2: f64 = smartcore::metrics::r2(&y_true, &y_pred);
    (mse.sqrt(), r2)
}

/// Shuffle `0..n` with a fixed seed; the first `ceil(test_size * n)`
/// indices form the test split.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64) * test_size).ceil() as usize;
    let n_test = n_test.min(n);
    let train = indices.split_off(n_test);
    (train, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_split_sizes_and_disjointness() {
        let (train, test) = train_test_split(100, 0.2, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);

        let all: HashSet<usize> = train.iter().chain(test.iter()).copied().collect();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_split_is_reproducible() {
        assert_eq!(train_test_split(50, 0.2, 42), train_test_split(50, 0.2, 42));
        assert_ne!(train_test_split(50, 0.2, 42), train_test_split(50, 0.2, 7));
    }

    #[test]
    fn test_split_rounds_test_up() {
        let (train, test) = train_test_split(7, 0.2, 42);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 5);

        let (train, test) = train_test_split(1, 0.2, 42);
        assert!(train.is_empty());
        assert_eq!(test.len(), 1);
    }

    #[test]
    fn test_regression_metrics() {
        let y = vec![1.0, 2.0, 3.0, 4.0];
        let (rmse, r2) = regression_metrics(&y, &y);
        assert!(rmse.abs() < 1e-12);
        assert!((r2 - 1.0).abs() < 1e-12);

        let (rmse, r2) = regression_metrics(&y, &[2.0, 3.0, 4.0, 5.0]);
        assert!((rmse - 1.0).abs() < 1e-12);
        assert!((r2 - 0.2).abs() < 1e-12);
    }
}
