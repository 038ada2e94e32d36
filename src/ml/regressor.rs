use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use crate::models::{missing_columns, FeatureMatrix};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::linear_regression::{
    LinearRegression, LinearRegressionParameters, LinearRegressionSolverName,
};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;
use uuid::Uuid;

type Matrix = DenseMatrix<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegressorKind {
    RandomForest,
    Linear,
}

impl RegressorKind {
    pub const ALL: [RegressorKind; 2] = [RegressorKind::RandomForest, RegressorKind::Linear];

    /// Short name used for artifact files and the performance table.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            RegressorKind::RandomForest => "rf",
            RegressorKind::Linear => "lr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.artifact_name() == name)
    }
}

#[derive(Serialize, Deserialize)]
enum FittedRegressor {
    RandomForest(RandomForestRegressor<f64, f64, Matrix, Vec<f64>>),
    Linear(LinearRegression<f64, f64, Matrix, Vec<f64>>),
}

impl FittedRegressor {
    /// smartcore panics on some degenerate inputs instead of returning
    /// `Failed`; a panic is reported as a model error.
    fn fit(kind: RegressorKind, x: &Matrix, y: &Vec<f64>, params: &TrainingConfig) -> Result<Self> {
        panic::catch_unwind(AssertUnwindSafe(|| Self::fit_inner(kind, x, y, params))).unwrap_or_else(
            |payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "solver panicked".to_string());
                Err(PipelineError::Model {
                    name: kind.artifact_name().to_string(),
                    reason,
                })
            },
        )
    }

    fn fit_inner(kind: RegressorKind, x: &Matrix, y: &Vec<f64>, params: &TrainingConfig) -> Result<Self> {
        let failed = |e: smartcore::error::Failed| PipelineError::Model {
            name: kind.artifact_name().to_string(),
            reason: e.to_string(),
        };

        match kind {
            RegressorKind::RandomForest => {
                let mut parameters = RandomForestRegressorParameters::default()
                    .with_n_trees(params.n_trees)
                    .with_seed(params.seed);
                if let Some(depth) = params.max_depth {
                    parameters = parameters.with_max_depth(depth);
                }
                let model = RandomForestRegressor::fit(x, y, parameters).map_err(failed)?;
                Ok(FittedRegressor::RandomForest(model))
            }
            RegressorKind::Linear => {
                let parameters = LinearRegressionParameters::default()
                    .with_solver(LinearRegressionSolverName::SVD);
                let model = LinearRegression::fit(x, y, parameters).map_err(failed)?;
                Ok(FittedRegressor::Linear(model))
            }
        }
    }

    fn predict(&self, x: &Matrix) -> std::result::Result<Vec<f64>, smartcore::error::Failed> {
        match self {
            FittedRegressor::RandomForest(model) => model.predict(x),
            FittedRegressor::Linear(model) => model.predict(x),
        }
    }
}

/// A fitted log-price regressor plus the feature layout it was trained on.
#[derive(Serialize, Deserialize)]
pub struct TrainedModel {
    pub name: String,
    pub feature_names: Vec<String>,
    pub schema_version: u32,
    pub run_id: Uuid,
    pub trained_at: NaiveDateTime,
    regressor: FittedRegressor,
}

impl TrainedModel {
    pub fn fit(
        kind: RegressorKind,
        features: &FeatureMatrix,
        targets: &[f64],
        params: &TrainingConfig,
        schema_version: u32,
        run_id: Uuid,
        trained_at: NaiveDateTime,
    ) -> Result<Self> {
        if features.nrows() == 0 || features.nrows() != targets.len() {
            return Err(PipelineError::Model {
                name: kind.artifact_name().to_string(),
                reason: format!(
                    "{} feature rows for {} targets",
                    features.nrows(),
                    targets.len()
                ),
            });
        }

        // least squares with an intercept needs more rows than columns
        if kind == RegressorKind::Linear && features.nrows() <= features.ncols() {
            return Err(PipelineError::Model {
                name: kind.artifact_name().to_string(),
                reason: format!(
                    "{} rows are too few for {} features plus intercept",
                    features.nrows(),
                    features.ncols()
                ),
            });
        }

        let regressor =
            FittedRegressor::fit(kind, &features.to_dense(), &targets.to_vec(), params)?;

        Ok(TrainedModel {
            name: kind.artifact_name().to_string(),
            feature_names: features.names().to_vec(),
            schema_version,
            run_id,
            trained_at,
            regressor,
        })
    }

    pub fn kind(&self) -> RegressorKind {
        match self.regressor {
            FittedRegressor::RandomForest(_) => RegressorKind::RandomForest,
            FittedRegressor::Linear(_) => RegressorKind::Linear,
        }
    }

    /// Predict `log1p(price)` per row. Rows are first reindexed to the
    /// training layout, zero-filling columns the input lacks.
    pub fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let missing = missing_columns(features.names(), &self.feature_names);
        if !missing.is_empty() {
            warn!(
                "{} model: zero-filling {} absent feature(s) {:?}",
                self.name,
                missing.len(),
                missing
            );
        }

        let aligned = features.align_to(&self.feature_names);
        let predictions = self
            .regressor
            .predict(&aligned.to_dense())
            .map_err(|e| PipelineError::PredictionError(e.to_string()))?;

        if let Some(bad) = predictions.iter().find(|p| !p.is_finite()) {
            return Err(PipelineError::PredictionError(format!(
                "{} model produced a non-finite value ({})",
                self.name, bad
            )));
        }
        Ok(predictions)
    }
}

impl fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedModel")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("feature_names", &self.feature_names)
            .field("schema_version", &self.schema_version)
            .field("run_id", &self.run_id)
            .field("trained_at", &self.trained_at)
            .finish()
    }
}
