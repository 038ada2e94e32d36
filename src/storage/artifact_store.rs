use crate::error::{PipelineError, Result};
use crate::ml::{PerformanceRow, TrainedModel};
use crate::models::FeatureSchema;
use crate::processor::{BrandTable, PlatformEncoder, PreprocessState, StandardScaler};
use crate::storage::write_atomic;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

pub const ENCODER_FILE: &str = "platform_encoder.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const BRAND_STATS_FILE: &str = "brand_stats.csv";
pub const PERFORMANCE_FILE: &str = "model_performance.csv";
const MODEL_SUFFIX: &str = "_model.json";

/// Contents of `scaler.json`: the scaler, the columns it scales, and the
/// batch-wide price mean used for unknown brands.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalerArtifact {
    scaler: StandardScaler,
    columns: Vec<String>,
    global_mean_price: f64,
    schema_version: u32,
    #[serde(default)]
    run_id: Option<Uuid>,
}

/// Fixed-name artifacts under the model directory.
pub struct ArtifactStore {
    model_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        ArtifactStore {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.model_dir.join(file_name)
    }

    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.path(&format!("{}{}", model_name, MODEL_SUFFIX))
    }

    /// Persist the encoder, scaler with its column list, and brand table.
    pub fn save(
        &self,
        encoder: &PlatformEncoder,
        scaler: &StandardScaler,
        numeric_columns: &[String],
        brand_table: &BrandTable,
    ) -> Result<()> {
        self.write_state(encoder, scaler, numeric_columns, brand_table, None)
    }

    /// Like [`save`](Self::save), also recording the run that produced the state.
    pub fn save_state(&self, state: &PreprocessState) -> Result<()> {
        self.write_state(
            &state.encoder,
            &state.scaler,
            &state.numeric_columns,
            &state.brand_table,
            state.run_id,
        )
    }

    fn write_state(
        &self,
        encoder: &PlatformEncoder,
        scaler: &StandardScaler,
        numeric_columns: &[String],
        brand_table: &BrandTable,
        run_id: Option<Uuid>,
    ) -> Result<()> {
        fs::create_dir_all(&self.model_dir)?;

        let encoder_path = self.path(ENCODER_FILE);
        write_atomic(&encoder_path, &serde_json::to_vec_pretty(encoder)?)?;

        let scaler_path = self.path(SCALER_FILE);
        let artifact = ScalerArtifact {
            scaler: scaler.clone(),
            columns: numeric_columns.to_vec(),
            global_mean_price: brand_table.global_mean,
            schema_version: encoder.schema_version,
            run_id,
        };
        write_atomic(&scaler_path, &serde_json::to_vec_pretty(&artifact)?)?;

        let brand_path = self.path(BRAND_STATS_FILE);
        let mut frame = brand_table.to_dataframe()?;
        let mut buf = Vec::new();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .finish(&mut frame)?;
        write_atomic(&brand_path, &buf)?;

        info!(
            "💾 Saved preprocessing state (schema v{}, {} brands) to {}",
            encoder.schema_version,
            brand_table.len(),
            self.model_dir.display()
        );
        Ok(())
    }

    /// Load the full preprocessing state. Every artifact is required.
    pub fn load(&self) -> Result<PreprocessState> {
        let encoder_path = self.require(ENCODER_FILE)?;
        let scaler_path = self.require(SCALER_FILE)?;
        let brand_path = self.require(BRAND_STATS_FILE)?;

        let encoder: PlatformEncoder = serde_json::from_slice(&fs::read(&encoder_path)?)?;
        let artifact: ScalerArtifact = serde_json::from_slice(&fs::read(&scaler_path)?)?;

        if artifact.schema_version != encoder.schema_version {
            return Err(PipelineError::StaleArtifact {
                path: scaler_path,
                expected: encoder.schema_version,
                found: artifact.schema_version,
            });
        }

        let brand_frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(brand_path))?
            .finish()?;
        let mut brand_table = BrandTable::from_dataframe(&brand_frame)?;
        brand_table.global_mean = artifact.global_mean_price;

        let schema = FeatureSchema::for_platforms(encoder.schema_version, &encoder.categories);
        debug!(
            "Loaded preprocessing state: schema v{} with {} columns",
            schema.version,
            schema.len()
        );

        Ok(PreprocessState {
            schema,
            encoder,
            scaler: artifact.scaler,
            numeric_columns: artifact.columns,
            brand_table,
            run_id: artifact.run_id,
        })
    }

    /// Previously persisted encoder, if any.
    pub fn load_encoder(&self) -> Result<Option<PlatformEncoder>> {
        let path = self.path(ENCODER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(&path)?)?))
    }

    fn require(&self, file_name: &str) -> Result<PathBuf> {
        let path = self.path(file_name);
        if path.exists() {
            Ok(path)
        } else {
            Err(PipelineError::MissingArtifact(path))
        }
    }

    pub fn save_model(&self, model: &TrainedModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.model_dir)?;
        let path = self.model_path(&model.name);
        write_atomic(&path, &serde_json::to_vec(model)?)?;
        info!("💾 {} model saved to {}", model.name.to_uppercase(), path.display());
        Ok(path)
    }

    pub fn load_model(&self, model_name: &str) -> Result<TrainedModel> {
        let path = self.model_path(model_name);
        if !path.exists() {
            return Err(PipelineError::ModelNotFound(path.display().to_string()));
        }
        Ok(serde_json::from_slice(&fs::read(&path)?)?)
    }

    /// Delete `<name>_model.json` if present.
    pub fn remove_model(&self, model_name: &str) -> Result<bool> {
        let path = self.model_path(model_name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!("🗑️ Removed outdated {} model at {}", model_name.to_uppercase(), path.display());
        Ok(true)
    }

    /// Names of every `<name>_model.json` present.
    pub fn available_models(&self) -> Result<Vec<String>> {
        if !self.model_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.model_dir)? {
            let path = entry?.path();
            if let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(MODEL_SUFFIX))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Overwrite `model_performance.csv` with one row per model.
    pub fn save_performance(&self, rows: &[PerformanceRow]) -> Result<PathBuf> {
        fs::create_dir_all(&self.model_dir)?;

        let mut frame = df!(
            "Model" => rows.iter().map(|r| r.model.as_str()).collect::<Vec<_>>(),
            "RMSE" => rows.iter().map(|r| r.rmse).collect::<Vec<_>>(),
            "R2" => rows.iter().map(|r| r.r2).collect::<Vec<_>>()
        )?;

        let path = self.path(PERFORMANCE_FILE);
        let mut buf = Vec::new();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .finish(&mut frame)?;
        write_atomic(&path, &buf)?;

        info!("📈 Model performance saved to {}", path.display());
        Ok(path)
    }

    pub fn load_performance(&self) -> Result<Vec<PerformanceRow>> {
        let path = self.require(PERFORMANCE_FILE)?;
        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path))?
            .finish()?;

        let text = |name: &str| -> Result<Vec<String>> {
            let column = frame
                .column(name)
                .map_err(|_| PipelineError::MissingColumn(name.to_string()))?;
            Ok(column
                .str()?
                .into_iter()
                .map(|v| v.unwrap_or_default().to_string())
                .collect())
        };
        let number = |s: &String| s.trim().parse::<f64>().unwrap_or(f64::NAN);

        let models = text("Model")?;
        let rmse = text("RMSE")?;
        let r2 = text("R2")?;

        Ok(models
            .into_iter()
            .zip(rmse.iter().zip(r2.iter()))
            .map(|(model, (rmse, r2))| PerformanceRow {
                model,
                rmse: number(rmse),
                r2: number(r2),
            })
            .collect())
    }
}
