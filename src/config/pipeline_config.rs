use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "src/configs/pipeline.toml";
pub const ENV_PREFIX: &str = "PRICE_PIPELINE";

/// Top-level configuration for the pricing pipeline.
///
/// Layers, lowest priority first: built-in defaults, the TOML file,
/// `PRICE_PIPELINE__<SECTION>__<KEY>` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub training: TrainingConfig,
    pub outliers: OutlierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
    pub model_dir: PathBuf,
    pub batch_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_size: f64,
    pub seed: u64,
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub encoder_policy: EncoderPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub lower_quantile: f64,
    pub upper_quantile: f64,
}

/// Whether the platform categories are refit on every training run or
/// reused from the previously persisted encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPolicy {
    #[default]
    Refit,
    Frozen,
}

impl PipelineConfig {
    /// Load the layered configuration. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.test_size must be in (0, 1), got {}",
                self.training.test_size
            )));
        }

        if self.training.n_trees == 0 {
            return Err(PipelineError::Config(
                "training.n_trees must be at least 1".to_string(),
            ));
        }

        let OutlierConfig {
            lower_quantile,
            upper_quantile,
        } = self.outliers;
        if !(0.0..=1.0).contains(&lower_quantile)
            || !(0.0..=1.0).contains(&upper_quantile)
            || lower_quantile > upper_quantile
        {
            return Err(PipelineError::Config(format!(
                "outlier quantiles must satisfy 0 <= lower <= upper <= 1, got {} / {}",
                lower_quantile, upper_quantile
            )));
        }

        if self.paths.batch_prefix.is_empty() {
            return Err(PipelineError::Config(
                "paths.batch_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            model_dir: PathBuf::from("model"),
            batch_prefix: "scraped_results_".to_string(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            n_trees: 100,
            max_depth: None,
            encoder_policy: EncoderPolicy::Refit,
        }
    }
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            lower_quantile: 0.01,
            upper_quantile: 0.99,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.paths.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.paths.model_dir, PathBuf::from("model"));
        assert_eq!(config.paths.batch_prefix, "scraped_results_");
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.n_trees, 100);
        assert_eq!(config.training.encoder_policy, EncoderPolicy::Refit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_layer() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[paths]\nmodel_dir = \"artifacts\"\n\n[training]\nencoder_policy = \"frozen\""
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.paths.model_dir, PathBuf::from("artifacts"));
        assert_eq!(config.training.encoder_policy, EncoderPolicy::Frozen);
        // untouched keys keep their defaults
        assert_eq!(config.paths.batch_prefix, "scraped_results_");
        assert_eq!(config.outliers.upper_quantile, 0.99);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            env::set_var("PRICE_PIPELINE__TRAINING__SEED", "7");
        }

        let config = PipelineConfig::load(Some(Path::new("does/not/exist.toml"))).unwrap();
        assert_eq!(config.training.seed, 7);

        unsafe {
            env::remove_var("PRICE_PIPELINE__TRAINING__SEED");
        }
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut config = PipelineConfig::default();
        config.training.test_size = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.outliers.lower_quantile = 0.9;
        config.outliers.upper_quantile = 0.1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.n_trees = 0;
        assert!(config.validate().is_err());
    }
}
