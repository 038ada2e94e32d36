use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use price_pipeline::analysis::{compare_competitors, save_competitor_table, MarketReport};
use price_pipeline::config::PipelineConfig;
use price_pipeline::ml::{InferenceContext, ModelOutcome, RegressorKind, Trainer};
use price_pipeline::processor::RecordNormalizer;
use price_pipeline::storage::{read_batch, BatchStore};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "price-pipeline",
    about = "Normalize scraped listings, train price models and score new products"
)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "PRICE_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize a JSON array of scraped records into a new batch file
    Ingest {
        /// Path to the raw JSON array
        input: PathBuf,
    },
    /// Train every regressor on the latest batch
    Train,
    /// Predict the price of one product
    Predict {
        #[arg(long)]
        title: String,

        #[arg(long)]
        platform: Option<String>,

        #[arg(long)]
        rating: Option<f64>,

        /// Capture time, e.g. "2025-06-01 10:00:00"
        #[arg(long)]
        timestamp: Option<String>,

        /// Model to use (rf or lr)
        #[arg(long, default_value = "rf")]
        model: String,
    },
    /// Market report and competitor comparison for a batch
    Analyze {
        /// Batch file; defaults to the most recent one
        #[arg(long)]
        batch: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Load environment variables before reading RUST_LOG and config overrides
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())
        .context("Failed to load pipeline configuration")?;

    info!(
        "Loaded configuration: outputs in {}, models in {}",
        config.paths.output_dir.display(),
        config.paths.model_dir.display()
    );

    match cli.command {
        Command::Ingest { input } => ingest(&config, input),
        Command::Train => train(&config),
        Command::Predict {
            title,
            platform,
            rating,
            timestamp,
            model,
        } => predict(&config, title, platform, rating, timestamp, &model),
        Command::Analyze { batch } => analyze(&config, batch),
    }
}

fn ingest(config: &PipelineConfig, input: PathBuf) -> Result<()> {
    info!("🚀 Ingesting raw records from {}", input.display());

    let text = fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let raw: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", input.display()))?;
    let Value::Array(items) = raw else {
        bail!("{} must contain a JSON array of records", input.display());
    };

    let now = Local::now().naive_local();
    let records = RecordNormalizer::new().normalize_all(&items, now);

    match BatchStore::from_config(&config.paths).save(&records, now)? {
        Some(path) => info!("✅ Batch written to {}", path.display()),
        None => warn!("⚠️ Nothing to save from {}", input.display()),
    }
    Ok(())
}

fn train(config: &PipelineConfig) -> Result<()> {
    info!("🚀 Starting training run");

    let report = Trainer::new(config)
        .train_and_save()
        .context("Training failed")?;

    info!("\n=== Training Summary (run {}) ===", report.run_id);
    info!("📂 Batch: {}", report.batch.display());
    info!(
        "📊 {} rows ({} train / {} test), schema v{}",
        report.rows, report.train_rows, report.test_rows, report.schema_version
    );
    for outcome in &report.outcomes {
        match outcome {
            ModelOutcome::Trained {
                performance,
                artifact,
            } => info!(
                "✅ {}: RMSE={:.4} R2={:.4} -> {}",
                performance.model,
                performance.rmse,
                performance.r2,
                artifact.display()
            ),
            ModelOutcome::Failed { model, reason } => error!("❌ {}: {}", model, reason),
        }
    }

    if report.performance().is_empty() {
        bail!("No model was trained successfully");
    }
    info!("🎉 Training completed, performance table at {}", report.performance_path.display());
    Ok(())
}

fn predict(
    config: &PipelineConfig,
    title: String,
    platform: Option<String>,
    rating: Option<f64>,
    timestamp: Option<String>,
    model: &str,
) -> Result<()> {
    if RegressorKind::from_name(model).is_none() {
        warn!("⚠️ '{}' is not a built-in model name", model);
    }

    let mut fields = Map::new();
    fields.insert("title".to_string(), Value::from(title.clone()));
    if let Some(platform) = platform {
        fields.insert("platform".to_string(), Value::from(platform));
    }
    if let Some(rating) = rating {
        fields.insert("rating".to_string(), Value::from(rating));
    }
    if let Some(timestamp) = timestamp {
        fields.insert("timestamp".to_string(), Value::from(timestamp));
    }

    let context = InferenceContext::load(config.paths.model_dir.clone())
        .context("Failed to load model artifacts; run `price-pipeline train` first")?;
    let price = context
        .predict(&Value::Object(fields), model)
        .with_context(|| format!("Prediction with model '{}' failed", model))?;

    info!("💰 Predicted price for '{}' ({}): ₹{:.2}", title, model, price);
    println!("{:.2}", price);
    Ok(())
}

fn analyze(config: &PipelineConfig, batch: Option<PathBuf>) -> Result<()> {
    let batch = match batch {
        Some(path) => path,
        None => BatchStore::from_config(&config.paths)
            .latest_batch()
            .context("No batch to analyze")?,
    };
    info!("📂 Using batch file: {}", batch.display());

    let df = read_batch(&batch).with_context(|| format!("Failed to read {}", batch.display()))?;
    let output_dir = &config.paths.output_dir;
    let source = batch
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let report = MarketReport::from_frame(&df).context("Market report failed")?;
    report.save(output_dir, &source, Local::now().naive_local())?;
    info!(
        "📊 Mean ₹{:.0}, median ₹{:.0}, volatility {:.2}%",
        report.mean,
        report.median,
        report.volatility()
    );

    match compare_competitors(&df) {
        Ok(rows) => {
            save_competitor_table(&rows, output_dir)?;
        }
        Err(e) => warn!("⚠️ Competitor comparison skipped: {}", e),
    }

    info!("🎉 Analysis completed");
    Ok(())
}
