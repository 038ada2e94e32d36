use anyhow::{Context, Result};
use chrono::{Duration, Local};
use price_pipeline::analysis::{compare_competitors, MarketReport};
use price_pipeline::config::PipelineConfig;
use price_pipeline::ml::{InferenceContext, ModelOutcome, Trainer};
use price_pipeline::processor::RecordNormalizer;
use price_pipeline::storage::{read_batch, BatchStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::fs;
use uuid::Uuid;

const CATALOG: [(&str, f64); 8] = [
    ("Samsung Galaxy S25 Ultra 5G", 129_999.0),
    ("Samsung Galaxy S25 FE", 59_999.0),
    ("Samsung Galaxy M35", 17_999.0),
    ("Apple iPhone 16 Pro", 119_900.0),
    ("Apple iPhone 15", 69_900.0),
    ("OnePlus 13", 69_999.0),
    ("Vivo X200", 65_999.0),
    ("Redmi Note 14", 18_999.0),
];

/// Scraper-shaped records with the key variations real sources produce.
fn synthetic_records(count: usize, seed: u64) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    let now = Local::now().naive_local();

    (0..count)
        .map(|i| {
            let (title, base) = CATALOG.choose(&mut rng).copied().unwrap_or(CATALOG[0]);
            let price = base * rng.gen_range(0.9..1.1);
            let platform = if i % 2 == 0 { "Amazon" } else { "Flipkart" };
            let seen = now - Duration::days(rng.gen_range(0..30));

            let mut record = json!({
                "price": format!("₹{:.0}", price),
                "rating": format!("{:.1}", rng.gen_range(3.5..5.0)),
                "platform": platform,
                "timestamp": seen.format("%Y-%m-%d %H:%M:%S").to_string(),
            });
            // Flipkart scrapes use `name`/`link`
            if platform == "Flipkart" {
                record["name"] = json!(title);
                record["link"] = json!(format!("https://www.flipkart.com/p/{}", i));
            } else {
                record["title"] = json!(title);
                record["url"] = json!(format!("https://www.amazon.in/dp/{}", i));
            }
            record
        })
        .collect()
}

fn main() -> Result<()> {
    println!("=== FULL PIPELINE TEST ===\n");

    let workspace = std::env::temp_dir().join(format!("price-pipeline-demo-{}", Uuid::new_v4()));
    let mut config = PipelineConfig::default();
    config.paths.output_dir = workspace.join("outputs");
    config.paths.model_dir = workspace.join("model");
    config.training.n_trees = 50;

    println!("1. Generating synthetic scrape...");
    let raw = synthetic_records(120, 7);
    println!("   Raw records: {}", raw.len());

    println!("\n2. Normalizing and saving batch...");
    let now = Local::now().naive_local();
    let records = RecordNormalizer::new().normalize_all(&raw, now);
    let batch = BatchStore::from_config(&config.paths)
        .save(&records, now)?
        .context("Batch was empty")?;
    println!("   Batch file: {}", batch.display());

    println!("\n3. Training models...");
    let report = Trainer::new(&config).train_and_save()?;
    println!(
        "   {} rows ({} train / {} test), schema v{}",
        report.rows, report.train_rows, report.test_rows, report.schema_version
    );
    for outcome in &report.outcomes {
        match outcome {
            ModelOutcome::Trained { performance, .. } => println!(
                "   ✅ {}: RMSE={:.4} R2={:.4}",
                performance.model, performance.rmse, performance.r2
            ),
            ModelOutcome::Failed { model, reason } => println!("   ❌ {}: {}", model, reason),
        }
    }

    println!("\n4. Predicting...");
    let context = InferenceContext::load(config.paths.model_dir.clone())?;
    let requests = [
        json!({"title": "Samsung Galaxy S25 Ultra 5G", "platform": "Amazon", "rating": 4.5}),
        json!({"title": "Samsung Galaxy S25 FE", "platform": "Flipkart"}),
        json!({"title": "NONEXISTENTBRAND Phone X", "platform": "Meesho"}),
    ];
    for request in &requests {
        for model in context.model_names() {
            let price = context.predict(request, model)?;
            println!("   {} [{}]: ₹{:.2}", request["title"], model, price);
        }
    }

    println!("\n5. Market analysis...");
    let df = read_batch(&batch)?;
    let market = MarketReport::from_frame(&df)?;
    println!(
        "   Mean ₹{:.0}, median ₹{:.0}, volatility {:.2}%, confidence {:.1}%",
        market.mean,
        market.median,
        market.volatility(),
        market.confidence() * 100.0
    );
    let competitors = compare_competitors(&df)?;
    for row in competitors.iter().take(3) {
        println!("   {}: {}", row.representative_title, row.verdict);
    }

    println!("\n=== PIPELINE SUMMARY ===");
    println!("Price range seen in training: ₹{:.0} - ₹{:.0}", report.price_range.0, report.price_range.1);
    if report.failures().is_empty() {
        println!("✅ All models trained and served!");
    } else {
        println!("⚠️  {} model(s) failed", report.failures().len());
    }

    fs::remove_dir_all(&workspace).ok();
    Ok(())
}
