use crate::error::Result;
use crate::models::Platform;
use crate::processor::{FeatureEngineer, PriceCleaner};
use crate::storage::write_atomic;
use polars::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;

pub const COMPETITOR_FILE: &str = "competitor_analysis.csv";

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9 ]").expect("valid title filter"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    AmazonCheaper(f64),
    FlipkartCheaper(f64),
    SamePrice,
    Incomplete,
}

impl Verdict {
    /// Percentages are relative to the dearer platform.
    pub fn between(amazon: Option<f64>, flipkart: Option<f64>) -> Verdict {
        match (amazon, flipkart) {
            (Some(a), Some(f)) if a < f => Verdict::AmazonCheaper((f - a) / f * 100.0),
            (Some(a), Some(f)) if f < a => Verdict::FlipkartCheaper((a - f) / a * 100.0),
            (Some(_), Some(_)) => Verdict::SamePrice,
            _ => Verdict::Incomplete,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::AmazonCheaper(pct) => write!(f, "Amazon cheaper by {:.2}%", pct),
            Verdict::FlipkartCheaper(pct) => write!(f, "Flipkart cheaper by {:.2}%", pct),
            Verdict::SamePrice => f.write_str("Same price"),
            Verdict::Incomplete => f.write_str("Incomplete data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorRow {
    pub normalized_title: String,
    pub amazon_mean: Option<f64>,
    pub flipkart_mean: Option<f64>,
    pub verdict: Verdict,
    pub representative_title: String,
}

pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let kept = NON_WORD.replace_all(&lower, "");
    WHITESPACE.replace_all(&kept, " ").trim().to_string()
}

#[derive(Default)]
struct TitleGroup {
    amazon: Vec<f64>,
    flipkart: Vec<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Per-product price comparison between the two marketplaces. Listings are
/// grouped by normalized title and only priced rows feed the means. The
/// representative title is the last listing of the group, priced or not.
pub fn compare_competitors(df: &DataFrame) -> Result<Vec<CompetitorRow>> {
    let records = FeatureEngineer::default().records_from_frame(df)?;
    let cleaner = PriceCleaner;

    let mut last_titles: BTreeMap<String, &str> = BTreeMap::new();
    let mut groups: BTreeMap<String, TitleGroup> = BTreeMap::new();
    for record in &records {
        let key = normalize_title(&record.title);
        last_titles.insert(key.clone(), &record.title);

        let Some(price) = cleaner.clean(&record.price) else {
            continue;
        };
        let group = groups.entry(key).or_default();
        match Platform::from_label(&record.platform) {
            Platform::Amazon => group.amazon.push(price),
            Platform::Flipkart => group.flipkart.push(price),
            Platform::Unknown => {}
        }
    }

    let rows: Vec<CompetitorRow> = groups
        .into_iter()
        .map(|(normalized_title, group)| {
            let representative_title = last_titles
                .get(&normalized_title)
                .map(|t| t.to_string())
                .unwrap_or_default();
            let amazon_mean = mean(&group.amazon);
            let flipkart_mean = mean(&group.flipkart);
            CompetitorRow {
                normalized_title,
                amazon_mean,
                flipkart_mean,
                verdict: Verdict::between(amazon_mean, flipkart_mean),
                representative_title,
            }
        })
        .collect();

    info!(
        "🔍 Compared {} products across platforms ({} with both prices)",
        rows.len(),
        rows.iter()
            .filter(|r| r.verdict != Verdict::Incomplete)
            .count()
    );
    Ok(rows)
}

pub fn competitors_to_dataframe(rows: &[CompetitorRow]) -> Result<DataFrame> {
    Ok(df!(
        "normalized_title" => rows.iter().map(|r| r.normalized_title.as_str()).collect::<Vec<_>>(),
        "Amazon" => rows.iter().map(|r| r.amazon_mean).collect::<Vec<_>>(),
        "Flipkart" => rows.iter().map(|r| r.flipkart_mean).collect::<Vec<_>>(),
        "Comparison" => rows.iter().map(|r| r.verdict.to_string()).collect::<Vec<_>>(),
        "representative_title" => rows.iter().map(|r| r.representative_title.as_str()).collect::<Vec<_>>()
    )?)
}

/// Write the table to `<output_dir>/competitor_analysis.csv`.
pub fn save_competitor_table(rows: &[CompetitorRow], output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(COMPETITOR_FILE);

    let mut frame = competitors_to_dataframe(rows)?;
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .finish(&mut frame)?;
    write_atomic(&path, &buf)?;

    info!("📁 Competitor analysis saved to {}", path.display());
    Ok(path)
}
