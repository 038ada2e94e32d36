use crate::error::{PipelineError, Result};
use crate::models::Platform;
use crate::processor::{quantile, PriceCleaner};
use crate::storage::write_atomic;
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const REPORT_FILE: &str = "pricing_analysis_report.txt";

/// Summary price statistics over one batch, plus the derived pricing
/// recommendations.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketReport {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    pub amazon_mean: Option<f64>,
    pub flipkart_mean: Option<f64>,
}

impl MarketReport {
    /// Compute over every row whose price cleans to a positive number.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        if df.column("price").is_err() {
            return Err(PipelineError::MissingColumn("price".to_string()));
        }
        let prices = PriceCleaner.clean_column(df, "price")?;

        let platforms: Vec<Option<String>> = match df.column("platform") {
            Ok(column) => column
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect(),
            Err(_) => vec![None; df.height()],
        };

        let observations: Vec<(f64, Platform)> = prices
            .into_iter()
            .zip(platforms)
            .filter_map(|(price, platform)| {
                let platform = platform.map_or(Platform::Unknown, |p| Platform::detect(&p));
                price.map(|p| (p, platform))
            })
            .collect();

        Self::from_observations(&observations)
    }

    pub fn from_observations(observations: &[(f64, Platform)]) -> Result<Self> {
        if observations.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let mut sorted: Vec<f64> = observations.iter().map(|(p, _)| *p).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / count as f64;

        let platform_mean = |platform: Platform| -> Option<f64> {
            let prices: Vec<f64> = observations
                .iter()
                .filter(|(_, p)| *p == platform)
                .map(|(price, _)| *price)
                .collect();
            if prices.is_empty() {
                None
            } else {
                Some(prices.iter().sum::<f64>() / prices.len() as f64)
            }
        };

        Ok(MarketReport {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            median: quantile(&sorted, 0.5).unwrap_or(mean),
            std: variance.sqrt(),
            amazon_mean: platform_mean(Platform::Amazon),
            flipkart_mean: platform_mean(Platform::Flipkart),
        })
    }

    /// Price range as a share of the mean, in percent.
    pub fn volatility(&self) -> f64 {
        (self.max - self.min) / self.mean * 100.0
    }

    /// Gap between the platform means as a share of the overall mean, in
    /// percent. `None` unless both platforms have prices.
    pub fn platform_bias(&self) -> Option<f64> {
        match (self.amazon_mean, self.flipkart_mean) {
            (Some(amazon), Some(flipkart)) => Some((amazon - flipkart).abs() / self.mean * 100.0),
            _ => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        (1.0 - self.std / self.mean).max(0.0)
    }

    pub fn penetration_price(&self) -> f64 {
        self.mean - 0.5 * self.std
    }

    pub fn competitive_price(&self) -> f64 {
        self.mean
    }

    pub fn premium_price(&self) -> f64 {
        self.mean + 0.5 * self.std
    }

    pub fn render(&self, source: &str, generated_at: NaiveDateTime) -> String {
        ReportView {
            report: self,
            source,
            generated_at,
        }
        .to_string()
    }

    /// Write the rendered report to `<output_dir>/pricing_analysis_report.txt`.
    pub fn save(&self, output_dir: &Path, source: &str, generated_at: NaiveDateTime) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(REPORT_FILE);
        write_atomic(&path, self.render(source, generated_at).as_bytes())?;
        info!("🧾 Report saved to: {}", path.display());
        Ok(path)
    }
}

/// Plain-text layout of a report for one source batch.
struct ReportView<'a> {
    report: &'a MarketReport,
    source: &'a str,
    generated_at: NaiveDateTime,
}

impl fmt::Display for ReportView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.report;
        let bias = r
            .platform_bias()
            .map_or_else(|| "N/A".to_string(), |b| format!("{:.2}%", b));

        writeln!(
            f,
            "Pricing Intelligence Report ({})",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "Source: {}\n", self.source)?;
        writeln!(f, "Listings: {}", r.count)?;
        writeln!(f, "Min Price: {}", rupees(r.min))?;
        writeln!(f, "Max Price: {}", rupees(r.max))?;
        writeln!(f, "Mean Price: {}", rupees(r.mean))?;
        writeln!(f, "Median Price: {}", rupees(r.median))?;
        writeln!(f, "Std Deviation: {}", rupees(r.std))?;
        writeln!(f, "Volatility Index: {:.2}%", r.volatility())?;
        writeln!(f, "Platform Bias: {}", bias)?;
        writeln!(f, "Confidence Index: {:.1}%\n", r.confidence() * 100.0)?;
        writeln!(f, "Price Recommendations:")?;
        writeln!(f, "  Penetration Strategy: {}", rupees(r.penetration_price()))?;
        writeln!(f, "  Competitive Strategy: {}", rupees(r.competitive_price()))?;
        writeln!(f, "  Premium Strategy: {}\n", rupees(r.premium_price()))?;
        writeln!(f, "Platform Averages:")?;
        writeln!(f, "  Amazon Mean: {}", optional_rupees(r.amazon_mean))?;
        writeln!(f, "  Flipkart Mean: {}", optional_rupees(r.flipkart_mean))
    }
}

/// Whole rupees with thousands separators, e.g. `₹129,999`.
pub fn rupees(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if rounded < 0.0 {
        format!("-₹{}", grouped)
    } else {
        format!("₹{}", grouped)
    }
}

fn optional_rupees(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), rupees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn report() -> MarketReport {
        let df = df!(
            "title" => ["A", "B", "C", "D", "E"],
            "price" => ["₹100", "₹200", "N/A", "₹300", "₹400"],
            "platform" => ["Amazon", "amazon.in", "Amazon", "Flipkart", "Flipkart"]
        )
        .unwrap();
        MarketReport::from_frame(&df).unwrap()
    }

    #[test]
    fn test_summary_statistics() {
        let report = report();
        assert_eq!(report.count, 4);
        assert_eq!(report.min, 100.0);
        assert_eq!(report.max, 400.0);
        assert_eq!(report.mean, 250.0);
        assert_eq!(report.median, 250.0);
        assert!((report.std - 12500.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(report.amazon_mean, Some(150.0));
        assert_eq!(report.flipkart_mean, Some(350.0));
    }

    #[test]
    fn test_derived_metrics() {
        let report = report();
        assert!((report.volatility() - 120.0).abs() < 1e-9);
        assert!((report.platform_bias().unwrap() - 80.0).abs() < 1e-9);

        let std = 12500.0_f64.sqrt();
        assert!((report.confidence() - (1.0 - std / 250.0)).abs() < 1e-12);
        assert!((report.penetration_price() - (250.0 - 0.5 * std)).abs() < 1e-9);
        assert_eq!(report.competitive_price(), 250.0);
        assert!((report.premium_price() - (250.0 + 0.5 * std)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_platform_has_no_bias() {
        let report = MarketReport::from_observations(&[
            (100.0, Platform::Amazon),
            (300.0, Platform::Unknown),
        ])
        .unwrap();
        assert_eq!(report.flipkart_mean, None);
        assert_eq!(report.platform_bias(), None);
    }

    #[test]
    fn test_confidence_floors_at_zero() {
        let report = MarketReport::from_observations(&[
            (1.0, Platform::Amazon),
            (1.0, Platform::Amazon),
            (1000.0, Platform::Flipkart),
        ])
        .unwrap();
        assert_eq!(report.confidence(), 0.0);
    }

    #[test]
    fn test_no_valid_prices() {
        let df = df!("title" => ["A"], "price" => ["N/A"]).unwrap();
        assert!(matches!(
            MarketReport::from_frame(&df),
            Err(PipelineError::EmptyBatch)
        ));
    }

    #[test]
    fn test_rupee_formatting() {
        assert_eq!(rupees(0.0), "₹0");
        assert_eq!(rupees(999.4), "₹999");
        assert_eq!(rupees(80999.0), "₹80,999");
        assert_eq!(rupees(129999.6), "₹130,000");
        assert_eq!(rupees(-1500.0), "-₹1,500");
    }

    #[test]
    fn test_render_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let at = NaiveDate::from_ymd_opt(2025, 6, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        let path = report().save(dir.path(), "batch.csv", at).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("Pricing Intelligence Report (2025-06-10 12:00:00)"));
        assert!(text.contains("Mean Price: ₹250"));
        assert!(text.contains("Volatility Index: 120.00%"));
        assert!(text.contains("Flipkart Mean: ₹350"));
    }

    #[test]
    fn test_render_layout() {
        let at = NaiveDate::from_ymd_opt(2025, 6, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let text = report().render("batch.csv", at);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[1], "Source: batch.csv");
        assert_eq!(lines[2], "");
        assert_eq!(lines[10], "Platform Bias: 80.00%");
        assert_eq!(lines[13], "Price Recommendations:");
        assert!(text.ends_with("Flipkart Mean: ₹350\n"));
    }
}
