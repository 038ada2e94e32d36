use crate::error::Result;
use polars::prelude::*;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

static NUMBER_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid price pattern"));

/// Turns scraped price text such as `"₹ 80,999.00"` into a number.
pub struct PriceCleaner;

impl PriceCleaner {
    /// First numeric run after dropping thousands separators. Only strictly
    /// positive prices are accepted.
    pub fn clean(&self, raw: &str) -> Option<f64> {
        let cleaned = raw.replace(',', "");

        let captures = NUMBER_RUN.captures(&cleaned)?;
        let value = f64::from_str(captures.get(1)?.as_str()).ok()?;

        if value.is_finite() && value > 0.0 {
            Some(value)
        } else {
            None
        }
    }

    /// Clean a whole column, reading it as text whatever its dtype.
    pub fn clean_column(&self, df: &DataFrame, col_name: &str) -> Result<Vec<Option<f64>>> {
        let column = df.column(col_name)?.cast(&DataType::String)?;
        let cleaned = column
            .str()?
            .into_iter()
            .map(|value| value.and_then(|s| self.clean(s)))
            .collect();
        Ok(cleaned)
    }
}

/// Linear-interpolated quantile of already sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Clamp prices into the `[lower_q, upper_q]` quantile band of the batch and
/// return the band.
pub fn clip_outliers(prices: &mut [f64], lower_q: f64, upper_q: f64) -> Option<(f64, f64)> {
    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let low = quantile(&sorted, lower_q)?;
    let high = quantile(&sorted, upper_q)?;

    for price in prices.iter_mut() {
        *price = price.clamp(low, high);
    }

    Some((low, high))
}
