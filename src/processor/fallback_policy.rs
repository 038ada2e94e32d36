//! Every default the feature transform is allowed to substitute.
//!
//! | input                              | fallback                            |
//! |------------------------------------|-------------------------------------|
//! | title without a leading token      | brand `UNKNOWN`                     |
//! | brand absent from the brand table  | batch global mean price, std 0      |
//! | platform not seen at fit time      | all-zero indicator columns          |
//! | rating absent or not a number      | 0                                   |
//! | timestamp absent, garbled, future  | processing time (days_since = 0)    |
//!
//! Anything else that is missing is an error.

use crate::processor::encoders::{BrandStat, BrandTable, PlatformEncoder};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

static BRAND_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9]+)").expect("valid brand pattern"));

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPolicy {
    pub unknown_brand: String,
    pub default_rating: f64,
    pub unknown_brand_std: f64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            unknown_brand: "UNKNOWN".to_string(),
            default_rating: 0.0,
            unknown_brand_std: 0.0,
        }
    }
}

impl FallbackPolicy {
    /// Leading alphanumeric token of the title, upper-cased.
    pub fn brand(&self, title: &str) -> String {
        BRAND_TOKEN
            .captures(title.trim_start())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase())
            .unwrap_or_else(|| self.unknown_brand.clone())
    }

    pub fn rating(&self, raw: &str) -> f64 {
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite())
            .unwrap_or(self.default_rating)
    }

    /// Whole days between `raw` and `now`, never negative.
    pub fn days_since(&self, raw: &str, now: NaiveDateTime) -> f64 {
        match parse_timestamp(raw) {
            Some(ts) => (now - ts).num_days().max(0) as f64,
            None => 0.0,
        }
    }

    pub fn brand_stats(&self, table: &BrandTable, brand: &str) -> BrandStat {
        table.get(brand).copied().unwrap_or(BrandStat {
            mean: table.global_mean,
            std: self.unknown_brand_std,
        })
    }

    pub fn platform_indicators(&self, encoder: &PlatformEncoder, platform: &str) -> Vec<f64> {
        encoder.transform(platform)
    }
}

/// Accepts batch timestamps, RFC 3339 and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
