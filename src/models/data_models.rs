use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timestamp layout used in batch files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column order of a batch file.
pub const BATCH_COLUMNS: [&str; 6] = ["title", "price", "rating", "url", "platform", "timestamp"];

/// A listing as produced by one of the scrapers. Key names differ between
/// sources (`title`/`name`, `url`/`link`), so the record is kept as a field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        RawRecord(fields)
    }

    /// Returns `None` unless the value is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(RawRecord(fields)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Field rendered as text. Null and blank strings count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        let rendered = match self.0.get(key)? {
            Value::Null => return None,
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                _ => n.to_string(),
            },
            other => other.to_string(),
        };

        if rendered.is_empty() {
            None
        } else {
            Some(rendered)
        }
    }
}

/// Canonical listing row persisted in a batch file. Price and rating are
/// kept exactly as scraped; cleaning happens at feature time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub title: String,
    pub price: String,
    pub rating: String,
    pub url: String,
    pub platform: String,
    pub timestamp: String,
}

impl NormalizedRecord {
    pub fn captured_at(now: NaiveDateTime) -> String {
        now.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Known marketplaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Amazon,
    Flipkart,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Amazon => "Amazon",
            Platform::Flipkart => "Flipkart",
            Platform::Unknown => "Unknown",
        }
    }

    /// Exact, case-insensitive match on the platform label.
    pub fn from_label(label: &str) -> Platform {
        match label.trim().to_lowercase().as_str() {
            "amazon" => Platform::Amazon,
            "flipkart" => Platform::Flipkart,
            _ => Platform::Unknown,
        }
    }

    /// Looser match used by reports: the label only has to mention the platform.
    pub fn detect(label: &str) -> Platform {
        let lower = label.to_lowercase();
        if lower.contains("amazon") {
            Platform::Amazon
        } else if lower.contains("flipkart") {
            Platform::Flipkart
        } else {
            Platform::Unknown
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
