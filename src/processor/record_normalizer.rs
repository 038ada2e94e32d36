use crate::models::{NormalizedRecord, RawRecord};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

pub const DEFAULT_TEXT: &str = "N/A";
pub const DEFAULT_PLATFORM: &str = "Unknown";

/// Maps scraper output onto [`NormalizedRecord`]. Each canonical field has
/// an ordered list of source keys; the first present key wins.
pub struct RecordNormalizer {
    field_aliases: HashMap<String, Vec<String>>,
}

impl RecordNormalizer {
    pub fn new() -> Self {
        let mut field_aliases = HashMap::new();

        field_aliases.insert(
            "title".to_string(),
            vec!["title".to_string(), "name".to_string()],
        );
        field_aliases.insert("price".to_string(), vec!["price".to_string()]);
        field_aliases.insert("rating".to_string(), vec!["rating".to_string()]);
        field_aliases.insert(
            "url".to_string(),
            vec!["url".to_string(), "link".to_string()],
        );
        field_aliases.insert("platform".to_string(), vec!["platform".to_string()]);
        field_aliases.insert("timestamp".to_string(), vec!["timestamp".to_string()]);

        RecordNormalizer { field_aliases }
    }

    /// Register another source key for a canonical field, tried after the existing ones.
    pub fn add_field_alias(&mut self, canonical: &str, alias: &str) {
        self.field_aliases
            .entry(canonical.to_string())
            .or_default()
            .push(alias.to_string());
    }

    fn lookup(&self, record: &RawRecord, canonical: &str) -> Option<String> {
        self.field_aliases
            .get(canonical)?
            .iter()
            .find_map(|key| record.text(key))
    }

    /// Normalize one scraped record, stamping it with `now`.
    pub fn normalize(&self, record: &RawRecord, now: NaiveDateTime) -> NormalizedRecord {
        NormalizedRecord {
            title: self
                .lookup(record, "title")
                .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            price: self.lookup(record, "price").unwrap_or_default(),
            rating: self.lookup(record, "rating").unwrap_or_default(),
            url: self
                .lookup(record, "url")
                .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            platform: self
                .lookup(record, "platform")
                .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            timestamp: NormalizedRecord::captured_at(now),
        }
    }

    /// Normalize a prediction request. Unlike [`normalize`](Self::normalize) a
    /// caller-supplied timestamp is kept, and an absent one is left empty so
    /// recency falls back to "now".
    pub fn normalize_request(&self, record: &RawRecord) -> NormalizedRecord {
        NormalizedRecord {
            title: self.lookup(record, "title").unwrap_or_default(),
            price: self.lookup(record, "price").unwrap_or_default(),
            rating: self.lookup(record, "rating").unwrap_or_default(),
            url: self
                .lookup(record, "url")
                .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            platform: self
                .lookup(record, "platform")
                .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            timestamp: self.lookup(record, "timestamp").unwrap_or_default(),
        }
    }

    /// Normalize everything that is a JSON object; other values are skipped.
    pub fn normalize_all(&self, data: &[Value], now: NaiveDateTime) -> Vec<NormalizedRecord> {
        let mut records = Vec::with_capacity(data.len());
        let mut skipped = 0;

        for (index, item) in data.iter().enumerate() {
            match RawRecord::from_value(item.clone()) {
                Some(raw) => records.push(self.normalize(&raw, now)),
                None => {
                    skipped += 1;
                    warn!("Skipping raw record at index {}: not a field mapping", index);
                }
            }
        }

        info!(
            "Normalization summary: {} normalized, {} skipped out of {} total",
            records.len(),
            skipped,
            data.len()
        );

        records
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
