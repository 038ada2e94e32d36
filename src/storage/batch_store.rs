use crate::config::PathsConfig;
use crate::error::{PipelineError, Result};
use crate::models::NormalizedRecord;
use crate::storage::write_atomic;
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const BOM: char = '\u{feff}';

/// Timestamped CSV batches of normalized records in one directory.
pub struct BatchStore {
    output_dir: PathBuf,
    prefix: String,
}

impl BatchStore {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        BatchStore {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(paths.output_dir.clone(), paths.batch_prefix.clone())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write a new batch file. Existing batches are never appended to; a
    /// name collision within the same second gets a numeric suffix.
    pub fn save(&self, records: &[NormalizedRecord], now: NaiveDateTime) -> Result<Option<PathBuf>> {
        if records.is_empty() {
            warn!("⚠️ No records received, skipping batch save");
            return Ok(None);
        }

        fs::create_dir_all(&self.output_dir)?;
        let path = self.next_batch_path(now);

        let mut df = records_to_dataframe(records)?;
        let mut buf = Vec::new();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .finish(&mut df)?;
        write_atomic(&path, &buf)?;

        info!("💾 {} records saved to {}", records.len(), path.display());
        Ok(Some(path))
    }

    fn next_batch_path(&self, now: NaiveDateTime) -> PathBuf {
        let stem = format!("{}{}", self.prefix, now.format("%Y%m%d_%H%M%S"));
        let mut path = self.output_dir.join(format!("{}.csv", stem));
        let mut suffix = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{}_{}.csv", stem, suffix));
            suffix += 1;
        }
        path
    }

    /// All `<prefix>*.csv` files in the output directory.
    pub fn list_batches(&self) -> Result<Vec<PathBuf>> {
        if !self.output_dir.exists() {
            return Ok(Vec::new());
        }

        let mut batches = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_file() && name.starts_with(&self.prefix) && name.ends_with(".csv") {
                batches.push(path);
            }
        }
        batches.sort();
        Ok(batches)
    }

    /// Most recently modified batch; ties go to the later file name.
    pub fn latest_batch(&self) -> Result<PathBuf> {
        let mut latest: Option<(SystemTime, PathBuf)> = None;

        for path in self.list_batches()? {
            let modified = fs::metadata(&path)?.modified()?;
            if latest.as_ref().is_none_or(|(best, _)| modified >= *best) {
                latest = Some((modified, path));
            }
        }

        match latest {
            Some((_, path)) => {
                info!("📂 Using latest batch file: {}", path.display());
                Ok(path)
            }
            None => Err(PipelineError::NoBatchFile {
                dir: self.output_dir.clone(),
                prefix: self.prefix.clone(),
            }),
        }
    }
}

/// Read a batch with every column as text. A UTF-8 byte-order mark on the
/// header is stripped.
pub fn read_batch(path: &Path) -> Result<DataFrame> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let bom_columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .filter(|name| name.starts_with(BOM))
        .collect();
    for name in bom_columns {
        let stripped = name.trim_start_matches(BOM).to_string();
        df.rename(&name, stripped.into())?;
    }

    debug!(
        "Loaded {} rows and {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

pub fn records_to_dataframe(records: &[NormalizedRecord]) -> Result<DataFrame> {
    Ok(df!(
        "title" => records.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
        "price" => records.iter().map(|r| r.price.as_str()).collect::<Vec<_>>(),
        "rating" => records.iter().map(|r| r.rating.as_str()).collect::<Vec<_>>(),
        "url" => records.iter().map(|r| r.url.as_str()).collect::<Vec<_>>(),
        "platform" => records.iter().map(|r| r.platform.as_str()).collect::<Vec<_>>(),
        "timestamp" => records.iter().map(|r| r.timestamp.as_str()).collect::<Vec<_>>()
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FeatureEngineer;
    use chrono::NaiveDate;
    use std::fs::File;
    use std::time::Duration;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 30, 5)
            .unwrap()
    }

    fn record(title: &str, price: &str) -> NormalizedRecord {
        NormalizedRecord {
            title: title.to_string(),
            price: price.to_string(),
            rating: "4.5".to_string(),
            url: "https://example.com".to_string(),
            platform: "Amazon".to_string(),
            timestamp: NormalizedRecord::captured_at(now()),
        }
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "scraped_results_");
        let records = vec![record("Samsung S25", "₹80,999"), record("Pixel 9", "")];

        let path = store.save(&records, now()).unwrap().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "scraped_results_20250314_093005.csv"
        );

        let df = read_batch(&path).unwrap();
        assert_eq!(df.height(), 2);
        let restored = FeatureEngineer::default().records_from_frame(&df).unwrap();
        assert_eq!(restored[0], records[0]);
        // empty cells come back as nulls and take the defaults
        assert_eq!(restored[1].price, "");
    }

    #[test]
    fn test_same_second_batches_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "scraped_results_");
        let records = vec![record("A", "1")];

        let first = store.save(&records, now()).unwrap().unwrap();
        let second = store.save(&records, now()).unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(store.list_batches().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_save_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "scraped_results_");
        assert!(store.save(&[], now()).unwrap().is_none());
        assert!(store.list_batches().unwrap().is_empty());
    }

    #[test]
    fn test_latest_batch_by_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "scraped_results_");

        let older_name = dir.path().join("scraped_results_20990101_000000.csv");
        let newer_name = dir.path().join("scraped_results_20000101_000000.csv");
        fs::write(&older_name, "title,price\nA,1\n").unwrap();
        fs::write(&newer_name, "title,price\nB,2\n").unwrap();
        fs::write(dir.path().join("notes.csv"), "x\n").unwrap();

        let base = SystemTime::now();
        File::options()
            .write(true)
            .open(&older_name)
            .unwrap()
            .set_modified(base - Duration::from_secs(3600))
            .unwrap();
        File::options()
            .write(true)
            .open(&newer_name)
            .unwrap()
            .set_modified(base)
            .unwrap();

        assert_eq!(store.latest_batch().unwrap(), newer_name);
    }

    #[test]
    fn test_no_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path().join("missing"), "scraped_results_");
        assert!(matches!(
            store.latest_batch(),
            Err(PipelineError::NoBatchFile { .. })
        ));
    }

    #[test]
    fn test_bom_header_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraped_results_bom.csv");
        fs::write(&path, "\u{feff}title,price\nSamsung,\"₹80,999\"\n").unwrap();

        let df = read_batch(&path).unwrap();
        assert!(df.column("title").is_ok());
    }
}
