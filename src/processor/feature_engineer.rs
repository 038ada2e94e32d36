use crate::config::{EncoderPolicy, OutlierConfig};
use crate::error::{PipelineError, Result};
use crate::models::{
    FeatureMatrix, FeatureSchema, FeatureVector, NormalizedRecord, BATCH_COLUMNS, NUMERIC_COLUMNS,
};
use crate::processor::encoders::{BrandTable, PlatformEncoder, StandardScaler};
use crate::processor::fallback_policy::FallbackPolicy;
use crate::processor::price_cleaner::{clip_outliers, PriceCleaner};
use crate::processor::record_normalizer::{DEFAULT_PLATFORM, DEFAULT_TEXT};
use chrono::NaiveDateTime;
use polars::prelude::*;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};
use uuid::Uuid;

static FE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFE\b").expect("valid FE pattern"));

/// Everything fit on a training batch that inference has to reuse verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessState {
    pub schema: FeatureSchema,
    pub encoder: PlatformEncoder,
    pub scaler: StandardScaler,
    pub numeric_columns: Vec<String>,
    pub brand_table: BrandTable,
    /// Training run that persisted this state; `None` until a run saves it.
    pub run_id: Option<Uuid>,
}

/// Result of fitting on a batch.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub state: PreprocessState,
    pub features: FeatureMatrix,
    /// `log1p(price)` per row.
    pub targets: Vec<f64>,
    /// Cleaned, clipped prices per row.
    pub prices: Vec<f64>,
}

pub struct FeatureEngineer {
    policy: FallbackPolicy,
    cleaner: PriceCleaner,
    outliers: OutlierConfig,
    encoder_policy: EncoderPolicy,
}

impl FeatureEngineer {
    pub fn new(outliers: OutlierConfig, encoder_policy: EncoderPolicy) -> Self {
        FeatureEngineer {
            policy: FallbackPolicy::default(),
            cleaner: PriceCleaner,
            outliers,
            encoder_policy,
        }
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Read batch rows. `title` may be provided as `name`; the other
    /// columns are optional and take the normalizer defaults.
    pub fn records_from_frame(&self, df: &DataFrame) -> Result<Vec<NormalizedRecord>> {
        let title_col = if df.column("title").is_ok() {
            "title"
        } else if df.column("name").is_ok() {
            "name"
        } else {
            return Err(PipelineError::MissingColumn("title".to_string()));
        };

        let titles = text_column(df, title_col)?.unwrap_or_default();
        let mut columns = Vec::with_capacity(BATCH_COLUMNS.len() - 1);
        for name in &BATCH_COLUMNS[1..] {
            columns.push(text_column(df, name)?);
        }

        let cell = |column: &Option<Vec<Option<String>>>, row: usize| -> Option<String> {
            column
                .as_ref()
                .and_then(|values| values.get(row).cloned().flatten())
        };

        let records = (0..df.height())
            .map(|row| NormalizedRecord {
                title: titles
                    .get(row)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
                price: cell(&columns[0], row).unwrap_or_default(),
                rating: cell(&columns[1], row).unwrap_or_default(),
                url: cell(&columns[2], row).unwrap_or_else(|| DEFAULT_TEXT.to_string()),
                platform: cell(&columns[3], row).unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
                timestamp: cell(&columns[4], row).unwrap_or_default(),
            })
            .collect();

        Ok(records)
    }

    /// Fit mode: clean prices, fit encoder, brand table and scaler, and
    /// return the scaled matrix with log-price targets. Nothing is persisted
    /// here, so a failure leaves existing artifacts untouched.
    pub fn fit(
        &self,
        df: &DataFrame,
        now: NaiveDateTime,
        previous_encoder: Option<&PlatformEncoder>,
    ) -> Result<FitOutput> {
        let records = self.records_from_frame(df)?;
        if df.column("price").is_err() {
            return Err(PipelineError::MissingColumn("price".to_string()));
        }
        let cleaned = self.cleaner.clean_column(df, "price")?;

        let (records, mut prices): (Vec<NormalizedRecord>, Vec<f64>) = records
            .into_iter()
            .zip(cleaned)
            .filter_map(|(record, price)| price.map(|p| (record, p)))
            .unzip();

        info!(
            "Price cleaning kept {} of {} rows",
            records.len(),
            df.height()
        );
        if records.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        if let Some((low, high)) = clip_outliers(
            &mut prices,
            self.outliers.lower_quantile,
            self.outliers.upper_quantile,
        ) {
            debug!("Clipped prices into [{:.2}, {:.2}]", low, high);
        }

        let brands: Vec<String> = records.iter().map(|r| self.policy.brand(&r.title)).collect();
        let brand_table = BrandTable::fit(&brands, &prices)?;

        let encoder = match (self.encoder_policy, previous_encoder) {
            (EncoderPolicy::Frozen, Some(previous)) => {
                info!(
                    "Reusing frozen platform categories {:?}",
                    previous.categories
                );
                previous.clone()
            }
            (_, previous) => {
                let version = previous.map_or(1, |p| p.schema_version + 1);
                PlatformEncoder::fit(records.iter().map(|r| r.platform.as_str()), version)
            }
        };

        let schema = FeatureSchema::for_platforms(encoder.schema_version, &encoder.categories);
        let names = schema.names();
        let raw_rows: Vec<Vec<f64>> = records
            .iter()
            .map(|r| self.raw_row(r, &brand_table, &encoder, now))
            .collect();

        let numeric_columns: Vec<String> = NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect();
        let scaler = StandardScaler::fit(
            &FeatureMatrix::from_rows(names.clone(), raw_rows.clone()),
            &numeric_columns,
        )?;

        let state = PreprocessState {
            schema,
            encoder,
            scaler,
            numeric_columns,
            brand_table,
            run_id: None,
        };

        let scaled_rows: Vec<Vec<f64>> = raw_rows
            .into_iter()
            .map(|mut row| {
                state.scaler.transform_row(&names, &mut row);
                row
            })
            .collect();

        info!(
            "Engineered {} rows x {} features ({} brands, platforms {:?})",
            scaled_rows.len(),
            names.len(),
            state.brand_table.len(),
            state.encoder.categories
        );

        Ok(FitOutput {
            features: FeatureMatrix::from_rows(names, scaled_rows),
            targets: prices.iter().map(|p| p.ln_1p()).collect(),
            prices,
            state,
        })
    }

    /// Apply mode: engineer one record against fitted state. The state is
    /// only read, so repeated calls give identical vectors.
    pub fn transform(
        &self,
        record: &NormalizedRecord,
        state: &PreprocessState,
        now: NaiveDateTime,
    ) -> FeatureVector {
        let names = state.schema.names();
        let mut row = self.raw_row(record, &state.brand_table, &state.encoder, now);
        state.scaler.transform_row(&names, &mut row);
        FeatureVector::new(names, row)
    }

    /// Unscaled features in schema order.
    fn raw_row(
        &self,
        record: &NormalizedRecord,
        brand_table: &BrandTable,
        encoder: &PlatformEncoder,
        now: NaiveDateTime,
    ) -> Vec<f64> {
        let title = record.title.as_str();
        let brand = self.policy.brand(title);
        let brand_stats = self.policy.brand_stats(brand_table, &brand);

        let mut row = vec![
            self.policy.rating(&record.rating),
            self.policy.days_since(&record.timestamp, now),
            flag(title.to_lowercase().contains("ultra")),
            flag(FE_WORD.is_match(title)),
            title.chars().count() as f64,
            brand_stats.mean,
            brand_stats.std,
        ];
        row.extend(self.policy.platform_indicators(encoder, &record.platform));
        row
    }
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(OutlierConfig::default(), EncoderPolicy::default())
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn text_column(df: &DataFrame, name: &str) -> Result<Option<Vec<Option<String>>>> {
    let Ok(column) = df.column(name) else {
        return Ok(None);
    };

    let values = column
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(Some(values))
}
