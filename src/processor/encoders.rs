use crate::error::{PipelineError, Result};
use crate::models::{platform_column, FeatureMatrix};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One-hot encoder for the `platform` column. Categories are kept sorted so
/// indicator columns come out in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformEncoder {
    pub categories: Vec<String>,
    pub schema_version: u32,
}

impl PlatformEncoder {
    pub fn fit<'a>(platforms: impl IntoIterator<Item = &'a str>, schema_version: u32) -> Self {
        let categories: BTreeSet<String> = platforms.into_iter().map(str::to_string).collect();
        PlatformEncoder {
            categories: categories.into_iter().collect(),
            schema_version,
        }
    }

    /// Indicator row for `platform`; an unseen value yields all zeros.
    pub fn transform(&self, platform: &str) -> Vec<f64> {
        self.categories
            .iter()
            .map(|c| if c == platform { 1.0 } else { 0.0 })
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| platform_column(c)).collect()
    }
}

/// Standardizes a fixed set of named columns with `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Population mean and deviation per column. Constant columns get scale 1.
    pub fn fit(matrix: &FeatureMatrix, columns: &[String]) -> Result<Self> {
        let mut means = Vec::with_capacity(columns.len());
        let mut scales = Vec::with_capacity(columns.len());

        for name in columns {
            let index = matrix
                .names()
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| PipelineError::MissingColumn(name.clone()))?;

            let column = matrix.data().column(index);
            let n = column.len().max(1) as f64;
            let mean = column.sum() / n;
            let variance = column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();

            means.push(mean);
            scales.push(if std > 0.0 && std.is_finite() { std } else { 1.0 });
        }

        Ok(StandardScaler {
            columns: columns.to_vec(),
            means,
            scales,
        })
    }

    /// Scale the matching entries of a row laid out as `names`.
    pub fn transform_row(&self, names: &[String], values: &mut [f64]) {
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(j) = names.iter().position(|n| n == column) {
                values[j] = (values[j] - self.means[i]) / self.scales[i];
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrandStat {
    pub mean: f64,
    pub std: f64,
}

/// Per-brand price mean and sample deviation from the last training batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandTable {
    pub stats: BTreeMap<String, BrandStat>,
    pub global_mean: f64,
}

impl BrandTable {
    pub fn fit(brands: &[String], prices: &[f64]) -> Result<Self> {
        if prices.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let frame = df!("brand" => brands, "price" => prices)?;
        let grouped = frame
            .lazy()
            .group_by([col("brand")])
            .agg([
                col("price").mean().alias("brand_mean"),
                col("price").std(1).fill_null(lit(0.0)).alias("brand_std"),
            ])
            .sort(["brand"], SortMultipleOptions::default())
            .collect()?;

        let global_mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let mut table = Self::from_dataframe(&grouped)?;
        table.global_mean = global_mean;
        Ok(table)
    }

    pub fn get(&self, brand: &str) -> Option<&BrandStat> {
        self.stats.get(brand)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// `brand, brand_mean, brand_std` frame, sorted by brand.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let brands: Vec<&str> = self.stats.keys().map(String::as_str).collect();
        let means: Vec<f64> = self.stats.values().map(|s| s.mean).collect();
        let stds: Vec<f64> = self.stats.values().map(|s| s.std).collect();

        Ok(df!(
            "brand" => brands,
            "brand_mean" => means,
            "brand_std" => stds
        )?)
    }

    /// Rebuild from a `brand, brand_mean, brand_std` frame. Numbers may be
    /// stored as floats or as text; missing or non-finite values read as 0.
    /// The global mean is not part of the frame and starts at 0.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let brands: Vec<Option<String>> = required_column(df, "brand")?
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect();
        let means = float_column(df, "brand_mean")?;
        let stds = float_column(df, "brand_std")?;

        let mut stats = BTreeMap::new();
        for ((brand, mean), std) in brands.into_iter().zip(means).zip(stds) {
            if let Some(brand) = brand {
                stats.insert(brand, BrandStat { mean, std });
            }
        }

        Ok(BrandTable {
            stats,
            global_mean: 0.0,
        })
    }
}

fn required_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| PipelineError::MissingColumn(name.to_string()))
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = required_column(df, name)?;

    let values = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
            .collect::<Vec<_>>(),
        _ => column
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .collect::<Vec<_>>(),
    };

    Ok(values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
        .collect())
}
