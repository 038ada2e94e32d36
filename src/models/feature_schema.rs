//! Typed description of the model input.
//!
//! Every feature row carries the ordered column names it was built with, and
//! moving a row between schemas always goes through [`reindex_plan`], which
//! matches columns by name and zero-fills the ones the source lacks.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

pub const RATING: &str = "rating";
pub const DAYS_SINCE: &str = "days_since";
pub const IS_ULTRA: &str = "is_ultra";
pub const IS_FE: &str = "is_fe";
pub const TITLE_LEN: &str = "title_len";
pub const BRAND_MEAN: &str = "brand_mean";
pub const BRAND_STD: &str = "brand_std";
pub const PLATFORM_PREFIX: &str = "platform_";

/// Columns standardized by the scaler, in scaler order.
pub const NUMERIC_COLUMNS: [&str; 5] = [RATING, DAYS_SINCE, TITLE_LEN, BRAND_MEAN, BRAND_STD];

const BASE_COLUMNS: [(&str, ColumnKind); 7] = [
    (RATING, ColumnKind::Continuous),
    (DAYS_SINCE, ColumnKind::Continuous),
    (IS_ULTRA, ColumnKind::Flag),
    (IS_FE, ColumnKind::Flag),
    (TITLE_LEN, ColumnKind::Continuous),
    (BRAND_MEAN, ColumnKind::Continuous),
    (BRAND_STD, ColumnKind::Continuous),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Continuous,
    Flag,
    Indicator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    /// Base columns followed by one indicator per platform category.
    pub fn for_platforms(version: u32, categories: &[String]) -> Self {
        let mut columns: Vec<FeatureColumn> = BASE_COLUMNS
            .iter()
            .map(|(name, kind)| FeatureColumn {
                name: name.to_string(),
                kind: *kind,
            })
            .collect();

        columns.extend(categories.iter().map(|category| FeatureColumn {
            name: platform_column(category),
            kind: ColumnKind::Indicator,
        }));

        FeatureSchema { version, columns }
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

pub fn platform_column(category: &str) -> String {
    format!("{}{}", PLATFORM_PREFIX, category)
}

/// For each target column, the index of the same-named source column.
pub fn reindex_plan(source: &[String], target: &[String]) -> Vec<Option<usize>> {
    target
        .iter()
        .map(|name| source.iter().position(|s| s == name))
        .collect()
}

/// Columns present in `target` but not in `source`, i.e. the ones a reindex zero-fills.
pub fn missing_columns(source: &[String], target: &[String]) -> Vec<String> {
    target
        .iter()
        .filter(|name| !source.contains(name))
        .cloned()
        .collect()
}

/// One engineered row, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        FeatureVector { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn reindex(&self, target: &[String]) -> FeatureVector {
        let values = reindex_plan(&self.names, target)
            .into_iter()
            .map(|idx| idx.map_or(0.0, |i| self.values[i]))
            .collect();

        FeatureVector {
            names: target.to_vec(),
            values,
        }
    }

    pub fn to_matrix(&self) -> FeatureMatrix {
        FeatureMatrix::from_rows(self.names.clone(), vec![self.values.clone()])
    }
}

/// Rows sharing one column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    data: Array2<f64>,
}

impl FeatureMatrix {
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        let mut data = Array2::<f64>::zeros((rows.len(), names.len()));
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().take(names.len()).enumerate() {
                data[(i, j)] = *value;
            }
        }
        FeatureMatrix { names, data }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, index: usize) -> FeatureVector {
        FeatureVector::new(self.names.clone(), self.data.row(index).to_vec())
    }

    pub fn select_rows(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            names: self.names.clone(),
            data: self.data.select(Axis(0), indices),
        }
    }

    /// Reorder to `target`, zero-filling absent columns and dropping extras.
    pub fn align_to(&self, target: &[String]) -> FeatureMatrix {
        let plan = reindex_plan(&self.names, target);
        let mut data = Array2::<f64>::zeros((self.nrows(), target.len()));
        for (j, source) in plan.iter().enumerate() {
            if let Some(src) = source {
                data.column_mut(j).assign(&self.data.column(*src));
            }
        }
        FeatureMatrix {
            names: target.to_vec(),
            data,
        }
    }

    pub fn to_dense(&self) -> DenseMatrix<f64> {
        let rows: Vec<Vec<f64>> = self.data.outer_iter().map(|row| row.to_vec()).collect();
        DenseMatrix::from_2d_vec(&rows)
    }
}
