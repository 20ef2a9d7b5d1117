use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model::RawValue;
use crate::error::{ModelError, ModelResult};

// ---------------------------------------------------------------------------
// Matrix – rectangular block of values, rows = slots, columns = labels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: Vec<Vec<f64>>,
    cols: usize,
}

impl Matrix {
    /// Build from rows. Ragged input is rejected, never padded.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> ModelResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(ModelError::Shape(format!(
                "row {i} has {} values, row 0 has {cols}",
                row.len()
            )));
        }
        Ok(Matrix { rows, cols })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }
}

// ---------------------------------------------------------------------------
// MatrixBundle – aligned data for every variable key
// ---------------------------------------------------------------------------

/// Aligned matrices sharing one label axis (columns) and one slot axis (rows).
///
/// Built once, never mutated: every matrix has `slots.len()` rows and
/// `labels.len()` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixBundle {
    data: BTreeMap<String, Matrix>,
    labels: Vec<RawValue>,
    slots: Vec<String>,
}

impl MatrixBundle {
    pub fn new(
        data: BTreeMap<String, Matrix>,
        labels: Vec<RawValue>,
        slots: Vec<String>,
    ) -> ModelResult<Self> {
        for (key, m) in &data {
            if m.n_rows() != slots.len() {
                return Err(ModelError::Shape(format!(
                    "'{key}' has {} row(s) for {} slot(s)",
                    m.n_rows(),
                    slots.len()
                )));
            }
            // A matrix without rows cannot carry a column count.
            if m.n_rows() > 0 && m.n_cols() != labels.len() {
                return Err(ModelError::Shape(format!(
                    "'{key}' has {} column(s) for {} label(s)",
                    m.n_cols(),
                    labels.len()
                )));
            }
        }
        Ok(MatrixBundle { data, labels, slots })
    }

    /// Convenience constructor from nested row vectors.
    pub fn from_rows<K: Into<String>>(
        data: impl IntoIterator<Item = (K, Vec<Vec<f64>>)>,
        labels: Vec<RawValue>,
        slots: Vec<String>,
    ) -> ModelResult<Self> {
        let data = data
            .into_iter()
            .map(|(k, rows)| Ok((k.into(), Matrix::from_rows(rows)?)))
            .collect::<ModelResult<BTreeMap<_, _>>>()?;
        Self::new(data, labels, slots)
    }

    pub fn get(&self, key: &str) -> Option<&Matrix> {
        self.data.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Matrix)> {
        self.data.iter().map(|(k, m)| (k.as_str(), m))
    }

    pub fn labels(&self) -> &[RawValue] {
        &self.labels
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the bundle has no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
