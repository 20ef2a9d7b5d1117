//! Distance functions used both to learn weights and to score errors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A pure, stateless distance between two equally long vectors.
pub trait Reducer {
    fn distance(&self, a: &[f64], b: &[f64]) -> ModelResult<f64>;

    /// Identity of the metric, recorded alongside weights and errors.
    fn metric(&self) -> Metric;
}

fn check_dims(a: &[f64], b: &[f64]) -> ModelResult<()> {
    if a.len() != b.len() {
        return Err(ModelError::Dimension {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// L2 norm of the elementwise difference.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Euclidean;

impl Reducer for Euclidean {
    fn distance(&self, a: &[f64], b: &[f64]) -> ModelResult<f64> {
        check_dims(a, b)?;
        Ok(a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt())
    }

    fn metric(&self) -> Metric {
        Metric::Euclidean
    }
}

/// Generalised p-norm of the elementwise difference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minkowski {
    p: f64,
}

impl Minkowski {
    pub fn new(p: f64) -> ModelResult<Self> {
        if !p.is_finite() || p <= 0.0 {
            return Err(ModelError::InvalidParameter(format!(
                "Minkowski order must be positive and finite, got {p}"
            )));
        }
        Ok(Minkowski { p })
    }

    pub fn order(&self) -> f64 {
        self.p
    }
}

impl Reducer for Minkowski {
    fn distance(&self, a: &[f64], b: &[f64]) -> ModelResult<f64> {
        check_dims(a, b)?;
        let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs().powf(self.p)).sum();
        Ok(sum.powf(1.0 / self.p))
    }

    fn metric(&self) -> Metric {
        Metric::Minkowski(self.p)
    }
}

// ---------------------------------------------------------------------------
// Metric – serialisable description of the reducer in use
// ---------------------------------------------------------------------------

/// Names a reducer in configuration and in persisted records.
///
/// In TOML: `metric = "euclidean"` or `metric = { minkowski = 1.0 }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Euclidean,
    Minkowski(f64),
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Euclidean
    }
}

impl Metric {
    pub fn reducer(&self) -> ModelResult<Box<dyn Reducer>> {
        Ok(match *self {
            Metric::Euclidean => Box::new(Euclidean),
            Metric::Minkowski(p) => Box::new(Minkowski::new(p)?),
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => write!(f, "euclidean"),
            Metric::Minkowski(p) => write!(f, "minkowski(p={p})"),
        }
    }
}
