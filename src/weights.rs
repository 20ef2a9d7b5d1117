use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::reducer::Metric;

// ---------------------------------------------------------------------------
// WeightCurve – how per-slot distance scores become weights
// ---------------------------------------------------------------------------

/// Mapping from distance scores to normalised weights.
///
/// Every curve yields non-negative weights summing to 1 that never increase
/// with the score. Two rules override the curve: slots scoring exactly 0
/// share the whole mass, and all-equal scores give uniform weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightCurve {
    /// `w ∝ 1 / e`.
    Inverse,
    /// `w ∝ 1 - e / Σe`, the complement of the normalised errors.
    Complement,
    /// `w ∝ exp(-e / temperature)`.
    Softmax { temperature: f64 },
}

impl Default for WeightCurve {
    fn default() -> Self {
        WeightCurve::Inverse
    }
}

impl WeightCurve {
    pub fn validate(&self) -> ModelResult<()> {
        match self {
            WeightCurve::Softmax { temperature } if !(temperature.is_finite() && *temperature > 0.0) => {
                Err(ModelError::InvalidParameter(format!(
                    "softmax temperature must be positive and finite, got {temperature}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Turn per-slot scores into weights.
    pub fn weights(&self, scores: &[f64]) -> ModelResult<Vec<f64>> {
        if scores.is_empty() {
            return Err(ModelError::EmptyData("no slots to weight".into()));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "distance score {bad} is not a finite non-negative number"
            )));
        }
        self.validate()?;

        let n = scores.len();
        let uniform = || vec![1.0 / n as f64; n];

        if scores.iter().all(|s| *s == scores[0]) {
            return Ok(uniform());
        }
        let zeros = scores.iter().filter(|s| **s == 0.0).count();
        if zeros > 0 {
            let share = 1.0 / zeros as f64;
            return Ok(scores
                .iter()
                .map(|s| if *s == 0.0 { share } else { 0.0 })
                .collect());
        }

        let raw: Vec<f64> = match *self {
            WeightCurve::Inverse => {
                // best / s stays in (0, 1] where 1 / s overflows for tiny s.
                let best = scores.iter().copied().fold(f64::INFINITY, f64::min);
                scores.iter().map(|s| best / s).collect()
            }
            WeightCurve::Complement => {
                let total: f64 = scores.iter().sum();
                scores.iter().map(|s| 1.0 - s / total).collect()
            }
            WeightCurve::Softmax { temperature } => {
                // Shift by the best score so the largest exponent is 0.
                let best = scores.iter().copied().fold(f64::INFINITY, f64::min);
                scores
                    .iter()
                    .map(|s| (-(s - best) / temperature).exp())
                    .collect()
            }
        };
        Ok(normalize(raw).unwrap_or_else(uniform))
    }
}

/// Scale to unit sum; `None` when the sum is not positive.
fn normalize(v: Vec<f64>) -> Option<Vec<f64>> {
    let total: f64 = v.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    Some(v.into_iter().map(|x| x / total).collect())
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

/// Adjustment applied to a learned weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPostprocess {
    /// All mass on the heaviest slot (first one on ties), e.g. for
    /// categorical keys where a blend of classes means nothing.
    MaxWeight,
}

impl WeightPostprocess {
    pub fn apply(&self, weights: &[f64]) -> Vec<f64> {
        match self {
            WeightPostprocess::MaxWeight => {
                let mut best = 0;
                for (i, w) in weights.iter().enumerate() {
                    if *w > weights[best] {
                        best = i;
                    }
                }
                (0..weights.len())
                    .map(|i| if i == best { 1.0 } else { 0.0 })
                    .collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WeightTable
// ---------------------------------------------------------------------------

/// Learned weights per (variable key, forecast distance), each vector
/// aligned with `slots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    slots: Vec<String>,
    metric: Metric,
    curve: WeightCurve,
    weights: BTreeMap<String, BTreeMap<usize, Vec<f64>>>,
}

impl WeightTable {
    pub fn new(slots: Vec<String>, metric: Metric, curve: WeightCurve) -> Self {
        WeightTable {
            slots,
            metric,
            curve,
            weights: BTreeMap::new(),
        }
    }

    /// Add one weight vector. Its length must match the slot count.
    pub fn insert(&mut self, key: &str, distance: usize, weights: Vec<f64>) -> ModelResult<()> {
        if weights.len() != self.slots.len() {
            return Err(ModelError::Shape(format!(
                "{} weight(s) for {} slot(s) on '{key}' at distance {distance}",
                weights.len(),
                self.slots.len()
            )));
        }
        self.weights
            .entry(key.to_string())
            .or_default()
            .insert(distance, weights);
        Ok(())
    }

    pub fn get(&self, key: &str, distance: usize) -> Option<&[f64]> {
        self.weights.get(key)?.get(&distance).map(Vec::as_slice)
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn curve(&self) -> WeightCurve {
        self.curve
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Forecast distances learned for `key`, ascending.
    pub fn distances(&self, key: &str) -> Vec<usize> {
        self.weights
            .get(key)
            .map(|d| d.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every (key, distance, weights) entry.
    pub fn entries(&self) -> impl Iterator<Item = (&str, usize, &[f64])> {
        self.weights.iter().flat_map(|(k, per_d)| {
            per_d
                .iter()
                .map(move |(d, w)| (k.as_str(), *d, w.as_slice()))
        })
    }

    /// Whether `distance` was learned for any key.
    pub fn has_distance(&self, distance: usize) -> bool {
        self.weights.values().any(|d| d.contains_key(&distance))
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
