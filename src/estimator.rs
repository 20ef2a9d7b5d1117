//! Learning per-slot weights (`reduce`), applying them (`produce`) and
//! scoring the result (`cross_validate`).

use std::collections::BTreeMap;

use crate::data::matrix::{Matrix, MatrixBundle};
use crate::error::{ModelError, ModelResult};
use crate::records::ErrorRecord;
use crate::reducer::Reducer;
use crate::weights::{WeightCurve, WeightPostprocess, WeightTable};

/// Slot name of the single row in a produced bundle.
pub const PREDICTED_SLOT: &str = "predicted";

/// Candidates and ground truth for one forecast distance.
#[derive(Debug, Clone)]
pub struct Horizon {
    pub candidates: MatrixBundle,
    pub truth: MatrixBundle,
}

#[derive(Debug, Clone, Default)]
pub struct Estimator {
    horizons: BTreeMap<usize, Horizon>,
    curve: WeightCurve,
    postprocess: BTreeMap<String, Vec<WeightPostprocess>>,
}

impl Estimator {
    /// Estimator over a single horizon at forecast distance 0.
    pub fn new(candidates: MatrixBundle, truth: MatrixBundle) -> Self {
        Estimator::default().with_horizon(0, candidates, truth)
    }

    pub fn with_horizon(mut self, distance: usize, candidates: MatrixBundle, truth: MatrixBundle) -> Self {
        self.horizons.insert(distance, Horizon { candidates, truth });
        self
    }

    pub fn with_curve(mut self, curve: WeightCurve) -> Self {
        self.curve = curve;
        self
    }

    /// Postprocess the weights learned for `key` after every reduction.
    pub fn with_postprocess(mut self, key: &str, p: WeightPostprocess) -> Self {
        self.postprocess.entry(key.to_string()).or_default().push(p);
        self
    }

    pub fn horizon(&self, distance: usize) -> Option<&Horizon> {
        self.horizons.get(&distance)
    }

    /// Learn one weight vector per key and forecast distance `0..=max_distance`.
    pub fn reduce(&self, reducer: &dyn Reducer, max_distance: usize) -> ModelResult<WeightTable> {
        let first = self.horizon(0).ok_or_else(|| missing_horizon(0))?;
        let slots = first.candidates.slots().to_vec();
        let mut table = WeightTable::new(slots.clone(), reducer.metric(), self.curve);

        for d in 0..=max_distance {
            let h = self.horizon(d).ok_or_else(|| missing_horizon(d))?;
            if h.candidates.slots() != slots.as_slice() {
                return Err(ModelError::ShapeMismatch {
                    expected: slots,
                    actual: h.candidates.slots().to_vec(),
                });
            }
            for (key, m) in h.candidates.iter() {
                if m.n_rows() == 0 || h.candidates.is_empty() {
                    return Err(ModelError::EmptyData(format!(
                        "'{key}' at distance {d}: {} slot(s), {} label(s)",
                        m.n_rows(),
                        h.candidates.len()
                    )));
                }
                let truth = truth_row(key, &h.candidates, &h.truth)?;
                let scores = m
                    .rows()
                    .map(|row| reducer.distance(row, truth))
                    .collect::<ModelResult<Vec<f64>>>()?;

                let mut weights = self.curve.weights(&scores)?;
                for p in self.postprocess.get(key).into_iter().flatten() {
                    weights = p.apply(&weights);
                }
                table.insert(key, d, weights)?;
            }
        }
        Ok(table)
    }

    /// [`produce`] over this estimator's own candidates at `distance`.
    pub fn produce(&self, weights: &WeightTable, distance: usize) -> ModelResult<MatrixBundle> {
        let h = self.horizon(distance).ok_or_else(|| missing_horizon(distance))?;
        produce(&h.candidates, weights, Some(distance))
    }

    /// [`cross_validate`] against this estimator's truth at `distance`.
    pub fn cross_validate(
        &self,
        predicted: &MatrixBundle,
        reducer: &dyn Reducer,
        folds: usize,
        distance: usize,
    ) -> ModelResult<ErrorRecord> {
        let h = self.horizon(distance).ok_or_else(|| missing_horizon(distance))?;
        cross_validate(predicted, &h.truth, reducer, folds)
    }
}

fn missing_horizon(d: usize) -> ModelError {
    ModelError::EmptyData(format!("no data for forecast distance {d}"))
}

/// The single truth row for `key`, checked against the candidates' labels.
fn truth_row<'a>(key: &str, candidates: &MatrixBundle, truth: &'a MatrixBundle) -> ModelResult<&'a [f64]> {
    let m = truth
        .get(key)
        .ok_or_else(|| ModelError::Shape(format!("truth has no data for '{key}'")))?;
    if truth.labels() != candidates.labels() {
        return Err(ModelError::Shape(format!(
            "truth labels differ from candidate labels for '{key}'"
        )));
    }
    if m.n_rows() != 1 {
        return Err(ModelError::Shape(format!(
            "truth for '{key}' has {} rows, expected 1",
            m.n_rows()
        )));
    }
    Ok(m.row(0))
}

/// Weighted sum over slots for every key and label, using the weights
/// learned at `distance` (0 when not given). Keys without learned weights
/// are left out of the result.
pub fn produce(
    candidates: &MatrixBundle,
    weights: &WeightTable,
    distance: Option<usize>,
) -> ModelResult<MatrixBundle> {
    if candidates.slots() != weights.slots() {
        return Err(ModelError::ShapeMismatch {
            expected: weights.slots().to_vec(),
            actual: candidates.slots().to_vec(),
        });
    }
    let d = distance.unwrap_or(0);
    if !weights.has_distance(d) {
        return Err(ModelError::EmptyData(format!(
            "no weights learned for forecast distance {d}"
        )));
    }

    let mut data = BTreeMap::new();
    for (key, m) in candidates.iter() {
        let Some(w) = weights.get(key, d) else {
            continue;
        };
        let row: Vec<f64> = (0..candidates.len())
            .map(|j| w.iter().enumerate().map(|(i, wi)| wi * m.get(i, j)).sum())
            .collect();
        data.insert(key.to_string(), Matrix::from_rows(vec![row])?);
    }
    MatrixBundle::new(
        data,
        candidates.labels().to_vec(),
        vec![PREDICTED_SLOT.to_string()],
    )
}

/// Bounds of `folds` contiguous groups over `n` labels; the first `n % folds`
/// groups are one label longer.
fn fold_bounds(n: usize, folds: usize) -> Vec<std::ops::Range<usize>> {
    let (base, extra) = (n / folds, n % folds);
    let mut start = 0;
    (0..folds)
        .map(|f| {
            let len = base + usize::from(f < extra);
            let r = start..start + len;
            start += len;
            r
        })
        .collect()
}

/// Mean over contiguous folds of the distance between predicted and truth.
pub fn cross_validate(
    predicted: &MatrixBundle,
    truth: &MatrixBundle,
    reducer: &dyn Reducer,
    folds: usize,
) -> ModelResult<ErrorRecord> {
    let n = predicted.len();
    if folds == 0 || folds > n {
        return Err(ModelError::InsufficientData { folds, labels: n });
    }

    let bounds = fold_bounds(n, folds);
    let mut errors = BTreeMap::new();
    for (key, m) in predicted.iter() {
        if m.n_rows() != 1 {
            return Err(ModelError::Shape(format!(
                "predicted '{key}' has {} rows, expected 1",
                m.n_rows()
            )));
        }
        let truth = truth_row(key, predicted, truth)?;
        let pred = m.row(0);

        let total = bounds
            .iter()
            .map(|r| reducer.distance(&pred[r.clone()], &truth[r.clone()]))
            .sum::<ModelResult<f64>>()?;
        errors.insert(key.to_string(), total / folds as f64);
    }

    Ok(ErrorRecord {
        metric: reducer.metric(),
        folds,
        errors,
    })
}
