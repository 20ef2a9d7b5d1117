use thiserror::Error;

/// Failures raised by the alignment and weighting core.
///
/// Every variant is raised at the point of detection and propagated as-is;
/// the core never retries and never returns partial results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Ragged or mismatched matrix dimensions.
    #[error("shape error: {0}")]
    Shape(String),

    /// A required field path could not be resolved under the active policy.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// Distance requested over vectors of unequal length.
    #[error("dimension error: vectors of length {left} and {right}")]
    Dimension { left: usize, right: usize },

    /// Zero slots or labels where at least one is required.
    #[error("empty data: {0}")]
    EmptyData(String),

    /// Weights applied to a slot set they were not learned against.
    #[error("slot mismatch: weights learned for {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// Fold count exceeds the available labels.
    #[error("insufficient data: {folds} fold(s) over {labels} label(s)")]
    InsufficientData { folds: usize, labels: usize },

    /// A strategy parameter outside its domain (e.g. Minkowski order).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
