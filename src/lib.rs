//! Consensus forecasts from several forecast sources.
//!
//! Records from each source are aligned into matrices ([`align`]), every
//! source is scored against observed values and the scores become weights
//! ([`estimator::Estimator::reduce`]), and new forecasts are blended with
//! those weights ([`estimator::produce`]).

pub mod align;
pub mod config;
pub mod data;
pub mod error;
pub mod estimator;
pub mod pipeline;
pub mod preprocess;
pub mod records;
pub mod reducer;
pub mod weights;

pub use align::{align, AlignOptions, AlignPolicy, Alignment, FieldSpec, KeyMap, SourceRecords};
pub use data::matrix::{Matrix, MatrixBundle};
pub use data::model::{RawRecord, RawValue};
pub use error::{ModelError, ModelResult};
pub use estimator::{cross_validate, produce, Estimator};
pub use records::{ErrorRecord, Supplement};
pub use reducer::{Euclidean, Metric, Minkowski, Reducer};
pub use weights::{WeightCurve, WeightPostprocess, WeightTable};
