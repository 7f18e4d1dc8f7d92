//! Deterministic feature scoring: extraction of the fixed signal set and
//! fixed-weight aggregation into a risk result. Pure computation only; the
//! embedding/similarity side of the engine lives elsewhere.

mod aggregate;
mod features;
mod signals;

pub use aggregate::{AXIS_WEIGHTS, FixedWeightScorer, RiskScorer, axis_weight};
pub use features::{SIGNALS, SignalSpec, extract_features};
pub use signals::{FileKind, classify_path};
