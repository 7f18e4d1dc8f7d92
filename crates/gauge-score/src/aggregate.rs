//! Fixed-weight risk aggregation.
//!
//! The weighted-sum scorer is the authoritative runtime path; a trained
//! model can replace it behind [`RiskScorer`] without touching callers.

use gauge_core::{AxisScores, FeatureContribution, FeatureVector, RiskAxis, RiskResult};

use crate::features::spec_for;

/// Per-axis weights. Must sum to 1.0 so an all-zero vector scores 0.0 and a
/// fully saturated one scores 1.0.
pub const AXIS_WEIGHTS: [(RiskAxis, f64); 6] = [
    (RiskAxis::Complexity, 0.20),
    (RiskAxis::Security, 0.25),
    (RiskAxis::BugProbability, 0.20),
    (RiskAxis::Coupling, 0.10),
    (RiskAxis::Volatility, 0.10),
    (RiskAxis::ChangeSurface, 0.15),
];

const MAX_TOP_CONTRIBUTORS: usize = 5;

pub fn axis_weight(axis: RiskAxis) -> f64 {
    AXIS_WEIGHTS
        .iter()
        .find(|(candidate, _)| *candidate == axis)
        .map(|(_, weight)| *weight)
        .unwrap_or(0.0)
}

/// Scoring seam: turns a feature vector into a risk result. Implementations
/// must be pure and deterministic.
pub trait RiskScorer: Send + Sync {
    fn aggregate(&self, features: &FeatureVector) -> RiskResult;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWeightScorer;

impl RiskScorer for FixedWeightScorer {
    fn aggregate(&self, features: &FeatureVector) -> RiskResult {
        let axis_scores = AxisScores::from_fn(|axis| {
            features
                .values()
                .iter()
                .filter(|feature| feature.axis == axis)
                .map(|feature| signal_weight(feature.name) * feature.value)
                .sum()
        });

        let overall_score = AXIS_WEIGHTS
            .iter()
            .map(|(axis, weight)| weight * axis_scores.get(*axis))
            .sum::<f64>()
            .clamp(0.0, 1.0);

        RiskResult {
            overall_score,
            top_contributors: top_contributors(features),
            confidence: confidence(features),
            axis_scores,
        }
    }
}

/// Looks up the within-axis weight for a feature. A name outside the fixed
/// signal table is a programmer error: the vector was not produced by
/// `extract_features`, so failing fast beats silently mis-scoring.
fn signal_weight(name: &str) -> f64 {
    match spec_for(name) {
        Some(spec) => spec.weight,
        None => panic!("feature '{name}' is not in the fixed signal table"),
    }
}

fn top_contributors(features: &FeatureVector) -> Vec<FeatureContribution> {
    let mut ranked: Vec<(usize, FeatureContribution)> = features
        .values()
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let weighted =
                feature.value.abs() * signal_weight(feature.name) * axis_weight(feature.axis);
            (
                index,
                FeatureContribution {
                    feature: feature.name.to_owned(),
                    value: feature.value,
                    weighted_contribution: weighted,
                },
            )
        })
        .filter(|(_, contribution)| contribution.weighted_contribution > 0.0)
        .collect();

    // Ties break by declaration order for reproducibility.
    ranked.sort_by(|(left_index, left), (right_index, right)| {
        right
            .weighted_contribution
            .partial_cmp(&left.weighted_contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| left_index.cmp(right_index))
    });

    ranked
        .into_iter()
        .take(MAX_TOP_CONTRIBUTORS)
        .map(|(_, contribution)| contribution)
        .collect()
}

/// Secondary signal-availability estimate, independent of the score itself:
/// how many detectors actually fired, and how much change volume backed
/// them. A near-empty diff with mostly defaulted signals reads low.
fn confidence(features: &FeatureVector) -> f64 {
    if features.is_empty() {
        return 0.0;
    }

    let nonzero = features
        .values()
        .iter()
        .filter(|feature| feature.value > 0.0)
        .count();
    let evidence_fraction = nonzero as f64 / features.len() as f64;
    let volume = features.get("churn_volume").unwrap_or(0.0);

    (0.2 + 0.5 * evidence_fraction + 0.3 * volume).clamp(0.0, 1.0)
}
