//! The fixed, versioned feature set.
//!
//! Every analysis request produces a value for every signal in [`SIGNALS`],
//! in declaration order. Absent underlying evidence yields 0.0, never a
//! missing entry, so the axis key set is always complete downstream.

use gauge_core::{ChangeRequest, FeatureValue, FeatureVector, RiskAxis};

use crate::signals::{self, FileKind, SignalContext};

pub struct SignalSpec {
    pub name: &'static str,
    pub axis: RiskAxis,
    /// Weight within the axis. Per-axis weights sum to 1.0 (checked by test).
    pub weight: f64,
    /// File kinds the detector applies to. Empty means any change. When no
    /// changed file matches, the detector is skipped and the signal is 0.0.
    pub applies_to: &'static [FileKind],
    pub compute: fn(&SignalContext) -> f64,
}

pub const SIGNALS: &[SignalSpec] = &[
    // complexity
    SignalSpec {
        name: "churn_volume",
        axis: RiskAxis::Complexity,
        weight: 0.35,
        applies_to: &[],
        compute: signals::churn_volume,
    },
    SignalSpec {
        name: "files_touched",
        axis: RiskAxis::Complexity,
        weight: 0.25,
        applies_to: &[],
        compute: signals::files_touched,
    },
    SignalSpec {
        name: "avg_churn_per_file",
        axis: RiskAxis::Complexity,
        weight: 0.20,
        applies_to: &[],
        compute: signals::avg_churn_per_file,
    },
    SignalSpec {
        name: "deep_nesting_ratio",
        axis: RiskAxis::Complexity,
        weight: 0.20,
        applies_to: &[],
        compute: signals::deep_nesting_ratio,
    },
    // security
    SignalSpec {
        name: "sql_string_concat",
        axis: RiskAxis::Security,
        weight: 0.65,
        applies_to: &[FileKind::Source, FileKind::Migration],
        compute: signals::sql_string_concat,
    },
    SignalSpec {
        name: "hardcoded_secrets",
        axis: RiskAxis::Security,
        weight: 0.15,
        applies_to: &[FileKind::Source, FileKind::Config],
        compute: signals::hardcoded_secrets,
    },
    SignalSpec {
        name: "risky_api_calls",
        axis: RiskAxis::Security,
        weight: 0.10,
        applies_to: &[FileKind::Source],
        compute: signals::risky_api_calls,
    },
    SignalSpec {
        name: "sensitive_paths_touched",
        axis: RiskAxis::Security,
        weight: 0.10,
        applies_to: &[],
        compute: signals::sensitive_paths_touched,
    },
    // bug probability
    SignalSpec {
        name: "deletion_ratio",
        axis: RiskAxis::BugProbability,
        weight: 0.30,
        applies_to: &[],
        compute: signals::deletion_ratio,
    },
    SignalSpec {
        name: "error_handling_removed",
        axis: RiskAxis::BugProbability,
        weight: 0.30,
        applies_to: &[FileKind::Source],
        compute: signals::error_handling_removed,
    },
    SignalSpec {
        name: "untested_source_changes",
        axis: RiskAxis::BugProbability,
        weight: 0.25,
        applies_to: &[],
        compute: signals::untested_source_changes,
    },
    SignalSpec {
        name: "todo_markers_added",
        axis: RiskAxis::BugProbability,
        weight: 0.15,
        applies_to: &[FileKind::Source],
        compute: signals::todo_markers_added,
    },
    // coupling
    SignalSpec {
        name: "directory_spread",
        axis: RiskAxis::Coupling,
        weight: 0.35,
        applies_to: &[],
        compute: signals::directory_spread,
    },
    SignalSpec {
        name: "import_churn",
        axis: RiskAxis::Coupling,
        weight: 0.30,
        applies_to: &[FileKind::Source],
        compute: signals::import_churn,
    },
    SignalSpec {
        name: "interface_changes",
        axis: RiskAxis::Coupling,
        weight: 0.20,
        applies_to: &[],
        compute: signals::interface_changes,
    },
    SignalSpec {
        name: "config_beside_code",
        axis: RiskAxis::Coupling,
        weight: 0.15,
        applies_to: &[],
        compute: signals::config_beside_code,
    },
    // volatility
    SignalSpec {
        name: "dependency_manifest_changes",
        axis: RiskAxis::Volatility,
        weight: 0.40,
        applies_to: &[],
        compute: signals::dependency_manifest_changes,
    },
    SignalSpec {
        name: "migration_changes",
        axis: RiskAxis::Volatility,
        weight: 0.30,
        applies_to: &[],
        compute: signals::migration_changes,
    },
    SignalSpec {
        name: "ci_config_changes",
        axis: RiskAxis::Volatility,
        weight: 0.30,
        applies_to: &[],
        compute: signals::ci_config_changes,
    },
    // change surface
    SignalSpec {
        name: "additions_volume",
        axis: RiskAxis::ChangeSurface,
        weight: 0.30,
        applies_to: &[],
        compute: signals::additions_volume,
    },
    SignalSpec {
        name: "deletions_volume",
        axis: RiskAxis::ChangeSurface,
        weight: 0.20,
        applies_to: &[],
        compute: signals::deletions_volume,
    },
    SignalSpec {
        name: "file_spread",
        axis: RiskAxis::ChangeSurface,
        weight: 0.25,
        applies_to: &[],
        compute: signals::file_spread,
    },
    SignalSpec {
        name: "public_api_additions",
        axis: RiskAxis::ChangeSurface,
        weight: 0.25,
        applies_to: &[FileKind::Source],
        compute: signals::public_api_additions,
    },
];

/// Derives the feature vector for one change request. Pure, no I/O, never
/// suspends. Empty diff text yields the all-zero vector.
pub fn extract_features(request: &ChangeRequest) -> FeatureVector {
    let ctx = SignalContext::new(request);

    let values = SIGNALS
        .iter()
        .map(|spec| {
            let applicable = spec.applies_to.is_empty()
                || spec.applies_to.iter().any(|kind| ctx.touches_kind(*kind));
            let raw = if applicable { (spec.compute)(&ctx) } else { 0.0 };
            FeatureValue {
                name: spec.name,
                axis: spec.axis,
                value: raw.clamp(0.0, 1.0),
            }
        })
        .collect();

    FeatureVector::new(values)
}

pub(crate) fn spec_for(name: &str) -> Option<&'static SignalSpec> {
    SIGNALS.iter().find(|spec| spec.name == name)
}
