use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod fingerprint;

pub use fingerprint::{change_fingerprint, content_hash, normalize_for_fingerprint};

/// Version stamped into every persisted artifact (index snapshots, cache
/// entries) so format changes can be migrated instead of silently misread.
pub const SCHEMA_VERSION: u32 = 1;

/// Embedding width for the whole system. Providers that return a different
/// width are rejected by the pipeline.
pub const EMBEDDING_DIMENSION: usize = 256;

/// The fixed risk axis set. Axes outside this set are unrepresentable, which
/// pushes the "unknown axis" failure mode to compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum RiskAxis {
    Complexity,
    Security,
    BugProbability,
    Coupling,
    Volatility,
    ChangeSurface,
}

impl RiskAxis {
    pub const ALL: [RiskAxis; 6] = [
        Self::Complexity,
        Self::Security,
        Self::BugProbability,
        Self::Coupling,
        Self::Volatility,
        Self::ChangeSurface,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complexity => "complexity",
            Self::Security => "security",
            Self::BugProbability => "bug_probability",
            Self::Coupling => "coupling",
            Self::Volatility => "volatility",
            Self::ChangeSurface => "change_surface",
        }
    }
}

impl std::str::FromStr for RiskAxis {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "complexity" => Ok(Self::Complexity),
            "security" => Ok(Self::Security),
            "bug_probability" => Ok(Self::BugProbability),
            "coupling" => Ok(Self::Coupling),
            "volatility" => Ok(Self::Volatility),
            "change_surface" => Ok(Self::ChangeSurface),
            other => Err(format!(
                "invalid risk axis '{other}', expected one of: complexity, security, \
bug_probability, coupling, volatility, change_surface"
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("change request is missing an id")]
    MissingId,
    #[error("changed file record {index} has an empty path")]
    EmptyFilePath { index: usize },
    #[error("line counts overflow: {0}")]
    CountOverflow(String),
}

/// One changed file inside a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub lines_added: u64,
    pub lines_removed: u64,
}

/// The engine's input: PR metadata plus raw (unsanitized) diff text, as
/// supplied by an external code-host fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub diff_text: String,
}

impl ChangeRequest {
    pub fn validate(&self) -> Result<(), InputError> {
        if self.id.trim().is_empty() {
            return Err(InputError::MissingId);
        }

        for (index, file) in self.files.iter().enumerate() {
            if file.path.trim().is_empty() {
                return Err(InputError::EmptyFilePath { index });
            }
        }

        let mut total: u64 = 0;
        for file in &self.files {
            total = total
                .checked_add(file.lines_added)
                .and_then(|sum| sum.checked_add(file.lines_removed))
                .ok_or_else(|| {
                    InputError::CountOverflow(format!("per-file totals for {}", self.id))
                })?;
        }
        let _ = total;

        Ok(())
    }

    pub fn changed_file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_churn(&self) -> u64 {
        self.additions.saturating_add(self.deletions)
    }
}

/// One named numeric feature. Names are static because the feature set is
/// fixed and versioned with the code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureValue {
    pub name: &'static str,
    pub axis: RiskAxis,
    pub value: f64,
}

/// Ordered, immutable feature vector produced once per analysis request.
/// Iteration order is declaration order, which downstream tie-breaking
/// depends on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureVector {
    values: Vec<FeatureValue>,
}

impl FeatureVector {
    pub fn new(values: Vec<FeatureValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|feature| feature.name == name)
            .map(|feature| feature.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|feature| feature.value == 0.0)
    }
}

/// One score in [0,1] per axis, always fully populated. Missing underlying
/// signals surface as 0.0, never as an absent key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisScores {
    pub complexity: f64,
    pub security: f64,
    pub bug_probability: f64,
    pub coupling: f64,
    pub volatility: f64,
    pub change_surface: f64,
}

impl AxisScores {
    pub fn from_fn(mut score: impl FnMut(RiskAxis) -> f64) -> Self {
        Self {
            complexity: score(RiskAxis::Complexity).clamp(0.0, 1.0),
            security: score(RiskAxis::Security).clamp(0.0, 1.0),
            bug_probability: score(RiskAxis::BugProbability).clamp(0.0, 1.0),
            coupling: score(RiskAxis::Coupling).clamp(0.0, 1.0),
            volatility: score(RiskAxis::Volatility).clamp(0.0, 1.0),
            change_surface: score(RiskAxis::ChangeSurface).clamp(0.0, 1.0),
        }
    }

    pub fn zero() -> Self {
        Self::from_fn(|_| 0.0)
    }

    pub fn get(&self, axis: RiskAxis) -> f64 {
        match axis {
            RiskAxis::Complexity => self.complexity,
            RiskAxis::Security => self.security,
            RiskAxis::BugProbability => self.bug_probability,
            RiskAxis::Coupling => self.coupling,
            RiskAxis::Volatility => self.volatility,
            RiskAxis::ChangeSurface => self.change_surface,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiskAxis, f64)> + '_ {
        RiskAxis::ALL.into_iter().map(|axis| (axis, self.get(axis)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub weighted_contribution: f64,
}

/// The deterministic scoring output. Created once per request, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub overall_score: f64,
    pub axis_scores: AxisScores,
    pub top_contributors: Vec<FeatureContribution>,
    pub confidence: f64,
}

/// A fixed-width vector plus the identity of the item it embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub source_id: String,
    pub created_at: i64,
}

impl Embedding {
    pub fn new(vector: Vec<f32>, source_id: impl Into<String>, created_at: i64) -> Self {
        Self {
            dimension: vector.len(),
            vector,
            source_id: source_id.into(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
}

/// An embedding plus render-ready metadata, owned by the similarity index
/// once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub embedding: Embedding,
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// One nearest-neighbor hit. Produced transiently per query, not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub source_id: String,
    pub similarity: f32,
    pub metadata: BTreeMap<String, MetadataValue>,
}

pub fn unix_timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
