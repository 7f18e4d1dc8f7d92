use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const GAUGE_DIR_NAME: &str = ".gauge";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_EMBEDDING_API_KEY_ENV: &str = "GAUGE_EMBEDDING_API_KEY";
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://127.0.0.1:11434/api/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "qwen3-embeddings-0.6B";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Mock,
    Http,
}

impl EmbeddingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Http => "http",
        }
    }
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "mock" => Ok(Self::Mock),
            "http" => Ok(Self::Http),
            other => Err(format!(
                "invalid embedding provider '{other}', expected one of: mock, http"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GaugeConfig {
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Provider contract: maximum input length for one call. Longer text is
    /// chunked and averaged.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Mock,
            endpoint: None,
            model: None,
            api_key_env: default_api_key_env(),
            max_input_chars: default_max_input_chars(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overall deadline for the similarity path of one assessment, provider
    /// retries included.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Bounded worker pool size for batch assessment.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Retention cap on entry count; oldest entries are dropped first.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Retention cap on entry age in seconds. Zero disables the age cap.
    #[serde(default)]
    pub max_age_secs: i64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            max_entries: default_max_entries(),
            max_age_secs: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn gauge_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(GAUGE_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    gauge_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(workspace_root: impl AsRef<Path>) -> Result<GaugeConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(GaugeConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: GaugeConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<GaugeConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(gauge_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = GaugeConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

fn default_api_key_env() -> String {
    DEFAULT_EMBEDDING_API_KEY_ENV.to_owned()
}

fn default_max_input_chars() -> usize {
    6_000
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

fn default_concurrency() -> usize {
    3
}

fn default_max_retries() -> usize {
    2
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    0.70
}

fn default_max_entries() -> usize {
    10_000
}

fn default_ttl_seconds() -> i64 {
    3_600
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: GaugeConfig) -> GaugeConfig {
    config.embeddings.endpoint = normalize_optional(config.embeddings.endpoint.take());
    config.embeddings.model = normalize_optional(config.embeddings.model.take());

    let api_key_env = config.embeddings.api_key_env.trim();
    if api_key_env.is_empty() {
        config.embeddings.api_key_env = default_api_key_env();
    } else {
        config.embeddings.api_key_env = api_key_env.to_owned();
    }

    if config.embeddings.max_input_chars == 0 {
        config.embeddings.max_input_chars = default_max_input_chars();
    }
    if config.embeddings.requests_per_minute == 0 {
        config.embeddings.requests_per_minute = default_requests_per_minute();
    }
    if config.pipeline.concurrency == 0 {
        config.pipeline.concurrency = default_concurrency();
    }
    if config.index.top_k == 0 {
        config.index.top_k = default_top_k();
    }
    config.index.min_similarity = config.index.min_similarity.clamp(0.0, 1.0);
    if config.cache.ttl_seconds <= 0 {
        config.cache.ttl_seconds = default_ttl_seconds();
    }

    config
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn ensure_workspace_config_creates_default_file() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();

        let config = ensure_workspace_config(workspace).expect("ensure config");

        assert_eq!(config.embeddings.provider, EmbeddingProviderKind::Mock);
        assert_eq!(config.pipeline.concurrency, 3);
        assert!(config_path(workspace).exists());

        let content = fs::read_to_string(config_path(workspace)).expect("read config file");
        assert!(content.contains("[embeddings]"));
        assert!(content.contains("provider = \"mock\""));
    }

    #[test]
    fn load_workspace_config_parses_all_tables() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();
        fs::create_dir_all(gauge_dir(workspace)).expect("create .gauge");

        let raw = r#"
[embeddings]
provider = "http"
endpoint = "http://127.0.0.1:11434/api/embeddings"
model = "qwen3-embeddings-4B"
requests_per_minute = 30

[pipeline]
deadline_secs = 12
concurrency = 5

[index]
top_k = 8
min_similarity = 0.85

[cache]
ttl_seconds = 120
"#;
        fs::write(config_path(workspace), raw).expect("write config");

        let config = load_workspace_config(workspace).expect("load config");

        assert_eq!(config.embeddings.provider, EmbeddingProviderKind::Http);
        assert_eq!(
            config.embeddings.endpoint.as_deref(),
            Some("http://127.0.0.1:11434/api/embeddings")
        );
        assert_eq!(config.embeddings.requests_per_minute, 30);
        assert_eq!(config.pipeline.deadline_secs, 12);
        assert_eq!(config.pipeline.concurrency, 5);
        assert_eq!(config.index.top_k, 8);
        assert_eq!(config.index.min_similarity, 0.85);
        assert_eq!(config.cache.ttl_seconds, 120);
    }

    #[test]
    fn normalization_repairs_degenerate_values() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();
        fs::create_dir_all(gauge_dir(workspace)).expect("create .gauge");

        let raw = r#"
[embeddings]
endpoint = "   "
api_key_env = ""
max_input_chars = 0

[pipeline]
concurrency = 0

[index]
min_similarity = 4.0

[cache]
ttl_seconds = -5
"#;
        fs::write(config_path(workspace), raw).expect("write config");

        let config = load_workspace_config(workspace).expect("load config");

        assert_eq!(config.embeddings.endpoint, None);
        assert_eq!(config.embeddings.api_key_env, DEFAULT_EMBEDDING_API_KEY_ENV);
        assert_eq!(config.embeddings.max_input_chars, 6_000);
        assert_eq!(config.pipeline.concurrency, 3);
        assert_eq!(config.index.min_similarity, 1.0);
        assert_eq!(config.cache.ttl_seconds, 3_600);
    }
}
