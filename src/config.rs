use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::llm::NARRATIVE_MAX_BATCH;
use crate::vision::METRICS_MAX_BATCH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub narrative: NarrativeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_metrics_timeout")]
    pub timeout_secs: u64,

    /// Items per request. Clamped to what the vision service accepts.
    #[serde(default = "default_metrics_batch")]
    pub batch_size: usize,

    #[serde(default)]
    pub run_emotion: bool,

    #[serde(default)]
    pub run_embedding: bool,
}

fn default_metrics_endpoint() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_metrics_timeout() -> u64 {
    30
}

fn default_metrics_batch() -> usize {
    METRICS_MAX_BATCH
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_metrics_endpoint(),
            api_key: None,
            timeout_secs: default_metrics_timeout(),
            batch_size: default_metrics_batch(),
            run_emotion: false,
            run_embedding: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[default]
    LmStudio,
    OpenAI,
    Anthropic,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub provider: LlmProviderType,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_narrative_batch")]
    pub batch_size: usize,
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_narrative_batch() -> usize {
    NARRATIVE_MAX_BATCH
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: LlmProviderType::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
            batch_size: default_narrative_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL the thumbnail keys are served from.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default)]
    pub signing_secret: Option<String>,

    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:9000/photos".to_string()
}

fn default_url_ttl() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            signing_secret: None,
            url_ttl_secs: default_url_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// Consecutive polls without progress before a run counts as stalled.
    #[serde(default = "default_stall_cycles")]
    pub stall_cycles: u32,
}

fn default_poll_interval() -> u64 {
    3
}

fn default_stall_cycles() -> u32 {
    6
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            stall_cycles: default_stall_cycles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_poll")]
    pub poll_interval_secs: u64,

    /// A running job older than this is handed out again.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_worker_poll() -> u64 {
    2
}

fn default_lease() -> u64 {
    900
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_worker_poll(),
            lease_secs: default_lease(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proofsheet")
        .join("proofsheet.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            metrics: MetricsConfig::default(),
            narrative: NarrativeConfig::default(),
            storage: StorageConfig::default(),
            polling: PollingConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Load from `PROOFSHEET_CONFIG` or the default location, falling back
    /// to defaults when no file exists.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("proofsheet")
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PROOFSHEET_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Secrets left out of the file are picked up from the environment.
    fn apply_env(&mut self) {
        if self.metrics.api_key.is_none() {
            self.metrics.api_key = std::env::var("PROOFSHEET_METRICS_API_KEY").ok();
        }
        if self.narrative.api_key.is_none() {
            self.narrative.api_key = std::env::var("PROOFSHEET_NARRATIVE_API_KEY").ok();
        }
        if self.storage.signing_secret.is_none() {
            self.storage.signing_secret = std::env::var("PROOFSHEET_SIGNING_SECRET").ok();
        }
    }

    /// Batch size for one dispatch run. With both backends enabled the
    /// smaller backend bound wins.
    pub fn dispatch_batch_size(&self) -> usize {
        let metrics = self.metrics.batch_size.clamp(1, METRICS_MAX_BATCH);
        if self.narrative.enabled {
            metrics.min(self.narrative.batch_size.clamp(1, NARRATIVE_MAX_BATCH))
        } else {
            metrics
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.polling.stall_cycles, 6);
        assert_eq!(config.polling.interval_secs, 3);
        assert_eq!(config.metrics.batch_size, 20);
        assert!(!config.narrative.enabled);
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [narrative]
            enabled = true
            provider = "anthropic"
            model = "claude-haiku"
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.narrative.enabled);
        assert_eq!(config.narrative.provider, LlmProviderType::Anthropic);
        assert_eq!(config.narrative.batch_size, 5);
        assert_eq!(config.metrics.endpoint, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_dispatch_batch_size_respects_backend_maxima() {
        let mut config = Config::default();
        config.metrics.batch_size = 500;
        assert_eq!(config.dispatch_batch_size(), 20);

        config.narrative.enabled = true;
        config.narrative.batch_size = 8;
        assert_eq!(config.dispatch_batch_size(), 5);

        config.narrative.batch_size = 0;
        assert_eq!(config.dispatch_batch_size(), 1);
    }
}
