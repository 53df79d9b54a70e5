//! Configuration: YAML file with env-var and flag overrides.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::retention::{
    DEFAULT_ARTIFACTS_PER_RUN, DEFAULT_ARTIFACT_MAX_AGE_MS, DEFAULT_ENTRY_MAX_AGE_MS,
    DEFAULT_ENTRY_MAX_COUNT,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub enabled: bool,
    pub entry_max_age_ms: u64,
    pub entry_max_count: usize,
    pub artifact_max_age_ms: u64,
    pub artifacts_per_run: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            enabled: true,
            entry_max_age_ms: DEFAULT_ENTRY_MAX_AGE_MS,
            entry_max_count: DEFAULT_ENTRY_MAX_COUNT,
            artifact_max_age_ms: DEFAULT_ARTIFACT_MAX_AGE_MS,
            artifacts_per_run: DEFAULT_ARTIFACTS_PER_RUN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub model: String,
    pub api_base: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Normally supplied via `ANTHROPIC_API_KEY` rather than the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-latest".to_string(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            max_tokens: 4096,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub step_budget: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 2_000,
            rate_limit_cooldown_ms: 15_000,
            step_budget: 50,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("agentest"))
        .unwrap_or_else(|| PathBuf::from(".agentest-cache"))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentest").join("config.yaml"))
}

/// Load config from an explicit path, the default location, or defaults, then
/// apply environment overrides.
pub async fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let resolved = path.cloned().or_else(default_config_path);
    let mut config = match resolved {
        Some(file) if file.exists() => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read config file {}", file.display()))?;
            let parsed: Config = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", file.display()))?;
            debug!(path = %file.display(), "loaded configuration file");
            parsed
        }
        Some(file) if path.is_some() => {
            // explicitly named files must exist; the default path may not
            anyhow::bail!("config file {} not found", file.display());
        }
        _ => {
            debug!("no config file found, using defaults");
            Config::default()
        }
    };

    if let Ok(dir) = std::env::var("AGENTEST_CACHE_DIR") {
        if !dir.is_empty() {
            config.cache.dir = PathBuf::from(dir);
        }
    }
    if config.provider.api_key.is_none() {
        match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => config.provider.api_key = Some(key),
            _ => warn!("no API key configured; only offline runs will work"),
        }
    }
    Ok(config)
}
