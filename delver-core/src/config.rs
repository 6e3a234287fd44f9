//! Configuration system for delver.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> CLI overrides. Configuration is loaded from
//! `~/.config/delver/config.toml` and/or `.delver/config.toml` in the
//! working directory, then `DELVER_`-prefixed environment variables.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the research pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DelverConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub search: SearchConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub backend: BackendConfig,
    pub summarizer: SummarizerConfig,
    pub writer: WriterConfig,
    pub costs: CostConfig,
}

/// Bounds on the generated search plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Minimum number of directives a plan must contain.
    #[serde(default = "default_min_directives")]
    pub min_directives: usize,
    /// Maximum number of directives; excess is truncated.
    #[serde(default = "default_max_directives")]
    pub max_directives: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_directives: default_min_directives(),
            max_directives: default_max_directives(),
        }
    }
}

fn default_min_directives() -> usize {
    10
}

fn default_max_directives() -> usize {
    15
}

/// Concurrency and coverage policy for search execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum directives in flight at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Fraction of directives that must succeed for the run to proceed.
    /// Checked by the pipeline driver, not the executor.
    #[serde(default = "default_min_success_ratio")]
    pub min_success_ratio: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            min_success_ratio: default_min_success_ratio(),
        }
    }
}

fn default_max_in_flight() -> usize {
    4
}

fn default_min_success_ratio() -> f64 {
    0.6
}

/// Search provider behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum spacing between external provider calls, in milliseconds.
    /// Applies per external call, never per cache hit.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    /// Maximum results requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: default_min_spacing_ms(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_min_spacing_ms() -> u64 {
    2500
}

fn default_max_results() -> usize {
    5
}

fn default_search_timeout() -> u64 {
    15
}

/// Retry policy for transient collaborator failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single backoff, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to each backoff.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Persistent search result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one JSON file per cache key. `None` resolves to
    /// the platform data dir (or `.delver/cache` as a fallback).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { dir: None }
    }
}

impl CacheConfig {
    /// Resolve the cache directory, falling back to the platform data dir.
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "delver", "delver")
            .map(|d| d.data_dir().join("cache"))
            .unwrap_or_else(|| PathBuf::from(".delver/cache"))
    }
}

/// Model backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_backend_timeout() -> u64 {
    60
}

/// Summary distillation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Maximum characters of snippet text fed into one distillation call.
    #[serde(default = "default_summarizer_chars")]
    pub max_input_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_summarizer_chars(),
        }
    }
}

fn default_summarizer_chars() -> usize {
    4000
}

/// Report synthesis limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Maximum characters of summary text fed into the synthesis call.
    #[serde(default = "default_writer_chars")]
    pub max_input_chars: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_writer_chars(),
        }
    }
}

fn default_writer_chars() -> usize {
    20_000
}

/// Per-call cost estimates used by the run ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Estimated USD per planning/summarization call.
    #[serde(default = "default_model_call_usd")]
    pub model_call_usd: f64,
    /// Estimated USD per report synthesis call.
    #[serde(default = "default_report_call_usd")]
    pub report_call_usd: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            model_call_usd: default_model_call_usd(),
            report_call_usd: default_report_call_usd(),
        }
    }
}

fn default_model_call_usd() -> f64 {
    0.002
}

fn default_report_call_usd() -> f64 {
    0.005
}

fn default_true() -> bool {
    true
}

/// Load layered configuration.
///
/// Layers, lowest precedence first: built-in defaults, the user config
/// file, a workspace-local `.delver/config.toml`, `DELVER_`-prefixed
/// environment variables (`__` separates nesting levels), and finally
/// explicit overrides (e.g. from CLI flags).
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<DelverConfig>,
) -> Result<DelverConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DelverConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "delver", "delver") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".delver").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed("DELVER_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: DelverConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;

    if config.planner.min_directives > config.planner.max_directives {
        return Err(ConfigError::Invalid {
            message: format!(
                "planner.min_directives ({}) exceeds planner.max_directives ({})",
                config.planner.min_directives, config.planner.max_directives
            ),
        });
    }
    if !(0.0..=1.0).contains(&config.executor.min_success_ratio) {
        return Err(ConfigError::Invalid {
            message: format!(
                "executor.min_success_ratio ({}) must be within [0, 1]",
                config.executor.min_success_ratio
            ),
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DelverConfig::default();
        assert_eq!(config.planner.min_directives, 10);
        assert_eq!(config.planner.max_directives, 15);
        assert_eq!(config.executor.max_in_flight, 4);
        assert!((config.executor.min_success_ratio - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.search.min_spacing_ms, 2500);
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.summarizer.max_input_chars, 4000);
        assert_eq!(config.writer.max_input_chars, 20_000);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = DelverConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DelverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.planner.min_directives, config.planner.min_directives);
        assert_eq!(parsed.backend.model, config.backend.model);
        assert_eq!(parsed.search.min_spacing_ms, config.search.min_spacing_ms);
    }

    #[test]
    fn test_config_deserialize_empty_uses_defaults() {
        let config: DelverConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend.model, "gpt-4o-mini");
        assert_eq!(config.costs.model_call_usd, 0.002);
    }

    #[test]
    fn test_cache_dir_explicit() {
        let config = CacheConfig {
            dir: Some(PathBuf::from("/tmp/delver-cache")),
        };
        assert_eq!(config.resolve_dir(), PathBuf::from("/tmp/delver-cache"));
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config.planner.min_directives, 10);
    }

    #[test]
    fn test_load_config_rejects_inverted_bounds() {
        let overrides = DelverConfig {
            planner: PlannerConfig {
                min_directives: 20,
                max_directives: 10,
            },
            ..Default::default()
        };
        let err = load_config(None, Some(overrides)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let overrides = DelverConfig {
            executor: ExecutorConfig {
                max_in_flight: 8,
                ..Default::default()
            },
            ..Default::default()
        };
        let config = load_config(None, Some(overrides)).unwrap();
        assert_eq!(config.executor.max_in_flight, 8);
    }
}
