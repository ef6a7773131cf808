//! Platform configuration with builder pattern and environment
//! variable support.
//!
//! Configuration is resolved in order: explicit values → environment
//! variables → defaults. Services receive the config by value at
//! construction; there is no global mutable config.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default governor capacity (concurrent GPU/LLM tasks).
const DEFAULT_GOVERNOR_CAPACITY: u32 = 2;
/// Default governor acquisition timeout.
const DEFAULT_GOVERNOR_TIMEOUT_SECS: u64 = 120;
/// Default search depth.
const DEFAULT_TOP_K: usize = 10;
/// Default RRF k parameter (the original paper's recommendation).
const DEFAULT_RRF_K: u32 = 60;
/// Default dense weight for linear fusion.
const DEFAULT_LINEAR_ALPHA: f64 = 0.5;
/// Default fused candidates handed to the cross-encoder.
const DEFAULT_RERANK_TOP_N: usize = 100;
/// Default activity retry attempts.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default initial retry backoff.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
/// Default per-activity timeout.
const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 300;
/// Default orphan reaper cadence.
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 3600;
/// Default reaper scroll batch.
const DEFAULT_REAPER_BATCH: usize = 128;
/// Default chat model.
const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default max completion tokens for analysis/synthesis calls.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the platform services.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Directory holding the record/vector/lexical databases and
    /// rendered dossiers.
    pub data_dir: PathBuf,
    /// Governor capacity (concurrent GPU/LLM tasks).
    pub governor_capacity: u32,
    /// Governor acquisition timeout.
    pub governor_timeout: Duration,
    /// Default search depth.
    pub search_top_k: usize,
    /// RRF k parameter.
    pub rrf_k: u32,
    /// Dense weight for linear fusion.
    pub linear_alpha: f64,
    /// Fused candidates handed to the cross-encoder.
    pub rerank_top_n: usize,
    /// Embedding dimensions.
    pub dimensions: usize,
    /// Activity retry attempts before the run fails.
    pub max_attempts: u32,
    /// Initial retry backoff (doubles per attempt, jittered).
    pub initial_backoff: Duration,
    /// Per-activity timeout.
    pub activity_timeout: Duration,
    /// Orphan reaper cadence.
    pub reaper_interval: Duration,
    /// Orphan reaper scroll batch size.
    pub reaper_batch: usize,
    /// Chat model for analysis and synthesis.
    pub model: String,
    /// API key for the LLM provider, when one is configured.
    pub api_key: Option<String>,
    /// Base URL override for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
    /// Max completion tokens per LLM call.
    pub llm_max_tokens: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            governor_capacity: DEFAULT_GOVERNOR_CAPACITY,
            governor_timeout: Duration::from_secs(DEFAULT_GOVERNOR_TIMEOUT_SECS),
            search_top_k: DEFAULT_TOP_K,
            rrf_k: DEFAULT_RRF_K,
            linear_alpha: DEFAULT_LINEAR_ALPHA,
            rerank_top_n: DEFAULT_RERANK_TOP_N,
            dimensions: crate::embedding::DEFAULT_DIMENSIONS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            activity_timeout: Duration::from_secs(DEFAULT_ACTIVITY_TIMEOUT_SECS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            reaper_batch: DEFAULT_REAPER_BATCH,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            llm_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map_or_else(|| PathBuf::from(".evident"), |d| d.join("evident"))
}

impl PlatformConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns a config error when an environment value fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::builder().from_env()?.build()
    }

    /// Path of the system-of-record database.
    #[must_use]
    pub fn record_db_path(&self) -> PathBuf {
        self.data_dir.join("records.db")
    }

    /// Path of the vector store database.
    #[must_use]
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }

    /// Path of the lexical store database.
    #[must_use]
    pub fn lexical_db_path(&self) -> PathBuf {
        self.data_dir.join("lexical.db")
    }

    /// Directory for rendered dossier artifacts.
    #[must_use]
    pub fn dossier_dir(&self) -> PathBuf {
        self.data_dir.join("dossiers")
    }
}

/// Builder for [`PlatformConfig`].
#[derive(Debug, Clone, Default)]
pub struct PlatformConfigBuilder {
    data_dir: Option<PathBuf>,
    governor_capacity: Option<u32>,
    governor_timeout: Option<Duration>,
    search_top_k: Option<usize>,
    rrf_k: Option<u32>,
    linear_alpha: Option<f64>,
    rerank_top_n: Option<usize>,
    dimensions: Option<usize>,
    max_attempts: Option<u32>,
    initial_backoff: Option<Duration>,
    activity_timeout: Option<Duration>,
    reaper_interval: Option<Duration>,
    reaper_batch: Option<usize>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    llm_max_tokens: Option<u32>,
}

impl PlatformConfigBuilder {
    /// Sets the data directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the governor capacity.
    #[must_use]
    pub const fn governor_capacity(mut self, capacity: u32) -> Self {
        self.governor_capacity = Some(capacity);
        self
    }

    /// Sets the governor acquisition timeout.
    #[must_use]
    pub const fn governor_timeout(mut self, timeout: Duration) -> Self {
        self.governor_timeout = Some(timeout);
        self
    }

    /// Sets the default search depth.
    #[must_use]
    pub const fn search_top_k(mut self, top_k: usize) -> Self {
        self.search_top_k = Some(top_k);
        self
    }

    /// Sets the RRF k parameter.
    #[must_use]
    pub const fn rrf_k(mut self, k: u32) -> Self {
        self.rrf_k = Some(k);
        self
    }

    /// Sets the linear fusion dense weight.
    #[must_use]
    pub const fn linear_alpha(mut self, alpha: f64) -> Self {
        self.linear_alpha = Some(alpha);
        self
    }

    /// Sets the embedding dimensions.
    #[must_use]
    pub const fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Sets the retry attempt cap.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial retry backoff.
    #[must_use]
    pub const fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the per-activity timeout.
    #[must_use]
    pub const fn activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout = Some(timeout);
        self
    }

    /// Sets the chat model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Reads overrides from `EVIDENT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a config error when a variable fails to parse.
    pub fn from_env(mut self) -> Result<Self> {
        fn parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
            match std::env::var(name) {
                Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| Error::Config {
                    message: format!("invalid value for {name}: {raw}"),
                }),
                Err(_) => Ok(None),
            }
        }

        if let Ok(dir) = std::env::var("EVIDENT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = parse::<u32>("EVIDENT_GOVERNOR_CAPACITY")? {
            self.governor_capacity = Some(v);
        }
        if let Some(v) = parse::<u64>("EVIDENT_GOVERNOR_TIMEOUT_SECS")? {
            self.governor_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = parse::<usize>("EVIDENT_SEARCH_TOP_K")? {
            self.search_top_k = Some(v);
        }
        if let Some(v) = parse::<u32>("EVIDENT_RRF_K")? {
            self.rrf_k = Some(v);
        }
        if let Some(v) = parse::<f64>("EVIDENT_LINEAR_ALPHA")? {
            self.linear_alpha = Some(v);
        }
        if let Some(v) = parse::<u32>("EVIDENT_MAX_ATTEMPTS")? {
            self.max_attempts = Some(v);
        }
        if let Some(v) = parse::<u64>("EVIDENT_REAPER_INTERVAL_SECS")? {
            self.reaper_interval = Some(Duration::from_secs(v));
        }
        if let Ok(model) = std::env::var("EVIDENT_MODEL") {
            self.model = Some(model);
        }
        if let Ok(key) = std::env::var("EVIDENT_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("EVIDENT_BASE_URL") {
            self.base_url = Some(url);
        }
        Ok(self)
    }

    /// Builds the configuration, validating cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a config error for out-of-range values.
    pub fn build(self) -> Result<PlatformConfig> {
        let defaults = PlatformConfig::default();
        let config = PlatformConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            governor_capacity: self.governor_capacity.unwrap_or(defaults.governor_capacity),
            governor_timeout: self.governor_timeout.unwrap_or(defaults.governor_timeout),
            search_top_k: self.search_top_k.unwrap_or(defaults.search_top_k),
            rrf_k: self.rrf_k.unwrap_or(defaults.rrf_k),
            linear_alpha: self.linear_alpha.unwrap_or(defaults.linear_alpha),
            rerank_top_n: self.rerank_top_n.unwrap_or(defaults.rerank_top_n),
            dimensions: self.dimensions.unwrap_or(defaults.dimensions),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            activity_timeout: self.activity_timeout.unwrap_or(defaults.activity_timeout),
            reaper_interval: self.reaper_interval.unwrap_or(defaults.reaper_interval),
            reaper_batch: self.reaper_batch.unwrap_or(defaults.reaper_batch),
            model: self.model.unwrap_or(defaults.model),
            api_key: self.api_key.or(defaults.api_key),
            base_url: self.base_url.or(defaults.base_url),
            llm_max_tokens: self.llm_max_tokens.unwrap_or(defaults.llm_max_tokens),
        };

        if !(0.0..=1.0).contains(&config.linear_alpha) {
            return Err(Error::Config {
                message: format!("linear_alpha must be in [0, 1], got {}", config.linear_alpha),
            });
        }
        if config.search_top_k == 0 || config.search_top_k > crate::search::MAX_TOP_K {
            return Err(Error::Config {
                message: format!("search_top_k out of range: {}", config.search_top_k),
            });
        }
        if config.max_attempts == 0 {
            return Err(Error::Config {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::default();
        assert_eq!(config.governor_capacity, DEFAULT_GOVERNOR_CAPACITY);
        assert_eq!(config.rrf_k, 60);
        assert!((config.linear_alpha - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.reaper_interval, Duration::from_secs(3600));
        assert_eq!(config.reaper_batch, 128);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PlatformConfig::builder()
            .governor_capacity(8)
            .rrf_k(30)
            .search_top_k(50)
            .model("local-llama")
            .build()
            .unwrap();
        assert_eq!(config.governor_capacity, 8);
        assert_eq!(config.rrf_k, 30);
        assert_eq!(config.search_top_k, 50);
        assert_eq!(config.model, "local-llama");
    }

    #[test]
    fn test_build_validates_alpha() {
        let result = PlatformConfig::builder().linear_alpha(1.5).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_validates_top_k() {
        assert!(PlatformConfig::builder().search_top_k(0).build().is_err());
        assert!(PlatformConfig::builder().search_top_k(5000).build().is_err());
    }

    #[test]
    fn test_build_validates_attempts() {
        assert!(PlatformConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_db_paths_under_data_dir() {
        let config = PlatformConfig::builder().data_dir("/tmp/ev").build().unwrap();
        assert_eq!(config.record_db_path(), PathBuf::from("/tmp/ev/records.db"));
        assert_eq!(config.vector_db_path(), PathBuf::from("/tmp/ev/vectors.db"));
        assert_eq!(config.lexical_db_path(), PathBuf::from("/tmp/ev/lexical.db"));
        assert_eq!(config.dossier_dir(), PathBuf::from("/tmp/ev/dossiers"));
    }
}
