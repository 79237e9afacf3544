//! Pipeline configuration
//!
//! One explicit struct passed to the orchestrator at construction. Every
//! section has defaults, so an empty TOML document is a valid config.
//!
//! ```toml
//! max_attempts = 3
//! run_timeout_seconds = 120
//!
//! [cache]
//! similarity_threshold = 0.92
//!
//! [sandbox]
//! max_parallel_executions = 5
//! execution_timeout_seconds = 30
//!
//! [sandbox.container]
//! image = "ria-executor:latest"
//!
//! [[screener.extra_query_rules]]
//! id = "competitor-data"
//! category = "instruction_override"
//! pattern = "competitor\\s+pricing"
//! ```

use crate::error::ConfigError;
use ria_cache::CacheConfig;
use ria_sandbox::{SandboxConfig, ScreenerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Code attempts per run (each Generate entry is one attempt)
    pub max_attempts: u32,
    /// Wall-clock budget for a whole run
    pub run_timeout_seconds: u64,
    /// Budget for a single provider call
    pub provider_timeout_seconds: u64,
    /// Pause before retrying after a transient provider failure
    pub retry_backoff_ms: u64,
    /// Semantic cache settings
    pub cache: CacheConfig,
    /// Executor settings
    pub sandbox: SandboxConfig,
    /// Screener settings
    pub screener: ScreenerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            run_timeout_seconds: 120,
            provider_timeout_seconds: 30,
            retry_backoff_ms: 1000,
            cache: CacheConfig::default(),
            sandbox: SandboxConfig::default(),
            screener: ScreenerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.run_timeout_seconds == 0 {
            return Err(ConfigError::invalid("run_timeout_seconds", "must be positive"));
        }
        if self.provider_timeout_seconds == 0 {
            return Err(ConfigError::invalid("provider_timeout_seconds", "must be positive"));
        }

        let threshold = self.cache.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "cache.similarity_threshold",
                format!("{threshold} is outside (0, 1]"),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::invalid("cache.capacity", "must be positive"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.ttl_secs", "must be positive"));
        }

        if self.sandbox.max_parallel_executions == 0 {
            return Err(ConfigError::invalid("sandbox.max_parallel_executions", "must be positive"));
        }
        if self.sandbox.execution_timeout_seconds == 0 {
            return Err(ConfigError::invalid("sandbox.execution_timeout_seconds", "must be positive"));
        }
        if self.sandbox.execution_timeout_seconds > self.run_timeout_seconds {
            return Err(ConfigError::invalid(
                "sandbox.execution_timeout_seconds",
                format!("exceeds run_timeout_seconds ({})", self.run_timeout_seconds),
            ));
        }
        if self.sandbox.container.memory_mb == 0 {
            return Err(ConfigError::invalid("sandbox.container.memory_mb", "must be positive"));
        }

        if self.screener.max_query_chars == 0 {
            return Err(ConfigError::invalid("screener.max_query_chars", "must be positive"));
        }

        Ok(())
    }

    /// With attempt ceiling
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// With run budget
    #[inline]
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_seconds = ceil_secs(timeout);
        self
    }

    /// With provider call budget
    #[inline]
    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_seconds = ceil_secs(timeout);
        self
    }

    /// With transient-failure backoff
    #[inline]
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With cache settings
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// With executor settings
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// With screener settings
    #[inline]
    #[must_use]
    pub fn with_screener(mut self, screener: ScreenerConfig) -> Self {
        self.screener = screener;
        self
    }

    /// Run budget
    #[inline]
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    /// Provider call budget
    #[inline]
    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Transient-failure backoff
    #[inline]
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Whole seconds, rounding any fraction up
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs().saturating_add(u64::from(duration.subsec_nanos() > 0))
}
