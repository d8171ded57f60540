//! Configuration for the RAG serving core.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::params::GenerationParams;
use crate::rate_limit::RateLimitStrategy;

/// Longest cache TTL, rate window or acquire timeout accepted (about ten years).
///
/// Keeps `Instant + duration` arithmetic far from overflow.
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Result cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached results.
    pub capacity: usize,
    /// Time-to-live applied to stored results.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1000, ttl: Duration::from_secs(3600) }
    }
}

/// Budget for calls to the generation provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum permits per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
    /// Accounting strategy.
    pub strategy: RateLimitStrategy,
    /// How long a request may wait for permits. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window: Duration::from_secs(60),
            strategy: RateLimitStrategy::SlidingWindow,
            acquire_timeout: None,
        }
    }
}

/// How many rate-limit permits one generation costs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostModel {
    /// Every generation costs the same number of permits.
    Flat(u32),
    /// One permit per `tokens_per_permit` estimated completion tokens, rounded up.
    PerTokens { tokens_per_permit: u32 },
}

impl Default for CostModel {
    fn default() -> Self {
        Self::Flat(1)
    }
}

impl CostModel {
    /// Permits for one generation with `params`, clamped to `[1, limit]`.
    pub fn permits(&self, params: &GenerationParams, limit: u32) -> u32 {
        let raw = match *self {
            Self::Flat(n) => n,
            Self::PerTokens { tokens_per_permit } => {
                params.length.estimated_tokens().div_ceil(tokens_per_permit.max(1))
            }
        };
        raw.clamp(1, limit.max(1))
    }
}

/// Configuration parameters for the RAG orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Number of supporting documents retrieved per request.
    pub top_k: usize,
    /// Minimum similarity score for retrieved documents (results below this are filtered out).
    pub similarity_threshold: f32,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub cost_model: CostModel,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.0,
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cost_model: CostModel::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load configuration from `QUILL_*` environment variables.
    ///
    /// Unset variables keep their defaults. See [`from_lookup`](Self::from_lookup)
    /// for the recognized names.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// Recognized names: `QUILL_TOP_K`, `QUILL_SIMILARITY_THRESHOLD`,
    /// `QUILL_CACHE_CAPACITY`, `QUILL_CACHE_TTL_SECS`, `QUILL_RATE_LIMIT`,
    /// `QUILL_RATE_WINDOW_SECS`, `QUILL_RATE_STRATEGY`, `QUILL_ACQUIRE_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a value does not parse or the
    /// resulting configuration fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(v) = parse_var::<usize, _>(&lookup, "QUILL_TOP_K")? {
            builder = builder.top_k(v);
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "QUILL_SIMILARITY_THRESHOLD")? {
            builder = builder.similarity_threshold(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "QUILL_CACHE_CAPACITY")? {
            builder = builder.cache_capacity(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "QUILL_CACHE_TTL_SECS")? {
            builder = builder.cache_ttl(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "QUILL_RATE_LIMIT")? {
            builder = builder.rate_limit(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "QUILL_RATE_WINDOW_SECS")? {
            builder = builder.rate_window(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<RateLimitStrategy, _>(&lookup, "QUILL_RATE_STRATEGY")? {
            builder = builder.rate_strategy(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "QUILL_ACQUIRE_TIMEOUT_MS")? {
            builder = builder.acquire_timeout(Duration::from_millis(v));
        }
        builder.build()
    }

    /// Check that the parameters are consistent.
    ///
    /// Both [`RagConfigBuilder::build`] and the orchestrator builder call
    /// this, so a struct literal cannot bypass it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `top_k == 0`
    /// - `similarity_threshold` is NaN or outside `[-1, 1]`
    /// - the cache capacity or TTL is zero
    /// - the rate limit or window is zero
    /// - a TTL, window or acquire timeout exceeds [`MAX_DURATION`]
    /// - the cost model asks for zero permits or zero tokens per permit
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(config_error("top_k must be greater than zero"));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be between -1 and 1",
                self.similarity_threshold
            )));
        }
        if self.cache.capacity == 0 {
            return Err(config_error("cache capacity must be greater than zero"));
        }
        check_duration("cache ttl", self.cache.ttl)?;
        if self.rate_limit.limit == 0 {
            return Err(config_error("rate limit must be greater than zero"));
        }
        check_duration("rate window", self.rate_limit.window)?;
        if let Some(timeout) = self.rate_limit.acquire_timeout.filter(|t| *t > MAX_DURATION) {
            return Err(RagError::ConfigError(format!(
                "acquire timeout ({timeout:?}) exceeds {MAX_DURATION:?}"
            )));
        }
        match self.cost_model {
            CostModel::Flat(0) => Err(config_error("flat cost must be at least one permit")),
            CostModel::PerTokens { tokens_per_permit: 0 } => {
                Err(config_error("tokens_per_permit must be greater than zero"))
            }
            _ => Ok(()),
        }
    }
}

fn config_error(msg: &str) -> RagError {
    RagError::ConfigError(msg.to_string())
}

fn check_duration(what: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(RagError::ConfigError(format!("{what} must be greater than zero")));
    }
    if value > MAX_DURATION {
        return Err(RagError::ConfigError(format!("{what} ({value:?}) exceeds {MAX_DURATION:?}")));
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RagError::ConfigError(format!("{key}='{raw}' is not valid: {e}"))),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the number of supporting documents retrieved per request.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache.capacity = capacity;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    /// Set the maximum permits per rate window.
    pub fn rate_limit(mut self, limit: u32) -> Self {
        self.config.rate_limit.limit = limit;
        self
    }

    pub fn rate_window(mut self, window: Duration) -> Self {
        self.config.rate_limit.window = window;
        self
    }

    pub fn rate_strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.config.rate_limit.strategy = strategy;
        self
    }

    /// Bound how long a request waits for rate-limit permits.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.rate_limit.acquire_timeout = Some(timeout);
        self
    }

    pub fn cost_model(mut self, model: CostModel) -> Self {
        self.config.cost_model = model;
        self
    }

    /// Build the [`RagConfig`], validating it with [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
