use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration, as loaded from `strata.toml` and the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrataConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    /// Shared tier connection
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StrataConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        if self.redis.enabled {
            if self.redis.url.is_empty() {
                return Err("redis.url must be set when redis is enabled".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
        }
        Ok(())
    }
}

/// Cache engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key prefix for every value, tag set and partial entry
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// TTL used when a caller omits one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Byte budget for the size-bounded local tier (object cache)
    #[serde(default = "default_l1_max_bytes")]
    pub l1_max_bytes: usize,

    /// Entry budget for the frequency-bound local tier (query cache)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Cap on local TTL when repopulating from a shared tier hit
    #[serde(default = "default_l1_fallback_ttl_secs")]
    pub l1_fallback_ttl_secs: u64,

    /// Global kill-switch. When false get/set/wrap store nothing.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// TTL for the streaming/partial tier
    #[serde(default = "default_streaming_ttl_secs")]
    pub streaming_ttl_secs: u64,

    /// Max rows retained per streaming entry
    #[serde(default = "default_partial_limit")]
    pub partial_limit: usize,

    /// Entry budget for the local streaming table
    #[serde(default = "default_partial_max_entries")]
    pub partial_max_entries: usize,

    /// Pub/sub channel shared by every instance of a deployment
    #[serde(default = "default_invalidation_channel")]
    pub invalidation_channel: String,
}

fn default_namespace() -> String {
    "strata".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_l1_max_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_entries() -> usize {
    10_000
}

fn default_l1_fallback_ttl_secs() -> u64 {
    60
}

fn default_cache_enabled() -> bool {
    true
}

fn default_streaming_ttl_secs() -> u64 {
    30
}

fn default_partial_limit() -> usize {
    100
}

fn default_partial_max_entries() -> usize {
    1_000
}

fn default_invalidation_channel() -> String {
    "cache:invalidate".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_ttl_secs: default_ttl_secs(),
            l1_max_bytes: default_l1_max_bytes(),
            max_entries: default_max_entries(),
            l1_fallback_ttl_secs: default_l1_fallback_ttl_secs(),
            cache_enabled: default_cache_enabled(),
            streaming_ttl_secs: default_streaming_ttl_secs(),
            partial_limit: default_partial_limit(),
            partial_max_entries: default_partial_max_entries(),
            invalidation_channel: default_invalidation_channel(),
        }
    }
}

/// Longest TTL the cache honours (ten years). Longer TTLs, whether passed by
/// callers or read back from the shared tier, are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Clamp `ttl` to [`MAX_TTL`].
#[inline]
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_TTL)
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.is_empty() {
            return Err("cache.namespace must not be empty".into());
        }
        if self.namespace.contains([':', '#']) {
            return Err("cache.namespace must not contain ':' or '#'".into());
        }
        if self.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.l1_fallback_ttl_secs == 0 {
            return Err("cache.l1_fallback_ttl_secs must be > 0".into());
        }
        if self.streaming_ttl_secs == 0 {
            return Err("cache.streaming_ttl_secs must be > 0".into());
        }
        for (name, secs) in [
            ("default_ttl_secs", self.default_ttl_secs),
            ("l1_fallback_ttl_secs", self.l1_fallback_ttl_secs),
            ("streaming_ttl_secs", self.streaming_ttl_secs),
        ] {
            if secs > MAX_TTL.as_secs() {
                return Err(format!(
                    "cache.{name} must be at most {} (ten years)",
                    MAX_TTL.as_secs()
                ));
            }
        }
        if self.invalidation_channel.is_empty() {
            return Err("cache.invalidation_channel must not be empty".into());
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn l1_fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_fallback_ttl_secs)
    }

    pub fn streaming_ttl(&self) -> Duration {
        Duration::from_secs(self.streaming_ttl_secs)
    }
}

/// Redis configuration for the shared tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (local-only mode)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::StrataConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<StrataConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from("strata.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., STRATA__CACHE__NAMESPACE=orders
        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: StrataConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
