//! Configuration schema with defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub browser: BrowserSection,
    pub pool: PoolSection,
    pub cache: CacheSection,
    pub security: SecuritySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Shared secret; `None` disables authentication.
    pub api_key: Option<String>,
    pub rate_limit_per_minute: u32,
    pub max_connections: usize,
    pub session_idle_timeout_seconds: u64,
    /// How often the reaper scans for idle sessions.
    pub reap_interval_seconds: u64,
    /// Sessions survive a disconnect this long before being closed.
    pub disconnect_grace_seconds: u64,
    /// In-flight drain budget on shutdown.
    pub shutdown_grace_seconds: u64,
    /// Consecutive malformed frames tolerated before the connection closes.
    pub malformed_frame_limit: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
            rate_limit_per_minute: 60,
            max_connections: 50,
            session_idle_timeout_seconds: 3_600,
            reap_interval_seconds: 60,
            disconnect_grace_seconds: 5,
            shutdown_grace_seconds: 10,
            malformed_frame_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub headless: bool,
    /// Explicit Chrome binary; autodetected when unset.
    pub chrome_executable: Option<String>,
    pub debug_port: u16,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub default_command_timeout_ms: u64,
    pub max_command_timeout_ms: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            debug_port: 9222,
            viewport_width: 1280,
            viewport_height: 720,
            default_command_timeout_ms: 30_000,
            max_command_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Contexts kept warm and ready for attachment.
    pub warm_target: usize,
    /// Absolute ceiling on live contexts (and therefore sessions).
    pub hard_ceiling: usize,
    pub acquire_timeout_ms: u64,
    /// Contexts older than this are retired at release.
    pub max_age_seconds: u64,
    pub maintain_interval_seconds: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            warm_target: 2,
            hard_ceiling: 10,
            acquire_timeout_ms: 5_000,
            max_age_seconds: 1_800,
            maintain_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub allow_non_http_urls: bool,
    pub allow_custom_js: bool,
    pub max_selector_length: usize,
    pub max_text_length: usize,
    pub max_url_length: usize,
    pub rate_limit_reject_threshold: u32,
    pub rate_limit_block_seconds: u64,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allow_non_http_urls: false,
            allow_custom_js: false,
            max_selector_length: 1_000,
            max_text_length: 10_000,
            max_url_length: 2_048,
            rate_limit_reject_threshold: 10,
            rate_limit_block_seconds: 60,
        }
    }
}

impl Config {
    /// Cross-field sanity checks applied after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.hard_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "pool.hard_ceiling must be at least 1".to_string(),
            ));
        }
        if self.pool.warm_target > self.pool.hard_ceiling {
            return Err(ConfigError::Invalid(format!(
                "pool.warm_target ({}) exceeds pool.hard_ceiling ({})",
                self.pool.warm_target, self.pool.hard_ceiling
            )));
        }
        if self.browser.default_command_timeout_ms > self.browser.max_command_timeout_ms {
            return Err(ConfigError::Invalid(
                "browser.default_command_timeout_ms exceeds max_command_timeout_ms".to_string(),
            ));
        }
        if let Some(key) = &self.server.api_key {
            if !key.is_empty() && key.len() < 16 {
                return Err(ConfigError::Invalid(
                    "server.api_key must be at least 16 characters".to_string(),
                ));
            }
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
