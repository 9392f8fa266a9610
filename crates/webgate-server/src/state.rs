//! Shared server state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;

use webgate_browser::{BrowserBackend, ContextPool, PoolConfig, SessionConfig, SessionManager};
use webgate_cache::{CacheConfig, CommandCache};
use webgate_config::Config;
use webgate_security::{Authenticator, InputSanitizer, RateLimitConfig, RateLimiter, SanitizerConfig};

/// Everything a connection handler needs, shared across connections.
pub struct AppState {
    pub config: Config,
    pub auth: Authenticator,
    pub limiter: RateLimiter,
    pub sanitizer: InputSanitizer,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<ContextPool>,
    pub cache: Arc<CommandCache>,
    pub shutdown: broadcast::Sender<()>,
    active_connections: AtomicUsize,
    /// Open connection count per client id, for disconnect-grace cleanup.
    connections_by_client: DashMap<String, usize>,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn BrowserBackend>) -> Arc<Self> {
        let pool = Arc::new(ContextPool::new(
            backend,
            PoolConfig {
                warm_target: config.pool.warm_target,
                hard_ceiling: config.pool.hard_ceiling,
                acquire_timeout: Duration::from_millis(config.pool.acquire_timeout_ms),
                max_age: Duration::from_secs(config.pool.max_age_seconds),
                maintain_interval: Duration::from_secs(config.pool.maintain_interval_seconds),
            },
        ));

        let cache = Arc::new(CommandCache::new(CacheConfig {
            capacity: config.cache.capacity,
            ttl: Duration::from_secs(config.cache.ttl_seconds),
        }));

        let sessions = Arc::new(SessionManager::with_cache(
            Arc::clone(&pool),
            Arc::clone(&cache),
            SessionConfig {
                idle_timeout: Duration::from_secs(config.server.session_idle_timeout_seconds),
                reap_interval: Duration::from_secs(config.server.reap_interval_seconds),
                viewport_width: config.browser.viewport_width,
                viewport_height: config.browser.viewport_height,
            },
        ));

        let auth = Authenticator::new(config.server.api_key.clone());
        if auth.required() {
            info!("API key authentication enabled");
        } else {
            info!("No API key configured; connections are unauthenticated");
        }

        let limiter = RateLimiter::new(RateLimitConfig {
            per_minute: config.server.rate_limit_per_minute,
            window: Duration::from_secs(60),
            reject_threshold: config.security.rate_limit_reject_threshold,
            reject_horizon: Duration::from_secs(60),
            block_duration: Duration::from_secs(config.security.rate_limit_block_seconds),
        });

        let sanitizer = InputSanitizer::new(SanitizerConfig {
            max_selector_length: config.security.max_selector_length,
            max_text_length: config.security.max_text_length,
            max_url_length: config.security.max_url_length,
            max_script_length: 5_000,
            allow_non_http_urls: config.security.allow_non_http_urls,
            allow_custom_js: config.security.allow_custom_js,
        });

        let (shutdown, _) = broadcast::channel(8);

        Arc::new(Self {
            config,
            auth,
            limiter,
            sanitizer,
            sessions,
            pool,
            cache,
            shutdown,
            active_connections: AtomicUsize::new(0),
            connections_by_client: DashMap::new(),
        })
    }

    /// Register a new connection. Returns `false` when the connection
    /// limit is reached.
    pub fn connection_opened(&self, client_id: &str) -> bool {
        let count = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.config.server.max_connections {
            self.active_connections.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        *self
            .connections_by_client
            .entry(client_id.to_string())
            .or_insert(0) += 1;
        true
    }

    /// Unregister a connection; returns whether it was the client's last.
    pub fn connection_closed(&self, client_id: &str) -> bool {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
        let mut last = false;
        self.connections_by_client
            .remove_if_mut(client_id, |_, count| {
                *count = count.saturating_sub(1);
                last = *count == 0;
                last
            });
        last
    }

    pub fn client_has_connections(&self, client_id: &str) -> bool {
        self.connections_by_client
            .get(client_id)
            .map(|count| *count > 0)
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webgate_browser::testing::MockBackend;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.server.max_connections = 2;
        AppState::new(config, Arc::new(MockBackend::new()))
    }

    #[test]
    fn test_connection_limit() {
        let state = state();
        assert!(state.connection_opened("a"));
        assert!(state.connection_opened("b"));
        assert!(!state.connection_opened("c"));
        assert_eq!(state.connection_count(), 2);
    }

    #[test]
    fn test_connection_close_tracks_last() {
        let state = state();
        assert!(state.connection_opened("a"));
        assert!(state.connection_opened("a"));

        assert!(!state.connection_closed("a"));
        assert!(state.client_has_connections("a"));
        assert!(state.connection_closed("a"));
        assert!(!state.client_has_connections("a"));
    }
}
