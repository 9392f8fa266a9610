//! Warm pool of isolated browser contexts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::driver::{BrowserBackend, ContextHandle};
use crate::error::PoolError;

/// Pool sizing and lifetime settings.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Contexts kept ready for immediate attachment.
    pub warm_target: usize,
    /// Ceiling on live contexts, warm or leased.
    pub hard_ceiling: usize,
    /// How long `acquire` waits at the ceiling before failing.
    pub acquire_timeout: Duration,
    /// Contexts older than this are retired instead of rewarmed.
    pub max_age: Duration,
    pub maintain_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            warm_target: 2,
            hard_ceiling: 10,
            acquire_timeout: Duration::from_secs(5),
            max_age: Duration::from_secs(1_800),
            maintain_interval: Duration::from_secs(30),
        }
    }
}

/// Pool counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub discarded: u64,
    pub reused: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
}

struct WarmContext {
    handle: Box<dyn ContextHandle>,
    created_at: Instant,
    permit: OwnedSemaphorePermit,
}

/// A context checked out of the pool. Holding the lease holds one slot of
/// the hard ceiling; hand it back with [`ContextPool::release`].
pub struct ContextLease {
    handle: Option<Box<dyn ContextHandle>>,
    created_at: Instant,
    permit: Option<OwnedSemaphorePermit>,
}

impl std::fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl ContextLease {
    pub fn context(&self) -> &dyn ContextHandle {
        self.handle
            .as_deref()
            .expect("lease accessed after release")
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// The pool itself. Live contexts (warm + leased) never exceed the hard
/// ceiling: every context holds a semaphore permit for its lifetime.
pub struct ContextPool {
    backend: Arc<dyn BrowserBackend>,
    config: PoolConfig,
    warm: Mutex<VecDeque<WarmContext>>,
    slots: Arc<Semaphore>,
    created: AtomicU64,
    discarded: AtomicU64,
    reused: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
}

impl ContextPool {
    pub fn new(backend: Arc<dyn BrowserBackend>, config: PoolConfig) -> Self {
        Self {
            backend,
            slots: Arc::new(Semaphore::new(config.hard_ceiling)),
            config,
            warm: Mutex::new(VecDeque::new()),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
        }
    }

    /// Check a context out of the pool, creating one when no warm context
    /// is available. At the ceiling this waits up to `acquire_timeout`
    /// before failing with [`PoolError::Exhausted`].
    pub async fn acquire(&self) -> Result<ContextLease, PoolError> {
        if let Some(warm) = self.pop_warm() {
            self.pool_hits.fetch_add(1, Ordering::Relaxed);
            self.reused.fetch_add(1, Ordering::Relaxed);
            debug!("Reusing warm context {}", warm.handle.id());
            return Ok(ContextLease {
                handle: Some(warm.handle),
                created_at: warm.created_at,
                permit: Some(warm.permit),
            });
        }

        self.pool_misses.fetch_add(1, Ordering::Relaxed);
        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::Exhausted {
            ceiling: self.config.hard_ceiling,
        })?
        .map_err(|_| PoolError::Exhausted {
            ceiling: self.config.hard_ceiling,
        })?;

        let handle = self.backend.create_context().await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!("Created context {}", handle.id());

        Ok(ContextLease {
            handle: Some(handle),
            created_at: Instant::now(),
            permit: Some(permit),
        })
    }

    /// Return a lease. Healthy contexts young enough go back on the warm
    /// list; everything else is discarded, freeing its ceiling slot.
    pub async fn release(&self, mut lease: ContextLease) {
        let Some(handle) = lease.handle.take() else {
            return;
        };
        let permit = lease.permit.take();

        let too_old = lease.created_at.elapsed() > self.config.max_age;
        let healthy = !too_old && handle.is_healthy().await;

        if healthy {
            let mut warm = self.warm.lock();
            if warm.len() < self.config.warm_target {
                debug!("Returning context {} to warm pool", handle.id());
                if let Some(permit) = permit {
                    warm.push_back(WarmContext {
                        handle,
                        created_at: lease.created_at,
                        permit,
                    });
                }
                return;
            }
        }

        if too_old {
            debug!("Retiring context {} past max age", handle.id());
        }
        self.discard(handle).await;
        // Permit drops here, freeing the ceiling slot.
    }

    async fn discard(&self, handle: Box<dyn ContextHandle>) {
        if let Err(e) = handle.close().await {
            warn!("Error closing context {}: {}", handle.id(), e);
        }
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_warm(&self) -> Option<WarmContext> {
        self.warm.lock().pop_front()
    }

    /// Top the warm list back up to the target without blocking on the
    /// ceiling; skipped slots are simply left for in-use contexts.
    pub async fn replenish(&self) {
        loop {
            if self.warm.lock().len() >= self.config.warm_target {
                return;
            }
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                return;
            };
            match self.backend.create_context().await {
                Ok(handle) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    debug!("Replenished warm context {}", handle.id());
                    self.warm.lock().push_back(WarmContext {
                        handle,
                        created_at: Instant::now(),
                        permit,
                    });
                }
                Err(e) => {
                    warn!("Failed to replenish context pool: {}", e);
                    return;
                }
            }
        }
    }

    /// Background maintainer: replenish on an interval until shutdown.
    pub async fn maintain(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.maintain_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Pool maintainer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.replenish().await;
                }
            }
        }
    }

    /// Close every warm context (shutdown path).
    pub async fn drain(&self) {
        let drained: Vec<WarmContext> = {
            let mut warm = self.warm.lock();
            warm.drain(..).collect()
        };
        for ctx in drained {
            self.discard(ctx.handle).await;
        }
    }

    pub fn warm_len(&self) -> usize {
        self.warm.lock().len()
    }

    /// Live contexts currently counted against the ceiling.
    pub fn live(&self) -> usize {
        self.config.hard_ceiling - self.slots.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn pool(backend: Arc<MockBackend>, config: PoolConfig) -> ContextPool {
        ContextPool::new(backend, config)
    }

    #[tokio::test]
    async fn test_acquire_creates_then_reuses() {
        let backend = Arc::new(MockBackend::new());
        let pool = pool(backend.clone(), PoolConfig::default());

        let lease = pool.acquire().await.unwrap();
        assert_eq!(backend.contexts_created(), 1);
        pool.release(lease).await;
        assert_eq!(pool.warm_len(), 1);

        let _lease = pool.acquire().await.unwrap();
        assert_eq!(backend.contexts_created(), 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[tokio::test]
    async fn test_ceiling_blocks_then_fails() {
        let backend = Arc::new(MockBackend::new());
        let config = PoolConfig {
            hard_ceiling: 2,
            acquire_timeout: Duration::from_millis(50),
            ..PoolConfig::default()
        };
        let pool = pool(backend, config);

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.live(), 2);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { ceiling: 2 }));
    }

    #[tokio::test]
    async fn test_release_frees_ceiling_slot() {
        let backend = Arc::new(MockBackend::new());
        let config = PoolConfig {
            hard_ceiling: 1,
            warm_target: 0,
            acquire_timeout: Duration::from_millis(50),
            ..PoolConfig::default()
        };
        let pool = pool(backend, config);

        let lease = pool.acquire().await.unwrap();
        pool.release(lease).await;
        // warm_target 0 means the context was discarded and the slot freed.
        assert_eq!(pool.warm_len(), 0);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_context_discarded_on_release() {
        let backend = Arc::new(MockBackend::new());
        let pool = pool(backend.clone(), PoolConfig::default());

        let lease = pool.acquire().await.unwrap();
        backend.poison_context(lease.context().id());
        pool.release(lease).await;

        assert_eq!(pool.warm_len(), 0);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_old_context_retired_on_release() {
        let backend = Arc::new(MockBackend::new());
        let config = PoolConfig {
            max_age: Duration::from_millis(0),
            ..PoolConfig::default()
        };
        let pool = pool(backend, config);

        let lease = pool.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.release(lease).await;
        assert_eq!(pool.warm_len(), 0);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_replenish_reaches_warm_target() {
        let backend = Arc::new(MockBackend::new());
        let config = PoolConfig {
            warm_target: 3,
            ..PoolConfig::default()
        };
        let pool = pool(backend.clone(), config);

        pool.replenish().await;
        assert_eq!(pool.warm_len(), 3);
        assert_eq!(backend.contexts_created(), 3);

        // Idempotent once at target.
        pool.replenish().await;
        assert_eq!(pool.warm_len(), 3);
    }

    #[tokio::test]
    async fn test_replenish_respects_ceiling() {
        let backend = Arc::new(MockBackend::new());
        let config = PoolConfig {
            warm_target: 3,
            hard_ceiling: 2,
            ..PoolConfig::default()
        };
        let pool = pool(backend, config);
        pool.replenish().await;
        assert_eq!(pool.warm_len(), 2);
    }

    #[tokio::test]
    async fn test_drain_closes_warm_contexts() {
        let backend = Arc::new(MockBackend::new());
        let config = PoolConfig {
            warm_target: 2,
            ..PoolConfig::default()
        };
        let pool = pool(backend, config);
        pool.replenish().await;
        pool.drain().await;
        assert_eq!(pool.warm_len(), 0);
        assert_eq!(pool.stats().discarded, 2);
    }
}
