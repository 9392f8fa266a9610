//! Session lifecycle and per-session serialized execution.
//!
//! Each session owns one pooled context, one page, and a dedicated
//! single-worker queue: commands for the same session execute strictly in
//! arrival order, while distinct sessions run in parallel up to the pool's
//! hard ceiling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use webgate_cache::{CommandCache, Lookup};
use webgate_protocol::{CommandFrame, ErrorBody, ErrorCode, ReplyPayload};

use crate::driver::PageDriver;
use crate::error::{PoolError, SessionError};
use crate::executor;
use crate::pool::{ContextLease, ContextPool};

/// Session-manager settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Sessions idle beyond this are reaped.
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3_600),
            reap_interval: Duration::from_secs(60),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// Shared, lock-free session bookkeeping.
pub struct SessionMeta {
    pub id: String,
    pub owner: String,
    created_at: Instant,
    /// Milliseconds since `created_at`; touched on command entry.
    last_activity_ms: AtomicU64,
    command_count: AtomicU64,
    executing: AtomicBool,
    needs_reset: AtomicBool,
}

impl SessionMeta {
    fn new(id: String, owner: String) -> Self {
        Self {
            id,
            owner,
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            command_count: AtomicU64::new(0),
            executing: AtomicBool::new(false),
            needs_reset: AtomicBool::new(false),
        }
    }

    /// Update last-activity; called on command entry, not completion, so
    /// long-running commands do not race the reaper.
    pub fn touch(&self) {
        let now = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::SeqCst);
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::SeqCst);
        self.created_at
            .elapsed()
            .saturating_sub(Duration::from_millis(last))
    }

    pub fn command_count(&self) -> u64 {
        self.command_count.load(Ordering::SeqCst)
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// Mark the page for a reset before its next command.
    pub fn mark_for_reset(&self) {
        self.needs_reset.store(true, Ordering::SeqCst);
    }
}

enum SessionJob {
    Execute {
        frame: CommandFrame,
        reply: oneshot::Sender<Result<ReplyPayload, ErrorBody>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
struct SessionHandle {
    meta: Arc<SessionMeta>,
    jobs: mpsc::Sender<SessionJob>,
}

/// Maps session ids to live sessions and runs their workers.
pub struct SessionManager {
    pool: Arc<ContextPool>,
    config: SessionConfig,
    /// Result cache consulted inside each session's serialized worker, so
    /// a queued extract can never observe state older than a queued
    /// mutation ahead of it.
    cache: Option<Arc<CommandCache>>,
    sessions: DashMap<String, SessionHandle>,
    /// Most recently created session per client, for empty-session-id frames.
    latest_by_client: DashMap<String, String>,
}

impl SessionManager {
    pub fn new(pool: Arc<ContextPool>, config: SessionConfig) -> Self {
        Self {
            pool,
            config,
            cache: None,
            sessions: DashMap::new(),
            latest_by_client: DashMap::new(),
        }
    }

    pub fn with_cache(
        pool: Arc<ContextPool>,
        cache: Arc<CommandCache>,
        config: SessionConfig,
    ) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new(pool, config)
        }
    }

    /// Create a session for a client: acquire a context, open a page,
    /// apply the viewport, spawn the worker. Fails fast with
    /// [`SessionError::Exhausted`] at the pool ceiling.
    pub async fn create(&self, client_id: &str) -> Result<String, SessionError> {
        let lease = self.pool.acquire().await.map_err(|e| match e {
            PoolError::Exhausted { .. } => SessionError::Exhausted,
            other => SessionError::Pool(other),
        })?;

        let page = match lease.context().open_page().await {
            Ok(page) => page,
            Err(e) => {
                self.pool.release(lease).await;
                return Err(SessionError::Browser(e));
            }
        };
        if let Err(e) = page
            .set_viewport(self.config.viewport_width, self.config.viewport_height)
            .await
        {
            warn!("Failed to set viewport: {}", e);
        }

        let session_id = Uuid::new_v4().to_string();
        let meta = Arc::new(SessionMeta::new(session_id.clone(), client_id.to_string()));
        meta.touch();

        let (jobs_tx, jobs_rx) = mpsc::channel(32);
        let handle = SessionHandle {
            meta: Arc::clone(&meta),
            jobs: jobs_tx,
        };
        self.sessions.insert(session_id.clone(), handle);
        self.latest_by_client
            .insert(client_id.to_string(), session_id.clone());

        let pool = Arc::clone(&self.pool);
        let cache = self.cache.clone();
        tokio::spawn(session_worker(meta, page, lease, pool, cache, jobs_rx));

        info!("Created browser session {} for client {}", session_id, client_id);
        Ok(session_id)
    }

    /// Look up a session, enforcing ownership.
    fn resolve(&self, session_id: &str, client_id: &str) -> Result<SessionHandle, SessionError> {
        let handle = self
            .sessions
            .get(session_id)
            .map(|h| h.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if handle.meta.owner != client_id {
            return Err(SessionError::NotOwned(session_id.to_string()));
        }
        Ok(handle)
    }

    /// Resolve the target session for a frame. An empty session id falls
    /// back to the client's most recent session, creating one on first use.
    pub async fn resolve_or_create(
        &self,
        session_id: &str,
        client_id: &str,
    ) -> Result<String, SessionError> {
        if !session_id.is_empty() {
            self.resolve(session_id, client_id)?;
            return Ok(session_id.to_string());
        }
        if let Some(latest) = self.latest_by_client.get(client_id) {
            let latest = latest.clone();
            if self.resolve(&latest, client_id).is_ok() {
                return Ok(latest);
            }
        }
        self.create(client_id).await
    }

    /// Enqueue a command on the session's worker and return the receiver
    /// for its result. Enqueueing happens in the caller's order, which
    /// preserves per-session arrival order.
    pub async fn submit(
        &self,
        session_id: &str,
        client_id: &str,
        frame: CommandFrame,
    ) -> Result<oneshot::Receiver<Result<ReplyPayload, ErrorBody>>, SessionError> {
        let handle = self.resolve(session_id, client_id)?;
        handle.meta.touch();

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .jobs
            .send(SessionJob::Execute {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Closing)?;
        Ok(reply_rx)
    }

    /// Close a session owned by the client.
    pub async fn close(&self, session_id: &str, client_id: &str) -> Result<(), SessionError> {
        let handle = self.resolve(session_id, client_id)?;
        self.close_handle(session_id, handle).await;
        Ok(())
    }

    async fn close_handle(&self, session_id: &str, handle: SessionHandle) {
        self.sessions.remove(session_id);
        self.latest_by_client
            .remove_if(&handle.meta.owner, |_, latest| latest == session_id);

        let (done_tx, done_rx) = oneshot::channel();
        if handle.jobs.send(SessionJob::Close { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
        info!(
            "Closed session {} (commands executed: {})",
            session_id,
            handle.meta.command_count()
        );
    }

    /// Session ids owned by a client.
    pub fn sessions_for_client(&self, client_id: &str) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().meta.owner == client_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Close every session a client owns (disconnect cleanup).
    pub async fn close_client_sessions(&self, client_id: &str) {
        for session_id in self.sessions_for_client(client_id) {
            if let Some((_, handle)) = self.sessions.remove(&session_id) {
                self.latest_by_client
                    .remove_if(client_id, |_, latest| latest == &session_id);
                let (done_tx, done_rx) = oneshot::channel();
                if handle.jobs.send(SessionJob::Close { done: done_tx }).await.is_ok() {
                    let _ = done_rx.await;
                }
                info!("Closed session {} on client {} disconnect", session_id, client_id);
            }
        }
    }

    /// One reaper sweep: close sessions idle beyond the threshold,
    /// deferring any that are actively executing.
    pub async fn reap(&self) -> usize {
        let expired: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .filter(|entry| {
                let meta = &entry.value().meta;
                meta.idle_for() > self.config.idle_timeout && !meta.is_executing()
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let count = expired.len();
        for (session_id, handle) in expired {
            info!("Session {} idle past threshold, reaping", session_id);
            self.close_handle(&session_id, handle).await;
        }
        count
    }

    /// Background reaper loop.
    pub async fn reap_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Session reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let reaped = self.reap().await;
                    if reaped > 0 {
                        info!("Reaped {} idle sessions", reaped);
                    }
                }
            }
        }
    }

    /// Close every session (shutdown path).
    pub async fn close_all(&self) {
        let all: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (session_id, handle) in all {
            self.close_handle(&session_id, handle).await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Per-session worker: executes jobs strictly in arrival order against the
/// session's page, then releases the context back to the pool.
async fn session_worker(
    meta: Arc<SessionMeta>,
    page: Box<dyn PageDriver>,
    lease: ContextLease,
    pool: Arc<ContextPool>,
    cache: Option<Arc<CommandCache>>,
    mut jobs: mpsc::Receiver<SessionJob>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            SessionJob::Execute { frame, reply } => {
                meta.executing.store(true, Ordering::SeqCst);
                meta.command_count.fetch_add(1, Ordering::SeqCst);

                if meta.needs_reset.swap(false, Ordering::SeqCst) {
                    debug!("Resetting page for session {} after cancelled command", meta.id);
                    if let Err(e) = page.reset().await {
                        error!("Page reset failed for session {}: {}", meta.id, e);
                    }
                }

                let result =
                    run_command(&meta, page.as_ref(), cache.as_deref(), &frame).await;

                meta.executing.store(false, Ordering::SeqCst);
                let _ = reply.send(result);
            }
            SessionJob::Close { done } => {
                if let Err(e) = page.close().await {
                    warn!("Error closing page for session {}: {}", meta.id, e);
                }
                pool.release(lease).await;
                let _ = done.send(());
                return;
            }
        }
    }

    // Channel dropped without an explicit close.
    if let Err(e) = page.close().await {
        warn!("Error closing page for session {}: {}", meta.id, e);
    }
    pool.release(lease).await;
    debug!("Session worker {} exited", meta.id);
}

/// Cache-aware command execution: read commands probe the cache (with
/// singleflight on a miss), mutating commands invalidate the session's
/// entries after running.
async fn run_command(
    meta: &SessionMeta,
    page: &dyn PageDriver,
    cache: Option<&CommandCache>,
    frame: &CommandFrame,
) -> Result<ReplyPayload, ErrorBody> {
    if let Some(cache) = cache {
        if let Some(key) = webgate_cache::fingerprint(&meta.id, &frame.action) {
            match cache.lookup(&key) {
                Lookup::Hit(payload) => {
                    debug!("Cache hit for session {} ({})", meta.id, frame.action.method());
                    return Ok(ReplyPayload::Extract(payload));
                }
                Lookup::Pending(rx) => {
                    if let Some(payload) = CommandCache::wait_for(rx).await {
                        return Ok(ReplyPayload::Extract(payload));
                    }
                    // The leader failed; execute without storing.
                    return execute_with_deadline(meta, page, frame).await;
                }
                Lookup::Miss(flight) => {
                    let result = execute_with_deadline(meta, page, frame).await;
                    if let Ok(ReplyPayload::Extract(payload)) = &result {
                        flight.complete(payload);
                    }
                    // An error drops the flight, releasing any followers.
                    return result;
                }
            }
        }

        let result = execute_with_deadline(meta, page, frame).await;
        if frame.action.is_mutating() {
            // Invalidate even on failure: a timed-out navigation may have
            // changed the page anyway.
            cache.invalidate_session(&meta.id);
        }
        return result;
    }

    execute_with_deadline(meta, page, frame).await
}

/// Enforce the per-command hard deadline around the executor.
async fn execute_with_deadline(
    meta: &SessionMeta,
    page: &dyn PageDriver,
    frame: &CommandFrame,
) -> Result<ReplyPayload, ErrorBody> {
    let timeout = Duration::from_millis(frame.timeout);
    match tokio::time::timeout(timeout, executor::execute(page, frame)).await {
        Ok(result) => result,
        Err(_) => {
            // The in-flight primitive was cancelled with the future; the
            // page gets a reset before its next command.
            meta.mark_for_reset();
            Err(ErrorBody::new(
                ErrorCode::Timeout,
                format!("Command timed out after {}ms", frame.timeout),
            )
            .with_detail("timeout_ms", frame.timeout))
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
