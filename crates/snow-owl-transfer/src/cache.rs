//! Caching session factory
//!
//! NIST 800-53: AC-10 (Concurrent Session Control), AC-12 (Session Termination)
//! Implementation: Bounded pool of reusable sessions with generation-based reset
//!
//! Sessions are checked out with [`CachingSessionFactory::get_session`] and go
//! back to the pool when the returned [`PooledSession`] is closed (or, as a
//! fallback, dropped). The number of checked-out sessions is bounded by a
//! semaphore; idle sessions hold no permit.
//!
//! Every session remembers the pool generation it was created in.
//! [`CachingSessionFactory::reset_cache`] bumps the generation, so sessions
//! handed out before the reset are disconnected when they come back instead
//! of being pooled again.

use crate::config::CacheConfig;
use crate::connection::ConnectionId;
use crate::factory::SessionFactory;
use crate::metrics::TransferMetrics;
use crate::session::Session;
use crate::transport::RemoteEntry;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sessions waiting in the pool
    pub idle: usize,
    /// Sessions currently handed out
    pub checked_out: usize,
    /// Current pool generation
    pub generation: u64,
    /// Configured bound (0 = unbounded)
    pub pool_limit: usize,
}

struct IdleSession {
    session: Box<dyn Session>,
    generation: u64,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleSession>,
    generation: u64,
    checked_out: usize,
    closed: bool,
}

struct CacheInner {
    factory: Arc<dyn SessionFactory>,
    config: CacheConfig,
    permits: Option<Arc<Semaphore>>,
    state: Mutex<PoolState>,
    metrics: TransferMetrics,
}

impl CacheInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a session to the pool
    ///
    /// Hands the session back when it has to be disconnected instead.
    fn check_in(&self, session: Box<dyn Session>, generation: u64) -> Option<Box<dyn Session>> {
        let mut state = self.lock_state();
        state.checked_out = state.checked_out.saturating_sub(1);

        if !state.closed && generation == state.generation && session.is_open() {
            debug!(connection = %session.connection_id(), "Session returned to pool");
            state.idle.push_back(IdleSession {
                session,
                generation,
            });
            None
        } else {
            Some(session)
        }
    }

    async fn disconnect(&self, mut session: Box<dyn Session>) {
        self.metrics.record_session_disconnected();
        if let Err(e) = session.close().await {
            warn!(connection = %session.connection_id(), "Failed to close session: {}", e);
        }
    }
}

/// Pool of reusable sessions over another [`SessionFactory`]
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct CachingSessionFactory {
    inner: Arc<CacheInner>,
}

impl CachingSessionFactory {
    /// Create a pool over `factory`
    pub fn new(factory: Arc<dyn SessionFactory>, config: CacheConfig) -> Self {
        Self::with_metrics(factory, config, TransferMetrics::new())
    }

    /// Create a pool that reports into an existing metrics collector
    pub fn with_metrics(
        factory: Arc<dyn SessionFactory>,
        config: CacheConfig,
        metrics: TransferMetrics,
    ) -> Self {
        let permits = (config.pool_limit > 0).then(|| Arc::new(Semaphore::new(config.pool_limit)));

        Self {
            inner: Arc::new(CacheInner {
                factory,
                config,
                permits,
                state: Mutex::new(PoolState::default()),
                metrics,
            }),
        }
    }

    /// Metrics collector of this pool
    pub fn metrics(&self) -> &TransferMetrics {
        &self.inner.metrics
    }

    /// Check out a session
    ///
    /// An idle session of the current generation is reused when there is
    /// one; otherwise a new one is created through the wrapped factory.
    ///
    /// # Errors
    ///
    /// - `Error::PoolExhausted` when the pool is at capacity and blocking is
    ///   disabled, or the configured wait timeout elapsed
    /// - `Error::FactoryClosed` after [`destroy`](Self::destroy)
    /// - whatever the wrapped factory returns when creating a session
    pub async fn get_session(&self) -> Result<PooledSession> {
        if self.inner.lock_state().closed {
            return Err(Error::FactoryClosed);
        }

        let permit = self.acquire_permit().await?;

        loop {
            let candidate = {
                let mut state = self.inner.lock_state();
                if state.closed {
                    return Err(Error::FactoryClosed);
                }
                match state.idle.pop_back() {
                    Some(idle) if idle.generation == state.generation && idle.session.is_open() => {
                        state.checked_out += 1;
                        Ok(idle)
                    }
                    Some(idle) => Err(Some(idle)),
                    None => Err(None),
                }
            };

            match candidate {
                Ok(idle) => {
                    debug!(connection = %idle.session.connection_id(), "Reusing pooled session");
                    self.inner.metrics.record_session_reused();
                    return Ok(PooledSession::new(
                        idle.session,
                        idle.generation,
                        permit,
                        Arc::clone(&self.inner),
                    ));
                }
                Err(Some(dead)) => {
                    debug!(connection = %dead.session.connection_id(), "Discarding unusable pooled session");
                    self.inner.disconnect(dead.session).await;
                }
                Err(None) => break,
            }
        }

        let generation = self.inner.lock_state().generation;
        let session = self.inner.factory.get_session().await?;

        let accepted = {
            let mut state = self.inner.lock_state();
            if !state.closed {
                state.checked_out += 1;
            }
            !state.closed
        };
        if !accepted {
            self.inner.disconnect(session).await;
            return Err(Error::FactoryClosed);
        }

        debug!(connection = %session.connection_id(), generation, "Created pooled session");
        Ok(PooledSession::new(
            session,
            generation,
            permit,
            Arc::clone(&self.inner),
        ))
    }

    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(permits) = &self.inner.permits else {
            return Ok(None);
        };
        let permits = Arc::clone(permits);
        let limit = self.inner.config.pool_limit;

        let acquired = if !self.inner.config.block_when_exhausted {
            match permits.try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(Error::pool_exhausted(format!(
                    "all {limit} sessions are checked out"
                ))),
                Err(TryAcquireError::Closed) => Err(Error::FactoryClosed),
            }
        } else if let Some(wait) = self.inner.config.session_wait_timeout() {
            match tokio::time::timeout(wait, permits.acquire_owned()).await {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(Error::FactoryClosed),
                Err(_) => Err(Error::pool_exhausted(format!(
                    "no session released within {}ms",
                    wait.as_millis()
                ))),
            }
        } else {
            permits
                .acquire_owned()
                .await
                .map_err(|_| Error::FactoryClosed)
        };

        if let Err(Error::PoolExhausted(reason)) = &acquired {
            warn!("Session pool exhausted: {}", reason);
            self.inner.metrics.record_pool_exhausted();
        }
        acquired.map(Some)
    }

    /// Invalidate every session created so far
    ///
    /// Idle sessions are disconnected now; checked-out sessions are
    /// disconnected when they are released. The wrapped factory is reset so
    /// that no later checkout runs over a connection established before.
    pub async fn reset_cache(&self) {
        let (drained, generation) = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            (state.idle.drain(..).collect::<Vec<_>>(), state.generation)
        };

        info!(generation, idle = drained.len(), "Resetting session cache");
        for idle in drained {
            self.inner.disconnect(idle.session).await;
        }
        self.inner.factory.reset().await;
    }

    /// Shut the pool down
    ///
    /// Idle sessions are disconnected, waiting and later checkouts fail with
    /// `Error::FactoryClosed`, and sessions released afterwards are
    /// disconnected rather than pooled.
    pub async fn destroy(&self) {
        let drained = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect::<Vec<_>>()
        };

        if let Some(permits) = &self.inner.permits {
            permits.close();
        }

        info!(idle = drained.len(), "Destroying session cache");
        for idle in drained {
            self.inner.disconnect(idle.session).await;
        }
        self.inner.factory.reset().await;
    }

    /// Whether [`destroy`](Self::destroy) has been called
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            generation: state.generation,
            pool_limit: self.inner.config.pool_limit,
        }
    }
}

#[async_trait]
impl SessionFactory for CachingSessionFactory {
    async fn get_session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(Self::get_session(self).await?))
    }

    async fn reset(&self) {
        self.reset_cache().await;
    }
}

/// Session checked out of a [`CachingSessionFactory`]
///
/// `close()` returns the session to its pool (or disconnects it when it is
/// stale). A pooled session dropped without `close()` is released the same
/// way, with any disconnect spawned onto the current runtime.
pub struct PooledSession {
    session: Option<Box<dyn Session>>,
    generation: u64,
    connection_id: ConnectionId,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<CacheInner>,
}

impl PooledSession {
    fn new(
        session: Box<dyn Session>,
        generation: u64,
        permit: Option<OwnedSemaphorePermit>,
        pool: Arc<CacheInner>,
    ) -> Self {
        Self {
            connection_id: session.connection_id(),
            session: Some(session),
            generation,
            permit,
            pool,
        }
    }

    /// Pool generation this session belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn active(&mut self) -> Result<&mut Box<dyn Session>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::remote(format!("session on {} was released", self.connection_id)))
    }
}

#[async_trait]
impl Session for PooledSession {
    async fn write(
        &mut self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<u64> {
        self.active()?.write(source, path).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.active()?.rename(from, to).await
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.active()?.mkdir(path).await
    }

    async fn exists(&mut self, path: &str) -> Result<bool> {
        self.active()?.exists(path).await
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.active()?.list(path).await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        if let Some(stale) = self.pool.check_in(session, self.generation) {
            debug!(connection = %self.connection_id, generation = self.generation, "Disconnecting released session");
            self.pool.disconnect(stale).await;
        }
        self.permit.take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.is_open())
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        // The permit is only released once a stale session is disconnected
        let permit = self.permit.take();
        if let Some(stale) = self.pool.check_in(session, self.generation) {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let pool = Arc::clone(&self.pool);
                    runtime.spawn(async move {
                        pool.disconnect(stale).await;
                        drop(permit);
                    });
                }
                Err(_) => {
                    warn!(connection = %self.connection_id, "No runtime available, dropping session without close");
                    drop(stale);
                    drop(permit);
                }
            }
        }
    }
}
