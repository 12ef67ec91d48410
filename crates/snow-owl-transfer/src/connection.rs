//! Lease-counted connection handles
//!
//! NIST 800-53: AC-12 (Session Termination), SC-23 (Session Authenticity)
//! Implementation: A connection is disconnected exactly once, and only after
//! the last session using it has let go.
//!
//! A [`ConnectionHandle`] owns one [`Connection`]. Sessions never own the
//! connection: they hold a [`ConnectionLease`]. A handle is *retired* when
//! nothing will open new sessions on it any more (a non-shared connection is
//! born retired; a shared one is retired when its factory replaces or resets
//! it). The connection is torn down when a retired handle has no leases left.

use crate::transport::{Channel, Connection};
use crate::Result;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Identity of an established underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct LeaseState {
    leases: usize,
    retired: bool,
    disconnected: bool,
}

impl LeaseState {
    /// Claim the teardown if it is due. Returns `true` at most once.
    fn claim_teardown(&mut self) -> bool {
        if self.retired && self.leases == 0 && !self.disconnected {
            self.disconnected = true;
            true
        } else {
            false
        }
    }
}

/// Owner of one underlying connection
pub struct ConnectionHandle {
    id: ConnectionId,
    connection: Box<dyn Connection>,
    state: Mutex<LeaseState>,
}

impl ConnectionHandle {
    /// Wrap a freshly established connection
    ///
    /// `retired` marks a connection that will never be shared; it is torn down
    /// as soon as its only lease is returned.
    pub fn new(id: ConnectionId, connection: Box<dyn Connection>, retired: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            connection,
            state: Mutex::new(LeaseState {
                retired,
                ..LeaseState::default()
            }),
        })
    }

    /// Connection identity
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the handle is still usable for new sessions
    pub fn is_connected(&self) -> bool {
        !self.lock_state().disconnected && self.connection.is_connected()
    }

    /// Number of sessions currently holding this connection
    pub fn lease_count(&self) -> usize {
        self.lock_state().leases
    }

    /// Take a lease on this connection
    pub fn lease(self: &Arc<Self>) -> ConnectionLease {
        self.lock_state().leases += 1;
        ConnectionLease {
            handle: Some(Arc::clone(self)),
        }
    }

    /// Open a channel over the connection
    ///
    /// # Errors
    ///
    /// Returns the transport error when the channel cannot be opened.
    pub async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        self.connection.open_channel().await
    }

    /// Stop handing this connection out; disconnect it once unused
    pub async fn retire(&self) {
        let teardown = {
            let mut state = self.lock_state();
            state.retired = true;
            state.claim_teardown()
        };

        if teardown {
            self.disconnect().await;
        } else {
            debug!(connection = %self.id, "Connection retired, waiting for leases to drain");
        }
    }

    fn release(&self) -> bool {
        let mut state = self.lock_state();
        state.leases = state.leases.saturating_sub(1);
        state.claim_teardown()
    }

    async fn disconnect(&self) {
        debug!(connection = %self.id, "Disconnecting");
        if let Err(e) = self.connection.disconnect().await {
            warn!(connection = %self.id, "Disconnect failed: {}", e);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

/// Non-owning reference held by a session
///
/// Returning the lease with [`ConnectionLease::release`] may disconnect the
/// connection. A lease dropped without release hands the teardown to the
/// current tokio runtime.
#[derive(Debug)]
pub struct ConnectionLease {
    handle: Option<Arc<ConnectionHandle>>,
}

impl ConnectionLease {
    /// Connection identity
    pub fn id(&self) -> Option<ConnectionId> {
        self.handle.as_ref().map(|handle| handle.id())
    }

    /// Whether the leased connection is still usable
    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.is_connected())
    }

    /// Return the lease. Idempotent.
    pub async fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.release() {
                handle.disconnect().await;
            }
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.release() {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            handle.disconnect().await;
                        });
                    }
                    Err(_) => {
                        warn!(connection = %handle.id(), "No runtime available, dropping connection without disconnect");
                    }
                }
            }
        }
    }
}
