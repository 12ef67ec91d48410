//! Session factories
//!
//! NIST 800-53: AC-10 (Concurrent Session Control), SC-23 (Session Authenticity)
//!
//! [`DefaultSessionFactory`] turns a [`Connector`] into sessions. In the
//! default mode every session gets its own connection. In shared mode a
//! single connection is opened lazily and every session gets its own channel
//! on it; the factory owns that connection and replaces it transparently once
//! it drops.

use crate::config::SessionConfig;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::metrics::TransferMetrics;
use crate::session::{Session, SftpSession};
use crate::transport::{Connector, SshConnector};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Produces sessions on demand
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Check out a new session
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` when the transport cannot be established or
    /// authenticated.
    async fn get_session(&self) -> Result<Box<dyn Session>>;

    /// Stop reusing connections established so far
    ///
    /// Sessions already handed out keep working. The default does nothing.
    async fn reset(&self) {}
}

/// Session factory over a [`Connector`]
pub struct DefaultSessionFactory {
    connector: Arc<dyn Connector>,
    shared_session: bool,
    shared: Mutex<Option<Arc<ConnectionHandle>>>,
    next_connection_id: AtomicU64,
    metrics: TransferMetrics,
}

impl DefaultSessionFactory {
    /// Create a factory. With `shared_session` every session shares one connection.
    pub fn new(connector: impl Connector + 'static, shared_session: bool) -> Self {
        Self::with_connector(Arc::new(connector), shared_session)
    }

    /// Create a factory over an already shared connector
    pub fn with_connector(connector: Arc<dyn Connector>, shared_session: bool) -> Self {
        Self {
            connector,
            shared_session,
            shared: Mutex::new(None),
            next_connection_id: AtomicU64::new(1),
            metrics: TransferMetrics::new(),
        }
    }

    /// SSH/SFTP factory from session settings
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the credentials are incomplete.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Ok(Self::new(SshConnector::new(config)?, config.shared_session))
    }

    /// Report into an existing metrics collector
    pub fn with_metrics(mut self, metrics: TransferMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    async fn establish(&self, retired: bool) -> Result<Arc<ConnectionHandle>> {
        let connection = self.connector.connect().await?;
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        self.metrics.record_connection_opened();
        info!(connection = %id, shared = !retired, "Established connection to {}", self.connector.target());
        Ok(ConnectionHandle::new(id, connection, retired))
    }

    /// The live shared connection, establishing or replacing it as needed
    async fn shared_connection(&self) -> Result<Arc<ConnectionHandle>> {
        let mut shared = self.shared.lock().await;

        if let Some(handle) = shared.as_ref() {
            if handle.is_connected() {
                return Ok(Arc::clone(handle));
            }
        }

        if let Some(stale) = shared.take() {
            debug!(connection = %stale.id(), "Shared connection lost, replacing it");
            stale.retire().await;
        }

        let handle = self.establish(false).await?;
        *shared = Some(Arc::clone(&handle));
        Ok(handle)
    }
}

#[async_trait]
impl SessionFactory for DefaultSessionFactory {
    async fn get_session(&self) -> Result<Box<dyn Session>> {
        let handle = if self.shared_session {
            self.shared_connection().await?
        } else {
            self.establish(true).await?
        };

        let mut lease = handle.lease();
        match handle.open_channel().await {
            Ok(channel) => {
                self.metrics.record_session_created();
                Ok(Box::new(SftpSession::new(channel, lease, handle.id())))
            }
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    async fn reset(&self) {
        if let Some(handle) = self.shared.lock().await.take() {
            info!(connection = %handle.id(), "Resetting shared connection");
            handle.retire().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;

    #[tokio::test]
    async fn test_not_shared_opens_connection_per_session() {
        let connector = MemoryConnector::new();
        let factory = DefaultSessionFactory::new(connector.clone(), false);

        let s1 = factory.get_session().await.unwrap();
        let s2 = factory.get_session().await.unwrap();

        assert_ne!(s1.connection_id(), s2.connection_id());
        assert_eq!(connector.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_shared_reuses_live_connection() {
        let connector = MemoryConnector::new();
        let factory = DefaultSessionFactory::new(connector.clone(), true);

        let mut s1 = factory.get_session().await.unwrap();
        let s2 = factory.get_session().await.unwrap();

        assert_eq!(s1.connection_id(), s2.connection_id());
        assert_eq!(connector.connections_opened(), 1);

        // Closing one logical session leaves the shared connection up
        s1.close().await.unwrap();
        assert!(s2.is_open());
        assert_eq!(connector.disconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_replaces_dropped_connection() {
        let connector = MemoryConnector::new();
        let factory = DefaultSessionFactory::new(connector.clone(), true);

        let s1 = factory.get_session().await.unwrap();
        connector.drop_connection(0);
        let s2 = factory.get_session().await.unwrap();

        assert_ne!(s1.connection_id(), s2.connection_id());
        assert!(s2.is_open());
        assert_eq!(connector.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_reset_retires_shared_connection_after_last_session() {
        let connector = MemoryConnector::new();
        let factory = DefaultSessionFactory::new(connector.clone(), true);

        let mut s1 = factory.get_session().await.unwrap();
        factory.reset().await;
        assert!(connector.is_connected(0));

        let s2 = factory.get_session().await.unwrap();
        assert_ne!(s1.connection_id(), s2.connection_id());

        s1.close().await.unwrap();
        assert!(!connector.is_connected(0));
        assert!(connector.is_connected(1));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let connector = MemoryConnector::new();
        connector.refuse_connections(true);
        let factory = DefaultSessionFactory::new(connector, false);

        let result = factory.get_session().await;
        assert!(matches!(result, Err(crate::Error::Connection(_))));
    }
}
