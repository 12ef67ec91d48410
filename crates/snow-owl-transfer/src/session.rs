//! Sessions
//!
//! A [`Session`] is what callers check out to talk to the remote host. The
//! concrete [`SftpSession`] wraps one protocol channel plus a lease on the
//! connection the channel runs over.

use crate::connection::{ConnectionId, ConnectionLease};
use crate::transport::{Channel, RemoteEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

/// Transfer primitives available on a checked-out session
#[async_trait]
pub trait Session: Send {
    /// Stream `source` into remote file `path`, closing the remote handle
    /// once the source is exhausted. Returns the number of bytes written.
    async fn write(
        &mut self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<u64>;

    /// Rename a remote file
    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Create one remote directory
    async fn mkdir(&mut self, path: &str) -> Result<()>;

    /// Check whether a remote path exists
    async fn exists(&mut self, path: &str) -> Result<bool>;

    /// List a remote directory
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Close the session. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Whether the session can still be used
    fn is_open(&self) -> bool;

    /// Underlying connection the session runs over
    fn connection_id(&self) -> ConnectionId;
}

/// Session over one SFTP channel
pub struct SftpSession {
    channel: Box<dyn Channel>,
    lease: ConnectionLease,
    connection_id: ConnectionId,
    open: bool,
}

impl SftpSession {
    /// Wrap an open channel and the lease on its connection
    pub fn new(channel: Box<dyn Channel>, lease: ConnectionLease, connection_id: ConnectionId) -> Self {
        Self {
            channel,
            lease,
            connection_id,
            open: true,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::remote(format!("session on {} is closed", self.connection_id)))
        }
    }
}

#[async_trait]
impl Session for SftpSession {
    async fn write(
        &mut self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<u64> {
        self.ensure_open()?;
        debug!(connection = %self.connection_id, "Writing {}", path);

        let mut remote = self.channel.open_write(path).await?;
        let written = tokio::io::copy(source, &mut remote)
            .await
            .map_err(|e| Error::remote(format!("write '{}': {}", path, e)))?;
        remote
            .shutdown()
            .await
            .map_err(|e| Error::remote(format!("close '{}': {}", path, e)))?;

        Ok(written)
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_open()?;
        debug!(connection = %self.connection_id, "Renaming {} to {}", from, to);
        self.channel.rename(from, to).await
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        debug!(connection = %self.connection_id, "Creating directory {}", path);
        self.channel.mkdir(path).await
    }

    async fn exists(&mut self, path: &str) -> Result<bool> {
        self.ensure_open()?;
        self.channel.exists(path).await
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.ensure_open()?;
        debug!(connection = %self.connection_id, "Listing {}", path);
        self.channel.list(path).await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let result = self.channel.close().await;
        if let Err(e) = &result {
            warn!(connection = %self.connection_id, "Failed to close channel: {}", e);
        }
        self.lease.release().await;
        result
    }

    fn is_open(&self) -> bool {
        self.open && self.lease.is_connected()
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::transport::{Connector, MemoryConnector};

    async fn open_session(connector: &MemoryConnector) -> SftpSession {
        let handle = ConnectionHandle::new(ConnectionId(7), connector.connect().await.unwrap(), true);
        let lease = handle.lease();
        let channel = handle.open_channel().await.unwrap();
        SftpSession::new(channel, lease, handle.id())
    }

    #[tokio::test]
    async fn test_write_streams_whole_source() {
        let connector = MemoryConnector::new();
        let mut session = open_session(&connector).await;

        let mut source: &[u8] = b"0123456789";
        let written = session.write(&mut source, "/data.bin").await.unwrap();

        assert_eq!(written, 10);
        assert_eq!(connector.file("/data.bin"), Some(b"0123456789".to_vec()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_disconnects_exclusive_connection() {
        let connector = MemoryConnector::new();
        let mut session = open_session(&connector).await;
        assert!(session.is_open());
        assert_eq!(session.connection_id(), ConnectionId(7));

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(!session.is_open());
        assert_eq!(connector.disconnect_count(), 1);
        assert!(session.exists("/").await.is_err());
    }

    #[tokio::test]
    async fn test_session_not_open_after_connection_drop() {
        let connector = MemoryConnector::new();
        let session = open_session(&connector).await;

        connector.drop_connection(0);
        assert!(!session.is_open());
    }
}
