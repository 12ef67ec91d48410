//! Transport layer
//!
//! A [`Connector`] establishes an authenticated [`Connection`]; a connection
//! multiplexes any number of [`Channel`]s, each of which offers the remote
//! filesystem primitives the transfer handler needs.

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWrite;

pub mod local;
pub mod memory;
pub mod ssh;

pub use local::LocalConnector;
pub use memory::{MemoryConnector, Operation};
pub use ssh::SshConnector;

/// Writable remote stream returned by [`Channel::open_write`]
///
/// The remote handle is closed by `shutdown()`.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Directory entry returned by [`Channel::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    /// File name (no directory component)
    pub name: String,
    /// Size in bytes, when the remote reports it
    pub size: Option<u64>,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Protocol channel: one authenticated handle on a connection
#[async_trait]
pub trait Channel: Send {
    /// Open `path` for writing, truncating any existing file
    async fn open_write(&mut self, path: &str) -> Result<RemoteWriter>;

    /// Rename `from` to `to`, replacing `to` if it exists
    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Create a single directory (parent must exist)
    async fn mkdir(&mut self, path: &str) -> Result<()>;

    /// Check whether a file or directory exists
    async fn exists(&mut self, path: &str) -> Result<bool>;

    /// List the entries of a directory
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Close the channel. The connection stays up.
    async fn close(&mut self) -> Result<()>;
}

/// Underlying authenticated connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the connection is still usable
    fn is_connected(&self) -> bool;

    /// Open a new channel multiplexed over this connection
    async fn open_channel(&self) -> Result<Box<dyn Channel>>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<()>;
}

/// Establishes connections to one remote target
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform a full connect and authentication handshake
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Human readable target, used in logs
    fn target(&self) -> String;
}
