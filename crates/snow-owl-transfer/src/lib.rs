//! # Snow Owl Transfer
//!
//! Remote file transfer over SSH/SFTP with pooled sessions and atomic file
//! placement.
//!
//! The transport follows:
//! - RFC 4251-4254: SSH Protocol Architecture, Authentication, Transport, Connection
//! - draft-ietf-secsh-filexfer-02: SSH File Transfer Protocol
//!
//! ## Building blocks
//!
//! - [`DefaultSessionFactory`]: sessions on a connection each, or all sharing one
//! - [`CachingSessionFactory`]: bounded pool of reusable sessions with
//!   generation-based reset
//! - [`RemoteFileWriter`]: creates the remote directory when asked to, writes
//!   to a temporary name and renames it into place
//!
//! ## Example
//!
//! ```no_run
//! use snow_owl_transfer::{
//!     CacheConfig, CachingSessionFactory, DefaultSessionFactory, Payload,
//!     RemoteFileWriter, SessionConfig, TransferHint,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> snow_owl_transfer::Result<()> {
//! let mut session = SessionConfig::default();
//! session.host = "files.example.net".into();
//! session.password = Some("secret".into());
//!
//! let factory = DefaultSessionFactory::from_config(&session)?;
//! let cache = CachingSessionFactory::new(Arc::new(factory), CacheConfig::default());
//! let writer = RemoteFileWriter::new(Arc::new(cache), "/incoming").with_auto_create_directory(true);
//!
//! writer.handle(Payload::from("hello"), &TransferHint::named("hello.txt")).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod handler;
pub mod metrics;
pub mod naming;
pub mod payload;
pub mod session;
pub mod transport;

pub use cache::{CachingSessionFactory, PoolStats, PooledSession};
pub use config::{CacheConfig, Config, LogFormat, LoggingConfig, SessionConfig, WriterConfig};
pub use connection::ConnectionId;
pub use error::{Error, Result};
pub use factory::{DefaultSessionFactory, SessionFactory};
pub use handler::{RemoteDirectory, RemoteFileWriter};
pub use metrics::{MetricsSnapshot, TransferMetrics};
pub use naming::{DefaultFileNameGenerator, FileNameGenerator};
pub use payload::{Payload, TransferHint, TransferReceipt};
pub use session::Session;
pub use transport::{LocalConnector, MemoryConnector, Operation, RemoteEntry, SshConnector};
