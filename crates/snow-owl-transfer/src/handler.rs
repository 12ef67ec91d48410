//! Remote file writing
//!
//! NIST 800-53: SI-7 (Software, Firmware, and Information Integrity), AU-12
//! Implementation: Readers of the remote directory never observe a partially
//! written file under its final name
//!
//! [`RemoteFileWriter::handle`] uploads one payload:
//!
//! 1. resolve the remote directory and the file name
//! 2. check out a session
//! 3. make sure the directory exists, creating missing segments left to
//!    right when auto-create is enabled
//! 4. stream the payload to `<name><temporary suffix>`
//! 5. rename the temporary file to its final name
//! 6. release the session, whatever the outcome
//!
//! The rename is the atomicity boundary. It is only as atomic as the remote
//! server's rename.

use crate::config::WriterConfig;
use crate::factory::SessionFactory;
use crate::metrics::TransferMetrics;
use crate::naming::{validate_file_name, DefaultFileNameGenerator, FileNameGenerator};
use crate::payload::{Payload, TransferHint, TransferReceipt};
use crate::session::Session;
use crate::transport::RemoteEntry;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// Default suffix of in-progress uploads
pub const DEFAULT_TEMPORARY_FILE_SUFFIX: &str = ".writing";

/// Computes a remote directory per transfer
pub type DirectoryExpression = Arc<dyn Fn(&Payload, &TransferHint) -> String + Send + Sync>;

/// Where uploads land
#[derive(Clone)]
pub enum RemoteDirectory {
    /// Fixed directory
    Literal(String),
    /// Directory computed from each payload
    Expression(DirectoryExpression),
}

impl RemoteDirectory {
    /// Directory computed per payload
    pub fn expression<F>(f: F) -> Self
    where
        F: Fn(&Payload, &TransferHint) -> String + Send + Sync + 'static,
    {
        Self::Expression(Arc::new(f))
    }

    fn resolve(&self, payload: &Payload, hint: &TransferHint) -> String {
        match self {
            Self::Literal(directory) => directory.clone(),
            Self::Expression(expression) => expression(payload, hint),
        }
    }
}

impl fmt::Debug for RemoteDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(directory) => f.debug_tuple("Literal").field(directory).finish(),
            Self::Expression(_) => f.write_str("Expression(..)"),
        }
    }
}

impl From<&str> for RemoteDirectory {
    fn from(directory: &str) -> Self {
        Self::Literal(directory.to_string())
    }
}

impl From<String> for RemoteDirectory {
    fn from(directory: String) -> Self {
        Self::Literal(directory)
    }
}

/// Cumulative prefixes of a slash-delimited directory, shortest first
///
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`. Empty segments are skipped and a
/// relative directory yields relative prefixes.
pub fn directory_segments(directory: &str) -> Vec<String> {
    let root = if directory.starts_with('/') { "/" } else { "" };
    let mut current = String::from(root);
    let mut segments = Vec::new();

    for part in directory.split('/').filter(|part| !part.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        segments.push(current.clone());
    }
    segments
}

/// Join a remote directory and a file name
pub fn remote_path(directory: &str, file_name: &str) -> String {
    if directory.is_empty() {
        file_name.to_string()
    } else if directory.ends_with('/') {
        format!("{directory}{file_name}")
    } else {
        format!("{directory}/{file_name}")
    }
}

/// Uploads payloads to a remote directory through pooled sessions
pub struct RemoteFileWriter {
    sessions: Arc<dyn SessionFactory>,
    remote_directory: RemoteDirectory,
    auto_create_directory: bool,
    temporary_file_suffix: String,
    file_name_generator: Arc<dyn FileNameGenerator>,
    metrics: TransferMetrics,
}

impl RemoteFileWriter {
    /// Create a writer uploading into `remote_directory`
    pub fn new(sessions: Arc<dyn SessionFactory>, remote_directory: impl Into<RemoteDirectory>) -> Self {
        Self {
            sessions,
            remote_directory: remote_directory.into(),
            auto_create_directory: false,
            temporary_file_suffix: DEFAULT_TEMPORARY_FILE_SUFFIX.to_string(),
            file_name_generator: Arc::new(DefaultFileNameGenerator),
            metrics: TransferMetrics::new(),
        }
    }

    /// Create a writer from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unusable temporary file suffix.
    pub fn from_config(sessions: Arc<dyn SessionFactory>, config: &WriterConfig) -> Result<Self> {
        Ok(Self::new(sessions, config.remote_directory.as_str())
            .with_auto_create_directory(config.auto_create_directory)
            .with_temporary_file_suffix(&config.temporary_file_suffix)?)
    }

    /// Create missing directory segments before writing
    pub fn with_auto_create_directory(mut self, enabled: bool) -> Self {
        self.auto_create_directory = enabled;
        self
    }

    /// Suffix appended to the file name while the upload is in progress
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the suffix is empty or contains `/`.
    pub fn with_temporary_file_suffix(mut self, suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        if suffix.is_empty() || suffix.contains('/') {
            return Err(Error::Config(format!(
                "invalid temporary file suffix '{}'",
                suffix
            )));
        }
        self.temporary_file_suffix = suffix;
        Ok(self)
    }

    /// Use a custom file name generator
    pub fn with_file_name_generator(mut self, generator: impl FileNameGenerator + 'static) -> Self {
        self.file_name_generator = Arc::new(generator);
        self
    }

    /// Report into an existing metrics collector
    pub fn with_metrics(mut self, metrics: TransferMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics collector of this writer
    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    /// Upload one payload
    ///
    /// # Errors
    ///
    /// - `Error::InvalidPath` for an unusable generated file name
    /// - `Error::Connection`, `Error::PoolExhausted` or `Error::FactoryClosed`
    ///   when no session can be checked out
    /// - `Error::RemoteDirectoryMissing` when the directory is missing and
    ///   auto-create is disabled
    /// - `Error::DirectoryCreation` when a directory segment cannot be created
    /// - `Error::Transfer` when writing or renaming fails; the temporary file
    ///   may be left on the remote host
    pub async fn handle(&self, payload: Payload, hint: &TransferHint) -> Result<TransferReceipt> {
        let result = self.upload(payload, hint).await;
        match &result {
            Ok(receipt) => {
                self.metrics.record_transfer(receipt.bytes);
                info!(
                    connection = %receipt.connection,
                    bytes = receipt.bytes,
                    "Uploaded {}",
                    receipt.remote_path
                );
            }
            Err(e) => {
                self.metrics.record_transfer_failed();
                warn!("Upload failed: {}", e);
            }
        }
        result
    }

    async fn upload(&self, payload: Payload, hint: &TransferHint) -> Result<TransferReceipt> {
        let directory = match &hint.remote_directory {
            Some(directory) => directory.clone(),
            None => self.remote_directory.resolve(&payload, hint),
        };
        let file_name = self.file_name_generator.generate(&payload, hint)?;
        validate_file_name(&file_name)?;

        let final_path = remote_path(&directory, &file_name);
        let temporary_path = format!("{}{}", final_path, self.temporary_file_suffix);

        let mut reader = payload.open().await?;
        let mut session = self.sessions.get_session().await?;
        let connection = session.connection_id();

        let outcome = self
            .transfer(
                session.as_mut(),
                &directory,
                &mut *reader,
                &final_path,
                &temporary_path,
            )
            .await;

        if let Err(e) = session.close().await {
            warn!(connection = %connection, "Failed to release session: {}", e);
        }

        Ok(TransferReceipt {
            remote_directory: directory,
            remote_path: final_path,
            bytes: outcome?,
            connection,
        })
    }

    async fn transfer(
        &self,
        session: &mut dyn Session,
        directory: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        final_path: &str,
        temporary_path: &str,
    ) -> Result<u64> {
        self.ensure_directory(session, directory).await?;

        let bytes = session
            .write(reader, temporary_path)
            .await
            .map_err(|e| Error::transfer(final_path, temporary_path, e))?;

        session
            .rename(temporary_path, final_path)
            .await
            .map_err(|e| Error::transfer(final_path, temporary_path, e))?;

        Ok(bytes)
    }

    async fn ensure_directory(&self, session: &mut dyn Session, directory: &str) -> Result<()> {
        if directory.is_empty() || directory == "/" || session.exists(directory).await? {
            return Ok(());
        }

        if !self.auto_create_directory {
            return Err(Error::RemoteDirectoryMissing(directory.to_string()));
        }

        for segment in directory_segments(directory) {
            let exists = session
                .exists(&segment)
                .await
                .map_err(|e| Error::directory_creation(&segment, e))?;
            if exists {
                continue;
            }

            match session.mkdir(&segment).await {
                Ok(()) => {
                    debug!("Created remote directory {}", segment);
                    self.metrics.record_directory_created();
                }
                // Someone else may have created it in the meantime
                Err(e) => {
                    if !session.exists(&segment).await.unwrap_or(false) {
                        return Err(Error::directory_creation(&segment, e));
                    }
                }
            }
        }
        Ok(())
    }

    /// List a remote directory
    ///
    /// # Errors
    ///
    /// Returns the session checkout error or `Error::Remote` when the listing
    /// fails.
    pub async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
        let mut session = self.sessions.get_session().await?;
        let result = session.list(directory).await;
        if let Err(e) = session.close().await {
            warn!("Failed to release session: {}", e);
        }
        result
    }

    /// Check whether a remote file or directory exists
    ///
    /// # Errors
    ///
    /// Returns the session checkout error or `Error::Remote`.
    pub async fn remote_file_exists(&self, path: &str) -> Result<bool> {
        let mut session = self.sessions.get_session().await?;
        let result = session.exists(path).await;
        if let Err(e) = session.close().await {
            warn!("Failed to release session: {}", e);
        }
        result
    }
}

impl fmt::Debug for RemoteFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFileWriter")
            .field("remote_directory", &self.remote_directory)
            .field("auto_create_directory", &self.auto_create_directory)
            .field("temporary_file_suffix", &self.temporary_file_suffix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DefaultSessionFactory;
    use crate::transport::{MemoryConnector, Operation};

    fn writer(connector: &MemoryConnector, directory: &str) -> RemoteFileWriter {
        let factory = DefaultSessionFactory::new(connector.clone(), false);
        RemoteFileWriter::new(Arc::new(factory), directory)
    }

    #[test]
    fn test_directory_segments() {
        assert_eq!(directory_segments("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(directory_segments("a//b/"), vec!["a", "a/b"]);
        assert!(directory_segments("/").is_empty());
        assert!(directory_segments("").is_empty());
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("/out", "a.txt"), "/out/a.txt");
        assert_eq!(remote_path("/out/", "a.txt"), "/out/a.txt");
        assert_eq!(remote_path("", "a.txt"), "a.txt");
        assert_eq!(remote_path("/", "a.txt"), "/a.txt");
    }

    #[test]
    fn test_rejects_bad_suffix() {
        let connector = MemoryConnector::new();
        assert!(writer(&connector, "/").with_temporary_file_suffix("").is_err());
        assert!(writer(&connector, "/").with_temporary_file_suffix("/tmp").is_err());
    }

    #[tokio::test]
    async fn test_existing_directory_is_not_recreated() {
        let connector = MemoryConnector::new();
        connector.add_directory("/in");
        let writer = writer(&connector, "/in").with_auto_create_directory(true);

        writer
            .handle(Payload::from("x"), &TransferHint::named("x.txt"))
            .await
            .unwrap();

        assert!(!connector
            .journal()
            .iter()
            .any(|op| matches!(op, Operation::Mkdir { .. })));
    }

    #[tokio::test]
    async fn test_expression_directory_and_hint_override() {
        let connector = MemoryConnector::new();
        let factory = DefaultSessionFactory::new(connector.clone(), false);
        let writer = RemoteFileWriter::new(
            Arc::new(factory),
            RemoteDirectory::expression(|_, hint| {
                format!("/by-name/{}", hint.file_name.as_deref().unwrap_or("unnamed"))
            }),
        )
        .with_auto_create_directory(true);

        let receipt = writer
            .handle(Payload::from("a"), &TransferHint::named("a.txt"))
            .await
            .unwrap();
        assert_eq!(receipt.remote_path, "/by-name/a.txt/a.txt");

        let receipt = writer
            .handle(
                Payload::from("b"),
                &TransferHint::named("b.txt").in_directory("/override"),
            )
            .await
            .unwrap();
        assert_eq!(receipt.remote_directory, "/override");
        assert_eq!(connector.file("/override/b.txt"), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn test_invalid_generated_name() {
        let connector = MemoryConnector::new();
        let writer = writer(&connector, "/");

        let result = writer
            .handle(Payload::from("x"), &TransferHint::named("../escape"))
            .await;

        assert!(matches!(result, Err(Error::InvalidPath(_))));
        assert_eq!(connector.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_temporary_name() {
        let connector = MemoryConnector::new();
        connector.add_directory("/out");
        connector.fail_write("/out/a.txt.writing");
        let writer = writer(&connector, "/out");

        let err = writer
            .handle(Payload::from("x"), &TransferHint::named("a.txt"))
            .await
            .unwrap_err();

        assert_eq!(err.temporary_file(), Some("/out/a.txt.writing"));
        assert_eq!(writer.metrics().snapshot().transfers_failed, 1);
        // Session released
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_list_and_exists() {
        let connector = MemoryConnector::new();
        connector.add_file("/out/a.txt", "a");
        connector.add_directory("/out/sub");
        let writer = writer(&connector, "/out");

        let names: Vec<_> = writer
            .list("/out")
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["sub", "a.txt"]);

        assert!(writer.remote_file_exists("/out/a.txt").await.unwrap());
        assert!(!writer.remote_file_exists("/out/b.txt").await.unwrap());
    }
}
