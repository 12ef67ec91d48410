//! Error types for remote transfer operations
//!
//! NIST 800-53: SI-11 (Error Handling), AU-3 (Content of Audit Records)
//! STIG: V-222566 - The application must generate error messages that provide information
//! necessary for corrective actions without revealing information that could be exploited
//! Implementation: Transfer errors carry the remote paths an operator needs for cleanup

use thiserror::Error;

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transfer error types
///
/// NIST 800-53: SI-11 (Error Handling)
/// STIG: V-222566
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying connection could not be established or authenticated
    ///
    /// NIST 800-53: SC-8 (Transmission Confidentiality), IA-2, SI-11
    /// Implementation: Fatal for the attempt, never retried by the pool
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool capacity reached and the pool is configured not to wait
    /// (or the configured wait elapsed)
    #[error("Session pool exhausted: {0}")]
    PoolExhausted(String),

    /// The caching session factory was destroyed
    #[error("Session factory has been closed")]
    FactoryClosed,

    /// The target remote directory does not exist and auto-create is disabled
    #[error("Remote directory does not exist: {0}")]
    RemoteDirectoryMissing(String),

    /// The remote side refused to create a directory segment
    ///
    /// NIST 800-53: AC-3 (Access Enforcement), SI-11
    #[error("Failed to create remote directory '{path}': {reason}")]
    DirectoryCreation {
        /// Directory segment that could not be created
        path: String,
        /// Remote failure
        reason: String,
    },

    /// Writing or renaming the payload failed
    ///
    /// The temporary file may remain on the remote host and must be removed manually.
    #[error("Transfer to '{remote_file}' failed (temporary file '{temporary_file}'): {reason}")]
    Transfer {
        /// Final remote path that was not produced
        remote_file: String,
        /// Temporary remote path that may have been left behind
        temporary_file: String,
        /// Underlying failure
        reason: String,
    },

    /// A remote channel primitive failed
    #[error("Remote operation failed: {0}")]
    Remote(String),

    /// Invalid remote path or generated file name
    ///
    /// NIST 800-53: SI-10 (Input Validation), SI-11
    /// STIG: V-222396
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the caller can recover by retrying or changing policy
    ///
    /// # Returns
    ///
    /// `true` for capacity and provisioning problems, `false` for permanent failures
    ///
    /// # NIST 800-53: SI-11 (Error Handling)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::PoolExhausted(_) | Error::RemoteDirectoryMissing(_))
    }

    /// Temporary remote file left behind by a failed transfer, if any
    pub fn temporary_file(&self) -> Option<&str> {
        match self {
            Error::Transfer { temporary_file, .. } => Some(temporary_file),
            _ => None,
        }
    }

    /// Get sanitized error message for logs shipped off-host
    ///
    /// # NIST 800-53: SI-11 (Error Handling)
    /// # STIG: V-222566
    /// # Implementation: Connection and configuration details are withheld
    pub fn sanitized_message(&self) -> String {
        match self {
            Error::Connection(_) => "Connection failed".to_string(),
            Error::Config(_) => "Client configuration error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for Error {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        Error::Remote(err.to_string())
    }
}

// Additional error constructors and helpers
impl Error {
    /// Create connection error with context
    pub fn connection(context: impl Into<String>) -> Self {
        Error::Connection(context.into())
    }

    /// Create remote operation error with context
    pub fn remote(context: impl Into<String>) -> Self {
        Error::Remote(context.into())
    }

    /// Create pool exhaustion error
    pub fn pool_exhausted(context: impl Into<String>) -> Self {
        Error::PoolExhausted(context.into())
    }

    /// Create directory creation error
    pub fn directory_creation(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::DirectoryCreation {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create transfer error
    pub fn transfer(
        remote_file: impl Into<String>,
        temporary_file: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Error::Transfer {
            remote_file: remote_file.into(),
            temporary_file: temporary_file.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_recoverable() {
        assert!(Error::PoolExhausted("test".into()).is_recoverable());
        assert!(Error::RemoteDirectoryMissing("test".into()).is_recoverable());
        assert!(!Error::Connection("test".into()).is_recoverable());
        assert!(!Error::FactoryClosed.is_recoverable());
        assert!(!Error::directory_creation("/a", "denied").is_recoverable());
        assert!(!Error::transfer("/a/b", "/a/b.writing", "eof").is_recoverable());
    }

    #[test]
    fn test_transfer_error_carries_temporary_file() {
        let err = Error::transfer("/out/data.csv", "/out/data.csv.writing", "rename refused");
        assert_eq!(err.temporary_file(), Some("/out/data.csv.writing"));
        assert!(err.to_string().contains("/out/data.csv.writing"));

        assert_eq!(Error::FactoryClosed.temporary_file(), None);
    }

    #[test]
    fn test_sanitized_message() {
        let err = Error::Connection("auth failed for deploy@10.0.0.4:22".into());
        assert_eq!(err.sanitized_message(), "Connection failed");

        let err = Error::RemoteDirectoryMissing("remote".into());
        assert_eq!(err.sanitized_message(), err.to_string());
    }
}
