//! Upload payloads and transfer results

use crate::connection::ConnectionId;
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// Boxed payload reader
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content to upload
pub enum Payload {
    /// Local file, streamed from disk
    File(PathBuf),
    /// In-memory bytes
    Bytes(Bytes),
    /// Text, uploaded as UTF-8
    Text(String),
    /// Arbitrary reader, consumed once
    Stream(PayloadReader),
}

impl Payload {
    /// Local path of a file payload
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            _ => None,
        }
    }

    /// Open the payload for reading
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` when a file payload cannot be opened.
    pub async fn open(self) -> Result<PayloadReader> {
        match self {
            Self::File(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("{}: {}", path.display(), e),
                    ))
                })?;
                Ok(Box::new(file))
            }
            Self::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes))),
            Self::Text(text) => Ok(Box::new(Cursor::new(text.into_bytes()))),
            Self::Stream(reader) => Ok(reader),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Text(text) => write!(f, "Text({} chars)", text.chars().count()),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<PathBuf> for Payload {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for Payload {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Caller-supplied destination hints for one transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferHint {
    /// Overrides the writer's remote directory
    pub remote_directory: Option<String>,
    /// Remote file name to use
    pub file_name: Option<String>,
}

impl TransferHint {
    /// Hint naming the remote file
    pub fn named(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    /// Upload into `directory` instead of the configured one
    pub fn in_directory(mut self, directory: impl Into<String>) -> Self {
        self.remote_directory = Some(directory.into());
        self
    }
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    /// Directory the file was placed in
    pub remote_directory: String,
    /// Final remote path
    pub remote_path: String,
    /// Bytes written
    pub bytes: u64,
    /// Connection the transfer ran over
    #[serde(serialize_with = "serialize_connection_id")]
    pub connection: ConnectionId,
}

fn serialize_connection_id<S: serde::Serializer>(
    id: &ConnectionId,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(payload: Payload) -> Vec<u8> {
        let mut reader = payload.open().await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_in_memory_payloads() {
        assert_eq!(read_all(Payload::from("héllo")).await, "héllo".as_bytes());
        assert_eq!(read_all(Payload::from(vec![1u8, 2, 3])).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_file_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, b"a,b\n").unwrap();

        let payload = Payload::from(path.clone());
        assert_eq!(payload.path(), Some(path.as_path()));
        assert_eq!(read_all(payload).await, b"a,b\n");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = Payload::File(PathBuf::from("/nonexistent/snow-owl/payload")).open().await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
