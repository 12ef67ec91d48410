//! Local directory transport
//!
//! Treats a local directory as the remote root. Used for staging areas that
//! are mounted locally and for exercising the writer against a real
//! filesystem. `rename` maps to `rename(2)`, which is atomic within one
//! filesystem.
//!
//! NIST 800-53: SI-10 (Input Validation), AC-3 (Access Enforcement)
//! STIG: V-222396 - Path traversal outside the root is rejected

use super::{Channel, Connection, Connector, RemoteEntry, RemoteWriter};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tracing::debug;

/// Connector rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: Arc<PathBuf>,
}

impl LocalConnector {
    /// Create a connector for `root`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `root` is not an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "Local root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Local root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        debug!(root = %self.root.display(), "Opening local connection");
        Ok(Box::new(LocalConnection {
            root: Arc::clone(&self.root),
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }

    fn target(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

struct LocalConnection {
    root: Arc<PathBuf>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for LocalConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        if !self.is_connected() {
            return Err(Error::remote("local connection is closed"));
        }
        Ok(Box::new(LocalChannel {
            root: Arc::clone(&self.root),
            connected: Arc::clone(&self.connected),
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

struct LocalChannel {
    root: Arc<PathBuf>,
    connected: Arc<AtomicBool>,
}

impl LocalChannel {
    /// Map a remote path under the root, rejecting traversal
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::remote("local connection is closed"));
        }

        let mut resolved = self.root.as_ref().clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(Error::InvalidPath(path.to_string())),
            }
        }
        Ok(resolved)
    }
}

fn remote_error(op: &str, path: &str, err: &std::io::Error) -> Error {
    Error::remote(format!("{op} '{path}': {err}"))
}

#[async_trait]
impl Channel for LocalChannel {
    async fn open_write(&mut self, path: &str) -> Result<RemoteWriter> {
        let local = self.resolve(path)?;
        let file = fs::File::create(&local)
            .await
            .map_err(|e| remote_error("open", path, &e))?;
        Ok(Box::new(file))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (source, target) = (self.resolve(from)?, self.resolve(to)?);
        fs::rename(&source, &target)
            .await
            .map_err(|e| remote_error("rename", from, &e))
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        let local = self.resolve(path)?;
        fs::create_dir(&local)
            .await
            .map_err(|e| remote_error("mkdir", path, &e))
    }

    async fn exists(&mut self, path: &str) -> Result<bool> {
        let local = self.resolve(path)?;
        fs::try_exists(&local)
            .await
            .map_err(|e| remote_error("stat", path, &e))
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let local = self.resolve(path)?;
        let mut reader = fs::read_dir(&local)
            .await
            .map_err(|e| remote_error("opendir", path, &e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| remote_error("readdir", path, &e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| remote_error("stat", path, &e))?;
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.is_file().then(|| metadata.len()),
                is_dir: metadata.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
