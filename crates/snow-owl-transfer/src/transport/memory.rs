//! In-process remote filesystem
//!
//! Backs dry runs of the client and the test suites. Every channel operation
//! is appended to a journal so callers can check exactly what would have been
//! sent to a real server. Failures can be injected per path.

use super::{Channel, Connection, Connector, RemoteEntry, RemoteWriter};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing::debug;

/// Journal entry recorded by the memory transport
///
/// `connection` is the zero-based index of the connection, in connect order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Connection established
    Connect {
        /// Connection index
        connection: usize,
    },
    /// Connection torn down
    Disconnect {
        /// Connection index
        connection: usize,
    },
    /// Channel opened on a connection
    OpenChannel {
        /// Connection index
        connection: usize,
    },
    /// Channel closed
    CloseChannel {
        /// Connection index
        connection: usize,
    },
    /// File opened for writing
    Write {
        /// Connection index
        connection: usize,
        /// Remote path
        path: String,
    },
    /// Rename issued
    Rename {
        /// Connection index
        connection: usize,
        /// Source path
        from: String,
        /// Target path
        to: String,
    },
    /// Directory creation issued
    Mkdir {
        /// Connection index
        connection: usize,
        /// Remote path
        path: String,
    },
    /// Existence check issued
    Exists {
        /// Connection index
        connection: usize,
        /// Remote path
        path: String,
    },
    /// Directory listing issued
    List {
        /// Connection index
        connection: usize,
        /// Remote path
        path: String,
    },
}

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    journal: Vec<Operation>,
    connections: Vec<bool>,
    refuse_connections: bool,
    fail_mkdir: HashSet<String>,
    fail_rename: HashSet<String>,
    fail_write: HashSet<String>,
}

impl RemoteState {
    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || path == "/" || self.dirs.contains(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.is_dir(path) || self.files.contains_key(path)
    }

    fn check_connected(&self, connection: usize) -> Result<()> {
        if self.connections.get(connection).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(Error::remote(format!("connection {connection} is closed")))
        }
    }
}

/// Collapse duplicate separators and `.` segments, drop a trailing separator
fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let joined = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => "",
    }
}

fn entry_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Connector for the in-process remote
///
/// Clones share the same remote filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryConnector {
    /// Create an empty remote
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-create a directory and its parents
    pub fn add_directory(&self, path: &str) {
        let path = normalize(path);
        let mut state = self.lock();
        let mut current = path.as_str();
        while !current.is_empty() && current != "/" {
            state.dirs.insert(current.to_string());
            current = parent(current);
        }
    }

    /// Pre-create a file
    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.lock().files.insert(normalize(path), content.into());
    }

    /// Content of a remote file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    /// Paths of all remote files
    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Whether a remote directory exists
    pub fn has_directory(&self, path: &str) -> bool {
        self.lock().is_dir(&normalize(path))
    }

    /// Every operation issued so far
    pub fn journal(&self) -> Vec<Operation> {
        self.lock().journal.clone()
    }

    /// Number of connections ever established
    pub fn connections_opened(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of connections currently up
    pub fn open_connections(&self) -> usize {
        self.lock().connections.iter().filter(|up| **up).count()
    }

    /// Whether connection `index` is up
    pub fn is_connected(&self, index: usize) -> bool {
        self.lock().connections.get(index).copied().unwrap_or(false)
    }

    /// Number of explicit disconnects
    pub fn disconnect_count(&self) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|op| matches!(op, Operation::Disconnect { .. }))
            .count()
    }

    /// Simulate a network drop of connection `index`
    pub fn drop_connection(&self, index: usize) {
        if let Some(up) = self.lock().connections.get_mut(index) {
            *up = false;
        }
    }

    /// Refuse (or accept again) new connections
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Make `mkdir(path)` fail
    pub fn fail_mkdir(&self, path: &str) {
        self.lock().fail_mkdir.insert(normalize(path));
    }

    /// Make any rename onto `to` fail
    pub fn fail_rename(&self, to: &str) {
        self.lock().fail_rename.insert(normalize(to));
    }

    /// Make opening `path` for writing fail
    pub fn fail_write(&self, path: &str) {
        self.lock().fail_write.insert(normalize(path));
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(Error::connection("memory remote refused the connection"));
        }
        let index = state.connections.len();
        state.connections.push(true);
        state.journal.push(Operation::Connect { connection: index });
        debug!(connection = index, "Memory connection established");

        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            index,
        }))
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryConnection {
    state: Arc<Mutex<RemoteState>>,
    index: usize,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_connected(&self) -> bool {
        self.lock().connections.get(self.index).copied().unwrap_or(false)
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        let mut state = self.lock();
        state.check_connected(self.index)?;
        state.journal.push(Operation::OpenChannel {
            connection: self.index,
        });
        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            connection: self.index,
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(up) = state.connections.get_mut(self.index) {
            *up = false;
        }
        state.journal.push(Operation::Disconnect {
            connection: self.index,
        });
        Ok(())
    }
}

struct MemoryChannel {
    state: Arc<Mutex<RemoteState>>,
    connection: usize,
}

impl MemoryChannel {
    fn lock(&self) -> Result<MutexGuard<'_, RemoteState>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.check_connected(self.connection)?;
        Ok(state)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn open_write(&mut self, path: &str) -> Result<RemoteWriter> {
        let path = normalize(path);
        let mut state = self.lock()?;
        state.journal.push(Operation::Write {
            connection: self.connection,
            path: path.clone(),
        });

        if state.fail_write.contains(&path) {
            return Err(Error::remote(format!("permission denied: {path}")));
        }
        if !state.is_dir(parent(&path)) {
            return Err(Error::remote(format!("no such directory: {}", parent(&path))));
        }
        state.files.insert(path.clone(), Vec::new());

        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            path,
        }))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (normalize(from), normalize(to));
        let mut state = self.lock()?;
        state.journal.push(Operation::Rename {
            connection: self.connection,
            from: from.clone(),
            to: to.clone(),
        });

        if state.fail_rename.contains(&to) {
            return Err(Error::remote(format!("rename refused: {from} -> {to}")));
        }
        let content = state
            .files
            .remove(&from)
            .ok_or_else(|| Error::remote(format!("no such file: {from}")))?;
        state.files.insert(to, content);
        Ok(())
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut state = self.lock()?;
        state.journal.push(Operation::Mkdir {
            connection: self.connection,
            path: path.clone(),
        });

        if state.fail_mkdir.contains(&path) {
            return Err(Error::remote(format!("permission denied: {path}")));
        }
        if state.exists(&path) {
            return Err(Error::remote(format!("already exists: {path}")));
        }
        if !state.is_dir(parent(&path)) {
            return Err(Error::remote(format!("no such directory: {}", parent(&path))));
        }
        state.dirs.insert(path);
        Ok(())
    }

    async fn exists(&mut self, path: &str) -> Result<bool> {
        let path = normalize(path);
        let mut state = self.lock()?;
        state.journal.push(Operation::Exists {
            connection: self.connection,
            path: path.clone(),
        });
        Ok(state.exists(&path))
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = normalize(path);
        let mut state = self.lock()?;
        state.journal.push(Operation::List {
            connection: self.connection,
            path: path.clone(),
        });

        if !state.is_dir(&path) {
            return Err(Error::remote(format!("no such directory: {path}")));
        }

        let dirs = state
            .dirs
            .iter()
            .filter(|dir| parent(dir) == path)
            .map(|dir| RemoteEntry {
                name: entry_name(dir).to_string(),
                size: None,
                is_dir: true,
            });
        let files = state
            .files
            .iter()
            .filter(|(file, _)| parent(file) == path)
            .map(|(file, content)| RemoteEntry {
                name: entry_name(file).to_string(),
                size: Some(content.len() as u64),
                is_dir: false,
            });

        Ok(dirs.chain(files).collect())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.journal.push(Operation::CloseChannel {
            connection: self.connection,
        });
        Ok(())
    }
}

/// Appends straight into the remote file, so partial content is observable
struct MemoryWriter {
    state: Arc<Mutex<RemoteState>>,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.files.get_mut(&self.path) {
            Some(content) => {
                content.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was removed while writing", self.path),
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
