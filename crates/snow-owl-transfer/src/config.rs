//! Configuration for session factories, the session cache and the remote writer

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Transfer client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote host and credentials
    #[serde(default)]
    pub session: SessionConfig,

    /// Session pool settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upload settings
    #[serde(default)]
    pub writer: WriterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for one remote target
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remote host
    #[serde(default = "default_host")]
    pub host: String,

    /// Remote SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    #[serde(default = "default_username")]
    pub username: String,

    /// Password (mutually exclusive with `private_key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key file (mutually exclusive with `password`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,

    /// Passphrase for `private_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Multiplex every session over one connection
    #[serde(default)]
    pub shared_session: bool,

    /// TCP connect + handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// known_hosts file used to verify the server key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,

    /// Accept host keys that are not in `known_hosts`
    ///
    /// NIST 800-53: IA-3 (Device Identification and Authentication)
    /// Implementation: Off by default; when on, every unknown key is logged
    #[serde(default)]
    pub accept_unknown_hosts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            private_key: None,
            passphrase: None,
            shared_session: false,
            connect_timeout_secs: default_connect_timeout(),
            known_hosts: None,
            accept_unknown_hosts: false,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key)
            .field("shared_session", &self.shared_session)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("known_hosts", &self.known_hosts)
            .field("accept_unknown_hosts", &self.accept_unknown_hosts)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Authentication material
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` unless exactly one of `password` and
    /// `private_key` is set.
    pub fn credentials(&self) -> crate::Result<Credentials> {
        match (&self.password, &self.private_key) {
            (Some(password), None) => Ok(Credentials::Password(password.clone())),
            (None, Some(path)) => Ok(Credentials::PrivateKey {
                path: path.clone(),
                passphrase: self.passphrase.clone(),
            }),
            (Some(_), Some(_)) => Err(crate::Error::Config(
                "password and private_key are mutually exclusive".to_string(),
            )),
            (None, None) => Err(crate::Error::Config(
                "either password or private_key is required".to_string(),
            )),
        }
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `user@host:port`
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Authentication material for a session factory
#[derive(Clone)]
pub enum Credentials {
    /// Password authentication
    Password(String),
    /// Public key authentication
    PrivateKey {
        /// Key file
        path: PathBuf,
        /// Key passphrase
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish_non_exhaustive()
            }
        }
    }
}

/// Session pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum idle + checked-out sessions; 0 means unbounded
    #[serde(default = "default_pool_limit")]
    pub pool_limit: usize,

    /// Wait for a session when the pool is at capacity instead of failing
    #[serde(default = "default_block_when_exhausted")]
    pub block_when_exhausted: bool,

    /// Upper bound on the wait, in seconds (unbounded if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_wait_timeout_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pool_limit: default_pool_limit(),
            block_when_exhausted: default_block_when_exhausted(),
            session_wait_timeout_secs: None,
        }
    }
}

impl CacheConfig {
    /// Session wait timeout
    pub fn session_wait_timeout(&self) -> Option<Duration> {
        self.session_wait_timeout_secs.map(Duration::from_secs)
    }
}

/// Upload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Remote directory uploads land in
    #[serde(default)]
    pub remote_directory: String,

    /// Create missing directory segments
    #[serde(default)]
    pub auto_create_directory: bool,

    /// Suffix marking an upload in progress
    #[serde(default = "default_temporary_file_suffix")]
    pub temporary_file_suffix: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            remote_directory: String::new(),
            auto_create_directory: false,
            temporary_file_suffix: default_temporary_file_suffix(),
        }
    }
}

/// Logging configuration
///
/// NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Config {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting.
    pub fn validate(&self) -> crate::Result<()> {
        if self.session.host.trim().is_empty() {
            return Err(crate::Error::Config("host must not be empty".to_string()));
        }

        if self.session.port == 0 {
            return Err(crate::Error::Config("port must not be 0".to_string()));
        }

        if self.session.username.trim().is_empty() {
            return Err(crate::Error::Config("username must not be empty".to_string()));
        }

        self.session.credentials()?;

        let suffix = &self.writer.temporary_file_suffix;
        if suffix.is_empty() || suffix.contains('/') {
            return Err(crate::Error::Config(
                "temporary_file_suffix must be non-empty and must not contain '/'".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "transfer".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_pool_limit() -> usize {
    10
}

fn default_block_when_exhausted() -> bool {
    true
}

fn default_temporary_file_suffix() -> String {
    ".writing".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.port, 22);
        assert!(!config.session.shared_session);
        assert_eq!(config.cache.pool_limit, 10);
        assert!(config.cache.block_when_exhausted);
        assert_eq!(config.writer.temporary_file_suffix, ".writing");
        assert!(!config.writer.auto_create_directory);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [session]
            host = "files.example.net"
            username = "deploy"
            private_key = "/home/deploy/.ssh/id_ed25519"
            shared_session = true

            [cache]
            pool_limit = 0
            block_when_exhausted = false

            [writer]
            remote_directory = "/incoming/reports"
            auto_create_directory = true
            "#,
        )
        .unwrap();

        assert_eq!(config.session.port, 22);
        assert!(config.session.shared_session);
        assert_eq!(config.cache.pool_limit, 0);
        assert_eq!(config.writer.remote_directory, "/incoming/reports");
        assert_eq!(config.writer.temporary_file_suffix, ".writing");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_are_exclusive() {
        let mut session = SessionConfig::default();
        assert!(session.credentials().is_err());

        session.password = Some("secret".into());
        assert!(matches!(session.credentials(), Ok(Credentials::Password(_))));

        session.private_key = Some(PathBuf::from("/tmp/key"));
        assert!(session.credentials().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut session = SessionConfig::default();
        session.password = Some("hunter2".into());
        assert!(!format!("{:?}", session).contains("hunter2"));
        assert!(!format!("{:?}", session.credentials().unwrap()).contains("hunter2"));
    }

    #[test]
    fn test_invalid_suffix_rejected() {
        let mut config = Config::default();
        config.session.password = Some("secret".into());
        config.writer.temporary_file_suffix = "/tmp".into();
        assert!(config.validate().is_err());
    }
}
