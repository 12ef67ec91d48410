//! SSH/SFTP transport
//!
//! This module connects to an SSH server (RFC 4251-4254) with `russh` and
//! drives the SFTP subsystem (draft-ietf-secsh-filexfer-02) with
//! `russh-sftp`. One [`Connection`] is one authenticated SSH connection; each
//! [`Channel`] is a separate SSH session channel running its own SFTP
//! subsystem, so several channels can share a connection.
//!
//! NIST 800-53: IA-2 (Identification and Authentication), IA-3 (Device
//! Identification), SC-8 (Transmission Confidentiality and Integrity)

use super::{Channel, Connection, Connector, RemoteEntry, RemoteWriter};
use crate::config::{Credentials, SessionConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use russh::client::{self, Handle, Handler};
use russh::keys::ssh_key::PublicKey;
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connector for one SSH host
#[derive(Debug, Clone)]
pub struct SshConnector {
    host: String,
    port: u16,
    username: String,
    target: String,
    credentials: Credentials,
    connect_timeout: Duration,
    known_hosts: Option<PathBuf>,
    accept_unknown_hosts: bool,
}

impl SshConnector {
    /// Build a connector from session settings
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the credentials are incomplete.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            target: config.target(),
            credentials: config.credentials()?,
            connect_timeout: config.connect_timeout(),
            known_hosts: config.known_hosts.clone(),
            accept_unknown_hosts: config.accept_unknown_hosts,
        })
    }

    async fn authenticate(&self, handle: &mut Handle<HostKeyVerifier>) -> Result<()> {
        let authenticated = match &self.credentials {
            Credentials::Password(password) => handle
                .authenticate_password(&self.username, password)
                .await?
                .success(),
            Credentials::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                    Error::Config(format!("Failed to load private key {}: {}", path.display(), e))
                })?;
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        &self.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?
                    .success()
            }
        };

        if authenticated {
            Ok(())
        } else {
            Err(Error::connection(format!(
                "authentication rejected for {}",
                self.target()
            )))
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let target = self.target();
        debug!("Connecting to {}", target);

        let config = Arc::new(client::Config::default());
        let verifier = HostKeyVerifier {
            host: self.host.clone(),
            port: self.port,
            known_hosts: self.known_hosts.clone(),
            accept_unknown_hosts: self.accept_unknown_hosts,
        };

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, (self.host.as_str(), self.port), verifier),
        )
        .await
        .map_err(|_| {
            Error::connection(format!(
                "connect to {} timed out after {}s",
                target,
                self.connect_timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::connection(format!("connect to {}: {}", target, e)))?;

        self.authenticate(&mut handle).await?;
        info!("Connected to {}", target);

        Ok(Box::new(SshConnection { handle, target }))
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// Verifies server host keys against a known_hosts file
struct HostKeyVerifier {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
    accept_unknown_hosts: bool,
}

impl Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let known = match &self.known_hosts {
            Some(path) => russh::keys::known_hosts::check_known_hosts_path(
                &self.host,
                self.port,
                server_public_key,
                path,
            )
            .map_err(|e| {
                error!(host = %self.host, port = self.port, "Host key verification failed: {}", e);
                e
            })?,
            None => false,
        };

        if known {
            debug!(host = %self.host, "Host key verified against known_hosts");
            Ok(true)
        } else if self.accept_unknown_hosts {
            warn!(host = %self.host, port = self.port, "Accepting unknown host key");
            Ok(true)
        } else {
            warn!(host = %self.host, port = self.port, "Unknown host key rejected");
            Ok(false)
        }
    }
}

struct SshConnection {
    handle: Handle<HostKeyVerifier>,
    target: String,
}

#[async_trait]
impl Connection for SshConnection {
    fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::connection(format!("SFTP init on {}: {}", self.target, e)))?;
        Ok(Box::new(SftpChannel { sftp }))
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting from {}", self.target);
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

struct SftpChannel {
    sftp: SftpSession,
}

fn sftp_error(op: &str, path: &str, err: russh_sftp::client::error::Error) -> Error {
    Error::remote(format!("{} '{}': {}", op, path, err))
}

#[async_trait]
impl Channel for SftpChannel {
    async fn open_write(&mut self, path: &str) -> Result<RemoteWriter> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| sftp_error("open", path, e))?;
        Ok(Box::new(file))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        match self.sftp.rename(from, to).await {
            Ok(()) => Ok(()),
            // SFTP v3 servers refuse to rename onto an existing file
            Err(first) => {
                let target_exists = self.sftp.try_exists(to).await.unwrap_or(false);
                if !target_exists {
                    return Err(sftp_error("rename", from, first));
                }
                debug!("Replacing existing {}", to);
                self.sftp
                    .remove_file(to)
                    .await
                    .map_err(|e| sftp_error("remove", to, e))?;
                self.sftp
                    .rename(from, to)
                    .await
                    .map_err(|e| sftp_error("rename", from, e))
            }
        }
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| sftp_error("mkdir", path, e))
    }

    async fn exists(&mut self, path: &str) -> Result<bool> {
        self.sftp
            .try_exists(path)
            .await
            .map_err(|e| sftp_error("stat", path, e))
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| sftp_error("opendir", path, e))?;

        Ok(entries
            .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
            .map(|entry| {
                let metadata = entry.metadata();
                RemoteEntry {
                    name: entry.file_name(),
                    size: metadata.size,
                    is_dir: metadata.is_dir(),
                }
            })
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.sftp.close().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_config() -> SessionConfig {
        SessionConfig {
            host: "files.example.net".into(),
            port: 2222,
            username: "deploy".into(),
            password: Some("secret".into()),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_target_names_user_host_and_port() {
        let connector = SshConnector::new(&session_config()).unwrap();
        assert_eq!(connector.target(), "deploy@files.example.net:2222");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = SessionConfig {
            password: None,
            ..session_config()
        };
        assert!(matches!(SshConnector::new(&config), Err(Error::Config(_))));
    }
}
