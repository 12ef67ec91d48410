pub mod init;
pub mod ls;
pub mod put;

use anyhow::{Context, Result};
use snow_owl_transfer::transport::Connector;
use snow_owl_transfer::{
    CachingSessionFactory, Config, DefaultSessionFactory, LocalConnector, MemoryConnector,
    RemoteFileWriter, SshConnector, TransferMetrics,
};
use std::sync::Arc;
use tracing::info;

use crate::TargetArgs;

/// Writer and pool built from the configuration and target flags
pub struct Client {
    pub writer: Arc<RemoteFileWriter>,
    pub cache: CachingSessionFactory,
    /// Set for dry runs
    pub memory: Option<MemoryConnector>,
}

pub fn connect(config: &Config, target: &TargetArgs) -> Result<Client> {
    let mut memory = None;

    let connector: Arc<dyn Connector> = if target.dry_run {
        info!("Dry run against an in-memory remote");
        let remote = MemoryConnector::new();
        memory = Some(remote.clone());
        Arc::new(remote)
    } else if let Some(root) = &target.local_root {
        Arc::new(LocalConnector::new(root.clone()).context("Invalid local root")?)
    } else {
        config.validate().context("Invalid configuration")?;
        Arc::new(SshConnector::new(&config.session).context("Invalid session settings")?)
    };

    let metrics = TransferMetrics::new();
    let factory = DefaultSessionFactory::with_connector(connector, config.session.shared_session)
        .with_metrics(metrics.clone());
    let cache =
        CachingSessionFactory::with_metrics(Arc::new(factory), config.cache.clone(), metrics.clone());
    let writer = RemoteFileWriter::from_config(Arc::new(cache.clone()), &config.writer)
        .context("Invalid writer settings")?
        .with_metrics(metrics);

    Ok(Client {
        writer: Arc::new(writer),
        cache,
        memory,
    })
}

impl Client {
    /// Tear the pool down and print the dry-run journal, if any
    pub async fn finish(self) -> Result<()> {
        self.cache.destroy().await;

        if let Some(memory) = self.memory {
            println!("\nOperations issued:");
            for op in memory.journal() {
                println!("  {}", serde_json::to_string(&op)?);
            }
        }
        Ok(())
    }
}
