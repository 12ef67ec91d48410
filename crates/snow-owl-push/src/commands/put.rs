use anyhow::{bail, Result};
use snow_owl_transfer::{Config, Payload, TransferHint, TransferReceipt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::connect;
use crate::TargetArgs;

pub struct PutOptions {
    pub files: Vec<PathBuf>,
    pub remote_dir: Option<String>,
    pub name: Option<String>,
    pub mkdir: bool,
}

pub async fn run(mut config: Config, target: &TargetArgs, options: PutOptions) -> Result<()> {
    if options.name.is_some() && options.files.len() > 1 {
        bail!("--name can only be used with a single file");
    }
    if options.mkdir {
        config.writer.auto_create_directory = true;
    }

    let client = connect(&config, target)?;

    // Uploads run concurrently; the session pool bounds the connections used
    let mut uploads = JoinSet::new();
    for file in options.files {
        let writer = Arc::clone(&client.writer);
        let hint = TransferHint {
            remote_directory: options.remote_dir.clone(),
            file_name: options.name.clone(),
        };
        uploads.spawn(async move {
            let result = writer.handle(Payload::File(file.clone()), &hint).await;
            (file, result)
        });
    }

    let mut receipts: Vec<(PathBuf, TransferReceipt)> = Vec::new();
    let mut failures = 0usize;
    while let Some(joined) = uploads.join_next().await {
        match joined {
            Ok((file, Ok(receipt))) => receipts.push((file, receipt)),
            Ok((file, Err(e))) => {
                failures += 1;
                error!(file = %file.display(), "Upload failed: {}", e);
                if let Some(temporary) = e.temporary_file() {
                    eprintln!("{}: {} (left {} on the remote)", file.display(), e, temporary);
                } else {
                    eprintln!("{}: {}", file.display(), e);
                }
            }
            Err(e) => {
                failures += 1;
                error!("Upload task failed: {}", e);
            }
        }
    }

    receipts.sort_by(|a, b| a.0.cmp(&b.0));
    for (file, receipt) in &receipts {
        println!(
            "{} -> {} ({} bytes, {})",
            file.display(),
            receipt.remote_path,
            receipt.bytes,
            receipt.connection
        );
    }

    let snapshot = client.writer.metrics().snapshot();
    info!(
        uploaded = snapshot.transfers_succeeded,
        failed = snapshot.transfers_failed,
        bytes = snapshot.bytes_written,
        connections = snapshot.connections_opened,
        reused = snapshot.sessions_reused,
        "Upload run finished"
    );

    client.finish().await?;

    if failures > 0 {
        bail!("{} of {} uploads failed", failures, failures + receipts.len());
    }
    Ok(())
}
