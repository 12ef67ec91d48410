use anyhow::{bail, Result};
use snow_owl_transfer::Config;
use std::path::Path;

use crate::config;

pub async fn run(config_path: &Path, force: bool) -> Result<()> {
    if !force && tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    config::save_config(config_path, &Config::default()).await?;

    println!("Configuration written to {}", config_path.display());
    println!("Set [session] host, username and password or private_key before uploading.");
    Ok(())
}
