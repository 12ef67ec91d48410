use anyhow::{Context, Result};
use snow_owl_transfer::Config;
use std::path::Path;
use tokio::fs;

pub async fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config: Config =
        toml::from_str(&contents).context("Failed to parse configuration file")?;

    Ok(config)
}

/// Load `path` if it exists; the flag tells whether it did
pub async fn load_or_default(path: &Path) -> Result<(Config, bool)> {
    if fs::try_exists(path).await.unwrap_or(false) {
        Ok((load_config(path).await?, true))
    } else {
        Ok((Config::default(), false))
    }
}

pub async fn save_config(path: &Path, config: &Config) -> Result<()> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    fs::write(path, contents)
        .await
        .context("Failed to write configuration file")?;

    Ok(())
}
