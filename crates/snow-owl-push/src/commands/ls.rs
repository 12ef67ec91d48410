use anyhow::{Context, Result};
use snow_owl_transfer::Config;

use super::connect;
use crate::TargetArgs;

pub async fn run(
    config: Config,
    target: &TargetArgs,
    directory: Option<String>,
    json: bool,
) -> Result<()> {
    let directory = directory.unwrap_or_else(|| config.writer.remote_directory.clone());
    let directory = if directory.is_empty() { ".".to_string() } else { directory };

    let client = connect(&config, target)?;
    let listing = client
        .writer
        .list(&directory)
        .await
        .with_context(|| format!("Failed to list {}", directory));

    let entries = match listing {
        Ok(entries) => entries,
        Err(e) => {
            client.finish().await?;
            return Err(e);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("{} is empty.", directory);
    } else {
        println!("\n{:<4} {:>12}  {}", "Type", "Size", "Name");
        println!("{}", "-".repeat(50));
        for entry in &entries {
            println!(
                "{:<4} {:>12}  {}",
                if entry.is_dir { "d" } else { "-" },
                entry
                    .size
                    .map(|size| size.to_string())
                    .as_deref()
                    .unwrap_or("-"),
                entry.name
            );
        }
        println!();
    }

    client.finish().await
}
