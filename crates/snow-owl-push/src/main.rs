//! Snow Owl Push
//!
//! NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
//! Implementation: Upload client with JSON logging for SIEM integration
//!
//! Run with: cargo run --bin snow-owl-push -- put ./report.csv

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use snow_owl_transfer::{LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snow-owl-push")]
#[command(about = "Upload files to SFTP servers with atomic placement", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/snow-owl/push.toml")]
    config: PathBuf,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files
    Put {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remote directory (overrides the configured one)
        #[arg(short, long)]
        remote_dir: Option<String>,

        /// Remote file name (single file only)
        #[arg(short, long)]
        name: Option<String>,

        /// Create missing remote directories
        #[arg(long)]
        mkdir: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// List a remote directory
    Ls {
        /// Remote directory (defaults to the configured one)
        directory: Option<String>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Where sessions are opened
#[derive(Args, Debug, Clone, Default)]
struct TargetArgs {
    /// Run against an empty in-memory remote and print the operations issued
    #[arg(long, conflicts_with = "local_root")]
    dry_run: bool,

    /// Use a local directory as the remote root instead of SSH
    #[arg(long)]
    local_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        return commands::init::run(&cli.config, force).await;
    }

    let (mut config, loaded) = config::load_or_default(&cli.config).await?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(file) = cli.log_file {
        config.logging.file = Some(file);
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&config.logging)?;
    if !loaded {
        tracing::warn!(
            path = %cli.config.display(),
            "Configuration file not found, using defaults"
        );
    }

    match cli.command {
        Commands::Put {
            files,
            remote_dir,
            name,
            mkdir,
            target,
        } => {
            let options = commands::put::PutOptions {
                files,
                remote_dir,
                name,
                mkdir,
            };
            commands::put::run(config, &target, options).await
        }
        Commands::Ls {
            directory,
            json,
            target,
        } => commands::ls::run(config, &target, directory, json).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

/// Initialize logging, to a daily-rolling file when one is configured
///
/// NIST 800-53 AU-9: Protection of Audit Information
/// NIST 800-53 AU-12: Audit Generation
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let Some(log_file) = &logging.file else {
        match logging.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init(),
        }
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = log_file
        .file_name()
        .context("Log file path must name a file")?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(writer)
            .with_ansi(false)
            .init(),
    }

    Ok(Some(guard))
}
