//! SoundPak CLI - Command-line interface for game audio archives

pub mod commands;
pub mod progress;

use std::path::PathBuf;

use clap::{Args, Parser};
use commands::Commands;
use tracing_subscriber::EnvFilter;

use crate::config::ToolConfig;
use crate::model::HashMode;

#[derive(Parser)]
#[command(name = "soundpak")]
#[command(version, about = "SoundPak: inspect, export and patch WHD/STR game audio archives", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Originality cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Hash stored bytes instead of decoded audio
    #[arg(long, global = true)]
    pub direct_hash: bool,

    /// Worker threads for batch operations
    #[arg(long, global = true)]
    pub threads: Option<usize>,
}

impl GlobalArgs {
    /// The persisted config with command line overrides applied
    pub fn tool_config(&self) -> anyhow::Result<ToolConfig> {
        let mut config = match &self.config {
            Some(path) => ToolConfig::load_from(path)?,
            None => ToolConfig::load(),
        };
        if let Some(dir) = &self.cache_dir {
            config.cache_dir.clone_from(dir);
        }
        if self.direct_hash {
            config.hash_mode = HashMode::Direct;
        }
        if self.threads.is_some() {
            config.worker_threads = self.threads;
        }
        Ok(config)
    }
}

/// Run the SoundPak CLI
pub fn run_cli() -> anyhow::Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.global.tool_config()?;
    cli.command.execute(config)?;

    Ok(())
}
