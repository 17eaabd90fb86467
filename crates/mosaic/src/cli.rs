use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mosaic plugin host.
#[derive(Debug, Parser)]
#[command(name = "mosaic", version, about = "Mosaic plugin platform host")]
pub struct Cli {
    /// Plugin directory; overrides PLUGINS_DIR.
    #[arg(long, global = true)]
    pub plugins_dir: Option<PathBuf>,

    /// Loading strategy: auto, sequential, parallel or bounded-parallel.
    #[arg(long, global = true)]
    pub strategy: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover, validate and load every installed plugin.
    Run,
    /// Discover installed plugins and print their manifests.
    List,
}
