mod cli;

use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use log::error;

use mosaic_core::kernel::{HostApplication, HostConfig};
use mosaic_core::plugin_system::strategy::LoadStrategy;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = HostConfig::from_env();
    if let Some(dir) = cli.plugins_dir {
        config.plugins_dir = dir;
    }
    if let Some(raw) = cli.strategy.as_deref() {
        match LoadStrategy::from_str(raw) {
            Ok(strategy) => config.loading_strategy = strategy,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let app = match HostApplication::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("failed to initialize host: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Run => run(&app).await,
        Command::List => list(&app).await,
    }
}

async fn run(app: &HostApplication) -> ExitCode {
    match app.run_load().await {
        Ok(result) => {
            println!(
                "loaded {} plugin(s) in {} ms",
                result.loaded.len(),
                result.sample.total_load_time_ms
            );
            for name in &result.loaded {
                println!("  loaded  {}", name);
            }
            for failure in &result.failed {
                println!("  failed  {} ({}): {}", failure.plugin, failure.kind, failure.message);
            }
            for skipped in &result.skipped {
                println!("  skipped {}", skipped);
            }
            if let Err(e) = app.shutdown().await {
                error!("shutdown error: {}", e);
            }
            if result.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("host load aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn list(app: &HostApplication) -> ExitCode {
    match app.loader().discover_all().await {
        Ok((discoveries, failures, skipped)) => {
            for discovery in &discoveries {
                let m = &discovery.manifest;
                println!(
                    "{}@{}  critical={}  deps=[{}]",
                    m.name,
                    m.version,
                    m.critical,
                    m.dependencies.join(", ")
                );
            }
            for failure in &failures {
                println!("failed  {}: {}", failure.plugin, failure.message);
            }
            for name in &skipped {
                println!("skipped {}", name);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("discovery failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
