use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use foldmesh::demo::{run_demo, DemoOptions};
use foldmesh::FoldMeshConfig;
use tracing::{info, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foldmesh")]
#[command(about = "Replicated fold memory with federation routing", long_about = None)]
struct Cli {
    /// TOML configuration file; `FOLDMESH__*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot an in-process mesh and federation, then print their status
    Demo {
        #[arg(long, default_value_t = 3)]
        nodes: usize,

        #[arg(long, default_value_t = 2)]
        clusters: usize,

        /// Sample folds written per layer
        #[arg(long, default_value_t = 4)]
        folds: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config = FoldMeshConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Demo { nodes, clusters, folds } => {
            let span = tracing::info_span!("demo", nodes, clusters);
            let report = run_demo(&config, DemoOptions { nodes, clusters, folds })
                .instrument(span)
                .await?;
            info!(
                writes = report.writes.len(),
                routed = report.routed.len(),
                "demo finished"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
