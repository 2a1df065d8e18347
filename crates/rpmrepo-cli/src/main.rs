//! rpmrepo - incremental RPM repository metadata CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rpmrepo_cli::cmd;
use rpmrepo_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, `info` unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Add { files } => cmd::add::add(&cli.root, config, &files).await,
        Commands::Remove { keys, checksum } => {
            cmd::remove::remove(&cli.root, config, &keys, &checksum).await
        }
        Commands::Check => cmd::check::check(&cli.root, config).await,
    }
}
