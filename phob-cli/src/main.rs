//! `phob`: build, inspect and run device-bound PHP containers.
//!
//! Usage:
//!   phob device-id
//!   phob build --config phob.toml ./src ./dist
//!   PHOB_KEY=... PHOB_PASS=... phob run ./dist/app.phob

use anyhow::Result;
use clap::Parser;
use phob_cli::{execute, Cli};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    execute(cli.command, &mut std::io::stdout().lock())
}
