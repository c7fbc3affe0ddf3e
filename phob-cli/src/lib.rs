//! Command-line interface for the PHOB engine.

pub mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phob_engine::{Availability, EngineConfig, Phob, ProcessExecutor, DEFAULT_INTERPRETER};
use phob_license::DeviceInfo;
use tracing::info;

use crate::config::{load_build_config, RunOptions, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "phob")]
#[command(about = "Device-bound protection for PHP applications", version)]
pub struct Cli {
    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print this machine's device identity
    DeviceId,

    /// Protect a source tree into an output directory
    Build {
        /// Build configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Source directory or single file
        input: PathBuf,

        /// Output directory (must not exist or be empty)
        output: PathBuf,

        /// Copy this relative path verbatim instead of protecting it
        #[arg(long = "skip", value_name = "PATH")]
        skip: Vec<String>,

        /// Derive salt and nonces from the inputs for reproducible output
        #[arg(long)]
        deterministic: bool,
    },

    /// Validate, decrypt and execute a container
    Run {
        /// Container file
        container: PathBuf,

        /// Interpreter that reads the sources from stdin
        #[arg(long, default_value = DEFAULT_INTERPRETER, env = "PHOB_INTERPRETER")]
        interpreter: String,

        /// Key the container was built with
        #[arg(long, env = "PHOB_KEY", hide_env_values = true)]
        key: Option<String>,

        /// Pass the container was built with
        #[arg(long, env = "PHOB_PASS", hide_env_values = true)]
        pass: Option<String>,

        /// File of revoked license ids, one per line
        #[arg(long, value_name = "FILE")]
        revocation_list: Option<PathBuf>,

        /// Revocation service base URL (requires the `online` feature)
        #[arg(long, value_name = "URL")]
        revocation_url: Option<String>,

        /// Run even if the revocation source cannot be reached
        #[arg(long)]
        offline_tolerant: bool,
    },

    /// Show container metadata (unauthenticated)
    Inspect {
        /// Container file
        container: PathBuf,

        /// Print metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that this machine can run containers
    Probe {
        /// Interpreter to check for
        #[arg(long, default_value = DEFAULT_INTERPRETER, env = "PHOB_INTERPRETER")]
        interpreter: String,
    },
}

/// Executes a parsed command, writing human-readable output to `out`.
pub fn execute(command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::DeviceId => {
            let id = Phob::new(EngineConfig::default())
                .device_id()
                .context("failed to read device fingerprint")?;
            writeln!(out, "{id}")?;
        }

        Command::Build {
            config,
            input,
            output,
            skip,
            deterministic,
        } => {
            let build_config = load_build_config(&config, &skip, deterministic)?;
            let report = Phob::new(EngineConfig::default())
                .build(&input, &output, &build_config)
                .with_context(|| format!("failed to protect {}", input.display()))?;

            writeln!(out, "Container: {}", report.container.display())?;
            writeln!(out, "Entry:     {}", report.entry)?;
            writeln!(out, "License:   {}", report.constraints.license)?;
            writeln!(out, "Device:    {}", report.constraints.device)?;
            if let Some(expiry) = report.constraints.expiry {
                writeln!(out, "Expires:   {}", expiry.to_rfc3339())?;
            }
            writeln!(
                out,
                "Files:     {} protected, {} copied ({} bytes)",
                report.protected.len(),
                report.skipped.len(),
                report.bytes
            )?;
        }

        Command::Run {
            container,
            interpreter,
            key,
            pass,
            revocation_list,
            revocation_url,
            offline_tolerant,
        } => {
            let engine_config = RunOptions {
                key,
                pass,
                revocation_list,
                revocation_url,
                offline_tolerant,
            }
            .engine_config()?;
            let phob = Phob::new(engine_config)
                .with_executor(Arc::new(ProcessExecutor::new(interpreter)));
            let outcome = phob.run(&container).map_err(|e| {
                let stage = e.stage();
                anyhow::Error::new(e).context(format!(
                    "failed to run {} ({stage:?} stage)",
                    container.display()
                ))
            })?;
            info!(entry = %outcome.entry, files = outcome.files, "Run complete");
        }

        Command::Inspect { container, json } => {
            let inspection = Phob::new(EngineConfig::default())
                .inspect(&container)
                .with_context(|| format!("failed to read {}", container.display()))?;

            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&inspection.metadata)?)?;
            } else {
                let meta = &inspection.metadata;
                writeln!(out, "UNVERIFIED: metadata is shown without checking the integrity tag")?;
                writeln!(out, "Format:    v{} ({} bytes)", inspection.version, inspection.bytes)?;
                writeln!(out, "Engine:    {}", meta.engine)?;
                writeln!(out, "License:   {}", meta.constraints.license)?;
                writeln!(out, "Device:    {}", meta.constraints.device)?;
                match meta.constraints.expiry {
                    Some(expiry) => writeln!(out, "Expires:   {}", expiry.to_rfc3339())?,
                    None => writeln!(out, "Expires:   never")?,
                }
                writeln!(out, "Entry:     {}", meta.entry)?;
                writeln!(
                    out,
                    "KDF:       argon2id m={} t={} p={}",
                    inspection.kdf.memory_cost, inspection.kdf.time_cost, inspection.kdf.parallelism
                )?;
                for entry in &meta.manifest {
                    writeln!(out, "  {:>10}  {}", entry.size, entry.path)?;
                }
            }
        }

        Command::Probe { interpreter } => {
            let info = DeviceInfo::collect();
            writeln!(
                out,
                "Host:      {} ({} {}, {})",
                info.hostname, info.os_name, info.os_version, info.arch
            )?;
            let phob = Phob::new(EngineConfig::default())
                .with_executor(Arc::new(ProcessExecutor::new(interpreter)));
            match phob.probe() {
                Availability::Ready { device } => {
                    writeln!(out, "Device:    {device}")?;
                    writeln!(out, "Status:    ready")?;
                }
                Availability::Unavailable { reason } => {
                    writeln!(out, "Status:    unavailable")?;
                    anyhow::bail!("engine unavailable: {reason}");
                }
            }
        }
    }
    Ok(())
}
