//! `action-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check action manifest JSON files.
//! - `config`: print the effective engine configuration.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engine::{ActionManifest, EngineConfig, ExecutionVariant};

#[derive(Parser)]
#[command(
    name = "action-engine",
    about = "Action definitions and activation engine for conversational flows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate one or more action manifest JSON files.
    Validate {
        /// Paths to manifest files.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print the effective engine configuration as JSON.
    Config {
        /// Engine configuration file (JSON). Defaults apply when omitted.
        #[arg(long, env = "ACTION_ENGINE_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Validate { paths } => {
            for path in &paths {
                match validate(path) {
                    Ok((id, variant)) => println!("ok      {} ({id}: {variant})", path.display()),
                    Err(e) => {
                        println!("invalid {}: {e:#}", path.display());
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { config } => {
            let config = match config {
                Some(path) => {
                    info!("loading engine config from {}", path.display());
                    EngineConfig::from_json_file(&path)?
                }
                None => EngineConfig::default(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate(path: &Path) -> anyhow::Result<(String, ExecutionVariant)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let manifest: ActionManifest = serde_json::from_str(&content).context("invalid manifest JSON")?;
    let variant = manifest.variant()?;
    Ok((manifest.id, variant))
}
