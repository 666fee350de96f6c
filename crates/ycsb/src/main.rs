//! ycsb-rs - transactional YCSB benchmark driver
//!
//! Loads records into a storage engine, then drives multi-operation
//! transactions against it from many threads, retrying aborted attempts and
//! reporting latency distributions and throughput per phase.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod bench;
mod config;

use bench::PhaseSelection;

#[derive(Parser)]
#[command(name = "ycsb")]
#[command(author, version, about = "ycsb-rs - transactional YCSB benchmark driver", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run benchmark phases
    Run {
        /// Configuration file path (TOML, or JSON by extension)
        #[arg(short, long, env = "YCSB_CONFIG")]
        config: Option<PathBuf>,

        /// Override a setting, as section.key=value
        #[arg(short = 'p', long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,

        /// Phases to execute
        #[arg(long, value_enum, default_value_t = PhaseSelection::Both)]
        phase: PhaseSelection,

        /// Directory for report files
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    ShowConfig {
        /// Configuration file path
        #[arg(short, long, env = "YCSB_CONFIG")]
        config: Option<PathBuf>,

        /// Override a setting, as section.key=value
        #[arg(short = 'p', long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ycsb=info".parse()?)
                .add_directive("ycsb_core=info".parse()?)
                .add_directive("ycsb_storage=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            properties,
            phase,
            output,
        } => {
            let config = config::load(config.as_deref(), &properties)?;
            info!(
                "Running {:?} with {:?} engine on {} threads",
                phase, config.engine.kind, config.run.threads
            );
            bench::run(&config, phase, output.as_deref())?;
        }

        Commands::ShowConfig { config, properties } => {
            let config = config::load(config.as_deref(), &properties)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
