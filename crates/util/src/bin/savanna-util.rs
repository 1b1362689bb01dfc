//! Savanna operator CLI
//!
//! Generates finalizer keys and inspects finalizer safety files.

use anyhow::Context;
use clap::{Parser, Subcommand};
use savanna_util::{check_config, create_key, inspect_safety_file, UtilConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "savanna-util")]
#[command(about = "Operator tooling for Savanna finalizers")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// BLS key management
    Bls {
        #[command(subcommand)]
        command: BlsCommands,
    },

    /// Finalizer safety file tools
    Safety {
        #[command(subcommand)]
        command: SafetyCommands,
    },
}

#[derive(Subcommand)]
enum BlsCommands {
    /// Generate a finalizer key pair
    CreateKey {
        /// 32-byte hex seed for a deterministic key
        #[arg(long)]
        seed: Option<String>,
    },
}

#[derive(Subcommand)]
enum SafetyCommands {
    /// Print every record of a safety file
    Inspect {
        /// Safety file path
        #[arg(long)]
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check a node configuration against its safety file
    Check {
        /// TOML configuration path
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Bls {
            command: BlsCommands::CreateKey { seed },
        } => {
            let pair = create_key(seed.as_deref())?;
            println!("Public key: {}", pair.public_key);
            println!("Private key: {}", pair.private_key);
        }

        Commands::Safety {
            command: SafetyCommands::Inspect { file, json },
        } => {
            let records = inspect_safety_file(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{} record(s) in {}", records.len(), file.display());
                for r in &records {
                    println!("{}", r.public_key);
                    println!("  last_vote_range_start: {}", r.last_vote_range_start);
                    println!(
                        "  last_vote: #{} {} @{}",
                        r.last_vote.block_num, r.last_vote.block_id, r.last_vote.timestamp
                    );
                    println!(
                        "  lock:      #{} {} @{}",
                        r.lock.block_num, r.lock.block_id, r.lock.timestamp
                    );
                }
            }
        }

        Commands::Safety {
            command: SafetyCommands::Check { config },
        } => {
            let loaded = UtilConfig::load(&config)?;
            let base_dir = config
                .parent()
                .map(PathBuf::from)
                .unwrap_or_default();
            let report = check_config(&loaded, &base_dir)?;
            tracing::info!(
                stored = report.stored.len(),
                missing = report.missing.len(),
                inactive = report.inactive.len(),
                "Configuration checked"
            );
            for key in &report.stored {
                println!("stored   {key}");
            }
            for key in &report.missing {
                println!("default  {key}");
            }
            for key in &report.inactive {
                println!("inactive {key}");
            }
        }
    }

    Ok(())
}
