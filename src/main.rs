// ABOUTME: Entry point for the steplog inspection binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and prints annotated or per-step log output.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use steplog_core::StepId;
use steplog_store::{StorageManager, StoreConfig};

/// Inspect a build log stored with a step index.
#[derive(Debug, Parser)]
#[command(name = "steplog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the whole log with step segments wrapped in markers.
    Cat {
        /// Path to the log file; its index is read from <LOG>-index.
        log: PathBuf,
        /// Byte offset to start from.
        #[arg(long, default_value_t = 0)]
        start: u64,
    },
    /// Print only the bytes written by one step.
    Step {
        log: PathBuf,
        step_id: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("steplog=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::from_env().context("invalid storage configuration")?;
    let manager = StorageManager::new(config);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Cat { log, start } => {
            let next = manager.whole_log(&log).render_to(start, &mut out)?;
            out.flush()?;
            tracing::info!("rendered {} up to offset {}", log.display(), next);
        }
        Command::Step { log, step_id } => {
            let step_id = StepId::new(step_id)?;
            let step_log = manager.step_log(&log, &step_id);
            if let Some(error) = &step_log.error {
                bail!("cannot read step {} from {}: {}", step_id, log.display(), error);
            }
            out.write_all(&step_log.content)?;
            out.flush()?;
        }
    }

    Ok(())
}
