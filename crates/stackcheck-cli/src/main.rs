//! # stackcheck
//!
//! Command-line harness that takes a pair of generated web services (a
//! Node/Express-style server and a Django-style server), brings both up,
//! waits for each to answer its port, verifies the rendered page of each in
//! a headless browser, and tears everything down.
//!
//! ## Usage
//!
//! ```bash
//! # Write the canonical Node + Django config
//! stackcheck init
//!
//! # Run the full lifecycle against the configured pair
//! stackcheck run
//!
//! # Machine-readable output, with a hard deadline
//! stackcheck run --format json --timeout 120
//! ```
//!
//! Exit code 0 means every stage completed and every verification passed;
//! anything else exits 1. Partial failure is reported, never panicked on.

mod config;
mod reporter;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use stackcheck_core::TestOrchestrator;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Output format for the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum Format {
    /// Colored, human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Text => write!(f, "text"),
            Format::Json => write!(f, "json"),
        }
    }
}

/// Launch, health-check, and browser-verify a web service pair.
#[derive(Parser, Debug)]
#[command(name = "stackcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full lifecycle for the configured service pair.
    Run {
        /// Path to the service-pair config file.
        #[arg(short, long, default_value = "stackcheck.yml")]
        config: PathBuf,

        /// Output format for the final report.
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Abort the run (and tear everything down) after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Write a commented default config for a Node + Django pair.
    Init {
        /// Path to write the config file to.
        #[arg(short, long, default_value = "stackcheck.yml")]
        config: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            format,
            timeout,
        } => run(&config, format, timeout).await,
        Command::Init { config, force } => {
            config::write_default(&config, force)?;
            println!("wrote {}", config.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config_path: &Path, format: Format, timeout: Option<u64>) -> Result<ExitCode> {
    let pair_config = config::load(config_path)?;
    let (first, second) = pair_config.pair();

    let cancel = CancellationToken::new();
    if let Some(secs) = timeout {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("run deadline of {secs}s reached, cancelling");
            deadline.cancel();
        });
    }
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, tearing down");
            interrupt.cancel();
        }
    });

    let orchestrator = TestOrchestrator::new()
        .context("building http client for health checks")?
        .with_cancellation(cancel);
    let report = orchestrator.run(first, second).await;

    match format {
        Format::Text => print!("{}", reporter::render_text(&report)),
        Format::Json => println!("{}", reporter::render_json(&report)?),
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
