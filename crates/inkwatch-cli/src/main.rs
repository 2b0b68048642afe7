//! Inkwatch CLI - verify that expected messages reach a chat transcript
//!
//! Usage:
//!   inkwatch scan <transcript> <fragment>   Scan a transcript for a fragment
//!   inkwatch run <scenario>                 Run a scripted scenario
//!   inkwatch config [--write <path>]        Show or write configuration

mod scenario;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use inkwatch_core::VerifierConfig;
use inkwatch_dom::{build_chat_document, DocumentHandle, Transcript};
use inkwatch_verifier::VerificationEngine;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "inkwatch")]
#[command(author, version, about = "Confirm that expected messages appear in a chat transcript")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a transcript for a fragment and print where it was found
    Scan {
        /// Transcript JSON file
        transcript: PathBuf,

        /// Text to look for
        fragment: String,
    },

    /// Run a scenario and print a JSON report
    Run {
        /// Scenario JSON file
        scenario: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// Write the default configuration to this path instead
        #[arg(long, value_name = "PATH")]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            transcript,
            fragment,
        } => cmd_scan(&transcript, &fragment, config).await,
        Commands::Run { scenario } => cmd_run(&scenario, config).await,
        Commands::Config { write } => cmd_config(write, &config),
    }
}

fn load_config(path: Option<&Path>) -> Result<VerifierConfig> {
    match path {
        Some(path) => VerifierConfig::load_or_default(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(VerifierConfig::default()),
    }
}

async fn cmd_scan(path: &Path, fragment: &str, config: VerifierConfig) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    let transcript = Transcript::from_json(&content)
        .with_context(|| format!("Failed to parse transcript {}", path.display()))?;

    let (doc, _) = build_chat_document(&transcript)?;
    let engine = VerificationEngine::new(DocumentHandle::new(doc), config)?;
    info!(
        "Scanning {} message(s) in {}",
        transcript.messages.len(),
        path.display()
    );

    let report = engine.check_dom_now(fragment);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_run(path: &Path, config: VerifierConfig) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let report = scenario::run(&scenario, config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.passed {
        bail!(
            "{} of {} check(s) did not match should_verify",
            report.failures(),
            report.checks.len()
        );
    }
    Ok(())
}

fn cmd_config(write: Option<PathBuf>, config: &VerifierConfig) -> Result<()> {
    match write {
        Some(path) => {
            VerifierConfig::write_default(&path)
                .with_context(|| format!("Failed to write config {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
