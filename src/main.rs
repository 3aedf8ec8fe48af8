//! ovhddns - one-shot dynamic DNS updater for OVH zones
//!
//! Architecture:
//! - Ordered fallback chain of public address-echo sources
//! - Small persisted state file so unchanged addresses cost zero API calls
//! - Signed OVH API client with the human-validated consumer-key bootstrap
//! - Run-to-completion state machine; re-invocation is the retry mechanism

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod constants;
mod coordinator;
mod detect;
mod error;
mod ovh;
mod state;

use config::Config;
use coordinator::{RunOutcome, UpdateCoordinator};
use detect::AddressDetector;
use ovh::OvhClient;
use state::StateStore;

/// Application version
const VERSION: &str = "1.0.0";

//==============================================================================
// Main
//==============================================================================

#[derive(Debug, Parser)]
#[command(name = "ovhddns")]
#[command(version = VERSION)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config).context("Config load failed")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if config.verbose || args.verbose {
            "debug"
        } else {
            "info"
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let detector = match config.sources.clone() {
        Some(sources) => AddressDetector::with_sources(sources),
        None => AddressDetector::new(),
    }
    .context("Address detector failed")?;

    let store = StateStore::new(config.state_path.clone());

    let client = OvhClient::new(
        config.credentials.clone(),
        config.zone.clone(),
        config.multi_record,
        config.timeout,
    )
    .context("API client failed")?;

    let has_consumer_key = config.credentials.consumer_key.is_some();
    let coordinator = UpdateCoordinator::new(detector, store, client, has_consumer_key);

    match coordinator.run().await {
        Ok(RunOutcome::Unchanged) | Ok(RunOutcome::Updated { .. }) => Ok(()),
        Ok(RunOutcome::BootstrapPending(bootstrap)) => {
            config
                .persist_consumer_key(&bootstrap.consumer_key)
                .context("Failed to save the new consumer key")?;
            info!("Consumer key saved to configuration");
            eprintln!("A new consumer key was issued and saved to the configuration.");
            eprintln!("Validate it in a browser, then run ovhddns again:");
            eprintln!("  {}", bootstrap.validation_url);
            Ok(())
        }
        Ok(RunOutcome::AddressUnavailable) => {
            eprintln!("Unable to determine the public address. Are you connected to the internet?");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("Update failed: {}", e);
            std::process::exit(1);
        }
    }
}
