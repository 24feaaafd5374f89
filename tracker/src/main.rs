//! FxTracker CLI
//!
//! Tracks exchange rates for a selected set of assets.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fxtracker_common::AssetCode;
use fxtracker_fx::{FxTracker, TrackerConfig, WritePolicy};

mod controller;
mod metrics;
mod output;

use controller::WatchController;
use output::{render_assets, render_rates};

/// FxTracker CLI
#[derive(Parser, Debug)]
#[command(name = "fxtracker")]
#[command(about = "Track exchange rates for a selected set of assets")]
struct Args {
    /// Pricing API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Pricing API key (defaults to FXTRACKER_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Autorefresh period in seconds
    #[arg(long, global = true)]
    refresh_period: Option<u64>,

    /// Preference store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// How refreshed rates are stored: merge or replace
    #[arg(long, global = true)]
    write_policy: Option<WritePolicy>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known assets, selected ones marked with `*`
    Assets {
        /// Only show assets whose code or name contains this text
        #[arg(short, long)]
        query: Option<String>,

        /// Reload the catalog from the API
        #[arg(long)]
        refresh: bool,
    },

    /// Add assets to the selection
    Select {
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Remove assets from the selection
    Unselect {
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Show rates of the selected assets
    Rates {
        /// Fetch fresh rates even if stored ones cover the selection
        #[arg(long)]
        refresh: bool,
    },

    /// Keep rates fresh and print every change
    Watch {
        /// Run duration in seconds (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,

        /// Restart a failed autorefresh after one period
        #[arg(long)]
        restart_on_failure: bool,
    },
}

impl Args {
    /// Apply command line overrides on top of the environment.
    fn apply(&self, config: &mut TrackerConfig) {
        if let Some(url) = &self.api_url {
            config.api.base_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api.api_key = key.clone();
        }
        if let Some(period) = self.refresh_period {
            config.refresh_period = Duration::from_secs(period);
        }
        if let Some(store) = &self.store {
            config.store_path = Some(store.clone());
        }
        if let Some(policy) = self.write_policy {
            config.write_policy = policy;
            config.invalid_write_policy = None;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays clean.
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = TrackerConfig::from_env();
    args.apply(&mut config);

    init_logging(&config.log_level, args.json_logs);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let tracker = Arc::new(
        FxTracker::open(config)
            .await
            .context("Failed to open tracker")?,
    );

    match args.command {
        Command::Assets { query, refresh } => {
            tracker.assets(refresh).await?;
            let query = query.unwrap_or_default();
            let mut assets = Box::pin(tracker.projection().observe_selectable_assets(query));
            if let Some(assets) = assets.next().await {
                for line in render_assets(&assets) {
                    println!("{}", line);
                }
            }
        }
        Command::Select { codes } => {
            let codes: Vec<AssetCode> = codes.into_iter().map(AssetCode::new).collect();
            tracker.set_selected(&codes, true).await?;
            info!(count = codes.len(), "Assets selected");
        }
        Command::Unselect { codes } => {
            let codes: Vec<AssetCode> = codes.into_iter().map(AssetCode::new).collect();
            tracker.set_selected(&codes, false).await?;
            info!(count = codes.len(), "Assets unselected");
        }
        Command::Rates { refresh } => {
            if refresh {
                tracker.refresh_selected().await?;
            }
            for line in render_rates(&tracker.selected_rates().await?) {
                println!("{}", line);
            }
        }
        Command::Watch {
            duration,
            restart_on_failure,
        } => {
            let duration = (duration > 0).then(|| Duration::from_secs(duration));
            let mut controller = WatchController::new(tracker.clone(), restart_on_failure);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };

            let mut stdout = std::io::stdout();
            let result = controller.run(&mut stdout, duration, shutdown).await;

            // Print metrics
            let metrics = controller.metrics();
            info!("Watch complete");
            info!("Runs: {}", metrics.runs);
            info!("Successful refreshes: {}", metrics.successful_refreshes);
            info!("Failed refreshes: {}", metrics.failed_refreshes);
            info!("Average latency: {}ms", metrics.average_latency_ms());
            info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);

            result?;
        }
    }

    Ok(())
}
