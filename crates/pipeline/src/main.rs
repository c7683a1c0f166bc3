//! Lexigraph Pipeline Service
//!
//! Runs the daily ingestion pipeline:
//! 1. Scrape: query the paper feed, download documents, extract text
//! 2. Enrich: extract keywords and definitions via the configured models
//! 3. Persist: upsert documents and keywords into the relational store
//!
//! Invocation: `pipeline --once` (default) runs immediately and exits with
//! the run status; `pipeline --daily HH:MM` keeps running one pipeline pass
//! per day at the given UTC time.

mod enrich;
mod persist;
mod retention;
mod run;
mod scrape;

use chrono::{NaiveTime, Utc};
use lexigraph_common::{AppConfig, VERSION};
use run::RunStatus;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Lexigraph Pipeline v{}", VERSION);

    // Load and validate configuration before any network activity
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration is incomplete");
        return ExitCode::FAILURE;
    }

    match parse_mode(std::env::args().skip(1)) {
        Ok(Mode::Once) => match run::run_once(&config).await {
            RunStatus::Succeeded => ExitCode::SUCCESS,
            RunStatus::Failed => ExitCode::FAILURE,
        },
        Ok(Mode::Daily(at)) => {
            run_daily(&config, at).await;
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Usage: pipeline [--once | --daily HH:MM]");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Once,
    Daily(NaiveTime),
}

fn parse_mode<I: Iterator<Item = String>>(mut args: I) -> Result<Mode, String> {
    match args.next().as_deref() {
        None | Some("--once") => Ok(Mode::Once),
        Some("--daily") => {
            let at = args.next().ok_or("--daily requires a HH:MM argument")?;
            let at = NaiveTime::parse_from_str(&at, "%H:%M")
                .map_err(|_| format!("invalid time '{}', expected HH:MM", at))?;
            Ok(Mode::Daily(at))
        }
        Some(other) => Err(format!("unknown argument '{}'", other)),
    }
}

/// Run one pass per day at the given UTC time. A failed run is logged and
/// the loop waits for the next day; the scheduler itself never exits.
async fn run_daily(config: &AppConfig, at: NaiveTime) {
    info!(at = %at.format("%H:%M"), "Scheduler started");
    loop {
        let now = Utc::now();
        let today_at = now.date_naive().and_time(at).and_utc();
        let next = if today_at > now {
            today_at
        } else {
            today_at + chrono::Duration::days(1)
        };

        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, "Waiting for next scheduled run");
        tokio::time::sleep(wait).await;

        match run::run_once(config).await {
            RunStatus::Succeeded => info!("Scheduled run succeeded"),
            RunStatus::Failed => error!("Scheduled run failed, waiting for next window"),
        }
    }
}
