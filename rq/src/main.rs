//! rq - request scheduler CLI
//!
//! Fetches URLs through a single bounded, retrying scheduler.

use std::fs;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde::Serialize;
use tracing::info;

use reqsched::cli::{Cli, Command, OutputFormat, get_log_path};
use reqsched::config::Config;
use reqsched::fetch::HttpFetcher;
use reqsched::scheduler::Scheduler;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();

    // Create log directory
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Fetch {
            urls,
            max_concurrent,
            max_retries,
            format,
        } => {
            if let Some(max_concurrent) = max_concurrent {
                config.scheduler.max_concurrent = max_concurrent;
            }
            if let Some(max_retries) = max_retries {
                config.scheduler.max_retries = max_retries;
            }
            config.validate()?;
            cmd_fetch(&config, &urls, format).await
        }
        Command::Config => {
            config.validate()?;
            cmd_config(&config)
        }
    }
}

/// One line of fetch output
#[derive(Debug, Serialize)]
struct FetchOutcome {
    url: String,
    ok: bool,
    status: Option<u16>,
    bytes: Option<usize>,
    attempts: Option<u32>,
    error: Option<String>,
}

impl FetchOutcome {
    fn print(&self) {
        match (&self.error, self.status) {
            (None, Some(status)) => println!(
                "{} {} {} ({} bytes, {} attempts)",
                "ok".green(),
                status,
                self.url,
                self.bytes.unwrap_or(0),
                self.attempts.unwrap_or(1)
            ),
            (Some(error), _) => println!("{} {} {}", "failed".red(), self.url, error),
            (None, None) => println!("{} {}", "unknown".yellow(), self.url),
        }
    }
}

/// Fetch every URL through one scheduler
async fn cmd_fetch(config: &Config, urls: &[String], format: OutputFormat) -> Result<()> {
    info!(count = urls.len(), "cmd_fetch: submitting");
    let fetcher = HttpFetcher::from_config(&config.http)?;

    // Reject bad input before anything is in flight
    let descriptors = fetcher.descriptors(urls)?;

    let scheduler = Scheduler::new(config.scheduler.clone())?;
    let mut pending = Vec::with_capacity(descriptors.len());
    for (url, descriptor) in urls.iter().zip(descriptors) {
        pending.push((url.clone(), scheduler.submit(descriptor)?));
    }

    let outcomes: Vec<FetchOutcome> =
        futures::future::join_all(pending.into_iter().map(|(url, handle)| async move {
            match handle.await {
                Ok(response) => FetchOutcome {
                    url,
                    ok: true,
                    status: Some(response.status),
                    bytes: Some(response.body.len()),
                    attempts: Some(response.attempts),
                    error: None,
                },
                Err(err) => FetchOutcome {
                    url,
                    ok: false,
                    status: None,
                    bytes: None,
                    attempts: err.attempts(),
                    error: Some(err.to_string()),
                },
            }
        }))
        .await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcomes)?),
        OutputFormat::Text => outcomes.iter().for_each(FetchOutcome::print),
    }

    let stats = scheduler.stats();
    info!(?stats, "cmd_fetch: done");

    let failed = outcomes.iter().filter(|o| !o.ok).count();
    if failed > 0 {
        return Err(eyre!("{} of {} requests failed", failed, outcomes.len()));
    }
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
