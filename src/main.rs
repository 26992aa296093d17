//! s3-janitor: discovers and aborts stale multipart uploads across
//! account profiles and buckets.

use anyhow::{Context, Result};
use clap::Parser;
use common::aws::AwsClientFactory;
use common::config::Configuration;
use reaper::{FleetConfig, Policy, Report, TargetSpec};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "s3-janitor.toml")]
    config: String,

    /// Reap only this profile, overriding configured targets
    #[arg(short, long)]
    profile: Option<String>,

    /// Bucket to reap within --profile; repeatable, omit to discover all
    #[arg(short, long)]
    bucket: Vec<String>,

    /// Region override for --profile
    #[arg(long)]
    region: Option<String>,

    /// Actually abort uploads instead of the default dry run
    #[arg(long)]
    execute: bool,

    /// Print the full report as JSON on stdout
    #[arg(long)]
    json: bool,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

fn print_summary(report: &Report) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("run {}{}", report.run_id, mode);
    for target in &report.targets {
        let status = match target.state {
            reaper::ReaperState::Failed => "FAILED",
            _ if target.cancelled => "cancelled",
            _ => "done",
        };
        println!(
            "  {:<40} {:>8}  {} outcomes",
            target.target.to_string(),
            status,
            target.outcomes.len()
        );
        if let Some(error) = &target.error {
            println!("    error: {error}");
        }
    }
    for failure in &report.failed_targets {
        println!("  {:<40}   FAILED  {}", failure.profile, failure.error);
    }
    println!(
        "totals: {} aborted, {} kept, {} skipped, {} failed",
        report.totals.aborted, report.totals.kept, report.totals.skipped, report.totals.failed
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let config = if std::path::Path::new(&args.config).exists() {
        Configuration::load_from_path(std::path::Path::new(&args.config))
            .context("Failed to load configuration")?
    } else {
        log::info!("Configuration file not found, using defaults");
        Configuration::load().context("Failed to load configuration")?
    };
    config.validate().context("Invalid configuration")?;

    let mut reaper_config = config.reaper.clone();
    if args.execute {
        reaper_config.dry_run = false;
    }

    let specs: Vec<TargetSpec> = match &args.profile {
        Some(profile) => vec![TargetSpec {
            profile: profile.clone(),
            region: args.region.clone(),
            buckets: args.bucket.clone(),
        }],
        None => config.targets.iter().map(TargetSpec::from).collect(),
    };
    if specs.is_empty() {
        anyhow::bail!("no targets: configure [[targets]] or pass --profile");
    }

    let policy = Policy::from(&config.policy);
    let fleet_config = FleetConfig::from(&reaper_config);

    if fleet_config.dry_run {
        log::info!("Running in dry-run mode; pass --execute to abort uploads");
    }

    // A shutdown signal stops new abort dispatches; in-flight calls finish
    // and the report still comes out.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    log::info!("Shutting down, letting in-flight aborts finish");
                    cancel.cancel();
                }
                Err(e) => log::error!("Failed to listen for shutdown signal: {e:?}"),
            }
        });
    }

    let factory = Arc::new(AwsClientFactory::new());
    let report = reaper::run(factory, specs, policy, fleet_config, cancel).await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_summary(&report);
    }

    if !report.is_clean() {
        std::process::exit(1);
    }

    Ok(())
}
