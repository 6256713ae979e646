use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slotwatch::config::{Config, Settings};
use slotwatch::driver::WebDriverFactory;
use slotwatch::metrics;
use slotwatch::notifications::Notifier;
use slotwatch::orchestrator::{CheckOrchestrator, StatusReporter};

/// Upper bound for background tasks to wind down on exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "slotwatch",
    version,
    about = "Watches an appointment booking site and reports earlier available dates",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "slotwatch.toml")]
    config: PathBuf,

    /// Check frequency in minutes (overrides the config file)
    #[arg(long)]
    frequency: Option<u32>,

    /// Run the browser with a visible window
    #[arg(long)]
    no_headless: bool,

    /// Seconds between status summaries (0 disables)
    #[arg(long)]
    report_interval: Option<u64>,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9184
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Run a single check and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the config file value
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for earlier appointments (default)
    Run,

    /// Check the configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(Some(&cli.config))
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(frequency) = cli.frequency {
        config.schedule.frequency_minutes = frequency.max(1);
    }
    if cli.no_headless {
        config.browser.headless = false;
    }
    if let Some(interval) = cli.report_interval {
        config.schedule.report_interval_secs = interval;
    }
    if let Some(addr) = &cli.metrics_addr {
        config.metrics.listen_addr = Some(addr.clone());
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    let settings = config.validate().context("Invalid configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            println!("Configuration OK: {}", settings.masked_summary());
            Ok(())
        }
        Commands::Run => run(settings, cli.once).await,
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        String::from("slotwatch=debug,info")
    } else {
        format!("slotwatch={level},warn")
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn run(settings: Settings, once: bool) -> Result<()> {
    tracing::info!(
        current_appointment = %settings.current_appointment,
        window = %format!("{}..{}", settings.window.start, settings.window.end),
        frequency_minutes = settings.frequency_minutes,
        headless = settings.driver.headless,
        "slotwatch starting"
    );
    tracing::info!(summary = %settings.masked_summary(), "Configuration summary");
    if let Some(path) = &settings.heartbeat_path {
        tracing::info!(path = %path.display(), "Heartbeat file");
    }
    if settings.auto_book {
        tracing::warn!("auto_book is set; booking is never automated, only notifications are sent");
    }

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {e}");
    }

    let mut notifier = Notifier::new();
    if let Some(webhook) = settings.webhook.clone() {
        notifier
            .add_webhook_channel(webhook)
            .context("Failed to set up webhook notifications")?;
    }
    if let Some(email) = settings.email.clone() {
        notifier
            .add_email_channel(email)
            .context("Failed to set up email notifications")?;
    }
    tracing::info!(channels = ?notifier.channel_names(), "Notifications configured");

    let factory = Arc::new(WebDriverFactory::new(settings.driver.clone()));
    let mut orchestrator = CheckOrchestrator::new(&settings, factory, notifier)?;

    let metrics_server = match settings.metrics_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind metrics endpoint on {addr}"))?;
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
            let handle = tokio::spawn(metrics::serve_metrics(listener, async move {
                let _ = stop_rx.await;
            }));
            Some((stop_tx, handle))
        }
        None => None,
    };

    let reporter = settings
        .report_interval
        .map(|interval| StatusReporter::spawn(orchestrator.stats(), interval));

    let outcome = watch(&mut orchestrator, once).await;

    if let Some(reporter) = reporter {
        reporter.stop(STOP_TIMEOUT).await;
    }
    if let Some((stop_tx, handle)) = metrics_server {
        let _ = stop_tx.send(());
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Metrics endpoint failed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Metrics endpoint task panicked"),
            Err(_) => tracing::warn!("Metrics endpoint did not stop in time"),
            Ok(Ok(Ok(()))) => {}
        }
    }
    orchestrator.shutdown().await;
    tracing::info!(summary = %orchestrator.stats().read().await.summary(), "Browser session closed");

    outcome
}

async fn watch(orchestrator: &mut CheckOrchestrator, once: bool) -> Result<()> {
    let mut check = 0u64;

    loop {
        check += 1;
        tracing::info!(check, "Starting check");

        let cycle = tokio::select! {
            result = orchestrator.run_one_cycle() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stop signal received during check");
                return Ok(());
            }
        };

        match cycle {
            Ok(result) => {
                tracing::info!(
                    check,
                    outcome = result.outcome.label(),
                    success = result.success,
                    "Check finished"
                );
            }
            Err(e) => {
                tracing::error!(check, error = %e, "Stopping after terminal failure");
                return Err(e).context("Checker stopped");
            }
        }

        if once {
            return Ok(());
        }

        let plan = orchestrator.next_sleep();
        let next_check = Local::now()
            + chrono::Duration::from_std(plan.duration).unwrap_or(chrono::Duration::zero());
        tracing::info!(
            seconds = plan.duration.as_secs(),
            source = %plan.source,
            prime_time = plan.prime_time,
            next_check = %next_check.format("%H:%M:%S"),
            "Sleeping until next check"
        );

        tokio::select! {
            _ = tokio::time::sleep(plan.duration) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stop signal received");
                return Ok(());
            }
        }
    }
}
