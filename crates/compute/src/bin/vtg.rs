//! vtg: verification task generator.
//!
//! Loads the requirement catalog, classifies the selected requirements and
//! schedules one verification task per (fragment, environment model,
//! requirement) through a spool-directory scheduler session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use vtg_compute::pipeline::StageRegistry;
use vtg_compute::scheduler::{
    fragment_handshake, load_fragments, load_requirement_classes, LogProgress, Orchestrator,
    ShutdownHandle, SpoolSession,
};
use vtg_core::config::load_dotenv;
use vtg_core::GenerationConfig;

// ── CLI ─────────────────────────────────────────────────────────────

/// Generate and schedule verification tasks for program fragments.
#[derive(Parser, Debug)]
#[command(name = "vtg", version, about)]
struct Cli {
    /// Path to the generation config (TOML).
    #[arg(long, env = "VTG_CONFIG", default_value = "vtg.toml")]
    config: PathBuf,

    /// Fragment listing, overriding `fragments_file` from the config.
    #[arg(long, env = "VTG_FRAGMENTS")]
    fragments: Option<PathBuf>,

    /// Spool directory shared with the verification backend.
    #[arg(long, env = "VTG_SPOOL", default_value = "spool")]
    spool: PathBuf,

    /// Classify requirements, print the classes as JSON and exit.
    #[arg(long)]
    dry_run: bool,
}

// ── Signals ─────────────────────────────────────────────────────────

/// Install SIGINT/SIGTERM handlers and trigger `shutdown` on the first one.
#[cfg(unix)]
fn watch_signals(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    use anyhow::Context;
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        info!("Signal received, cancelling generation");
        shutdown.trigger();
    });
    Ok(())
}

#[cfg(not(unix))]
fn watch_signals(shutdown: ShutdownHandle) -> anyhow::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Signal received, cancelling generation");
                shutdown.trigger();
            }
            Err(e) => error!(error = %e, "Failed to listen for ctrl_c"),
        }
    });
    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = GenerationConfig::from_file(&cli.config)?;
    config.log_summary();

    let classes = load_requirement_classes(&config)?;
    info!(
        classes = classes.len(),
        requirements = classes.total_requirements(),
        "Requirement classes built"
    );
    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&classes)?);
        return Ok(());
    }

    let registry = StageRegistry::from_plugins(&config.plugins)?;
    registry.ensure_covers(&classes)?;

    let spool = config.resolve(&cli.spool);
    tokio::fs::create_dir_all(&spool).await?;
    let session = Arc::new(SpoolSession::new(spool));

    let fragments_listing = cli.fragments.clone();
    let fragments_config = config.clone();
    let orchestrator = Orchestrator::new(config, classes, registry, session, Arc::new(LogProgress));
    watch_signals(orchestrator.shutdown_handle())?;

    let (tx, rx) = fragment_handshake();
    let loader = tokio::spawn(async move {
        let fragments = load_fragments(&fragments_config, fragments_listing.as_deref())?;
        if tx.send(fragments).is_err() {
            error!("Orchestrator stopped before fragment descriptions were delivered");
        }
        Ok::<_, vtg_compute::GenerationError>(())
    });

    let report = orchestrator.run(rx).await;
    loader.await??;
    let report = report?;

    info!(
        finished = report.finished,
        failed = report.failed,
        rescheduled = report.rescheduled,
        elapsed = ?report.metrics.elapsed(),
        "Sub-job complete"
    );
    if report.cancelled {
        anyhow::bail!("generation was cancelled before every task finished");
    }
    Ok(())
}
