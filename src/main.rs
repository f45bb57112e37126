use anyhow::Context;
use clap::Parser;
use feed_enricher::digest::{DigestEngine, TokenOverlapScorer};
use feed_enricher::scheduler::Scheduler;
use feed_enricher::sweep::{SweepRunner, WorkerPool};
use feed_enricher::{MinifluxClient, OpenAiBackend, Settings};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "feed-enricher", about = "AI enrichment and digests for a feed aggregator")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration errors stop the service here rather than degrading.
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let agents = settings.compile_agents().context("compiling agent rules")?;
    info!(agents = agents.len(), "configuration loaded");

    let store = Arc::new(MinifluxClient::new(&settings.store_config())?);
    let backend = Arc::new(OpenAiBackend::new(&settings.backend_config())?);
    let pool = Arc::new(WorkerPool::new(settings.llm.max_workers));
    let shutdown = Arc::new(AtomicBool::new(false));

    let budget = match settings.sweep.budget_seconds {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let sweeper = Arc::new(SweepRunner::new(
        store.clone(),
        backend.clone(),
        agents,
        pool.clone(),
        settings.retry_policy(),
        settings.sweep.page_size,
        budget,
        shutdown.clone(),
    ));

    let digest_times = settings.digest_times();
    let digest = if digest_times.is_empty() {
        None
    } else {
        Some(Arc::new(DigestEngine::new(
            store.clone(),
            sweeper.processed_log(),
            Box::new(TokenOverlapScorer),
            settings.digest.similarity_threshold,
            Duration::from_secs(settings.digest.window_hours * 3600),
            settings.digest.title.clone(),
            settings.retry_policy(),
        )))
    };

    let scheduler = Scheduler::new(
        sweeper,
        digest,
        settings.sweep_interval(),
        digest_times,
        shutdown.clone(),
    );

    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested, finishing in-flight work");
            signal_flag.store(true, Ordering::Relaxed);
        }
    });

    scheduler.run().await?;
    info!("service stopped");
    Ok(())
}
