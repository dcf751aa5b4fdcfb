use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skale_indexer::callers::ViewCaller;
use skale_indexer::control;
use skale_indexer::handlers::HandlerContext;
use skale_indexer::indexer::Indexer;
use skale_indexer::registry::ContractRegistry;
use skale_indexer::store::{PgStore, Store};
use skale_indexer::transport::{AlloyTransport, ChainTransport};

mod config;

/// Retry delays for exponential backoff (in seconds)
const RETRY_DELAYS: &[u64] = &[5, 10, 20, 30, 60];
const MAX_RETRY_DELAY: u64 = 60;
/// An attempt that ran this long before failing starts the backoff over.
const HEALTHY_RUN: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(version, about = "SKALE staking contracts indexer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the control surface only
    Serve,
    /// Follow the chain head and serve the control surface
    Follow,
    /// Scrape one block range and exit
    Scrape {
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },
    /// Run one epoch synchronisation and exit
    Sync {
        /// Block to synchronise at (defaults to the chain head)
        #[arg(long)]
        block: Option<u64>,
        /// Contract version (defaults to CONTRACT_VERSION or the newest registered)
        #[arg(long)]
        version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    tracing::info!("Starting SKALE Indexer");

    // Load configuration
    let config = config::Config::from_env()?;

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!("Serving metrics on {}", addr);
    }

    // Create database pool
    let pool = skale_common::db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    tracing::info!("Running database migrations");
    skale_common::db::run_migrations(&pool).await?;

    let registry = Arc::new(ContractRegistry::load_dir(&config.abi_dir)?);
    let transport: Arc<dyn ChainTransport> =
        Arc::new(AlloyTransport::connect(&config.rpc_url, config.rpc_requests_per_second)?);
    let view = Arc::new(ViewCaller::new(transport, config.node_mode, config.view_call_timeout));
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let ctx = Arc::new(HandlerContext::new(store, registry, view));
    let indexer = Arc::new(Indexer::new(ctx, config.indexer_options()));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
            }
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Serve => {
            control::serve(config.control_addr, indexer, cancel).await?;
        }
        Command::Follow => {
            let server = tokio::spawn(control::serve(config.control_addr, Arc::clone(&indexer), cancel.clone()));
            run_with_retry(&cancel, || indexer.follow(cancel.clone())).await?;
            server.await??;
        }
        Command::Scrape { from, to } => {
            let report = indexer.scrape_range(from, to).await?;
            for (output, error) in report.errors() {
                tracing::error!(
                    block = output.block_height,
                    tx_hash = %output.tx_hash,
                    "Log failed: {}",
                    error
                );
            }
            anyhow::ensure!(
                report.is_clean(),
                "{} of {} logs failed in blocks {} to {}",
                report.error_count(),
                report.total,
                from,
                to
            );
        }
        Command::Sync { block, version } => {
            let summary = indexer.sync(version.as_deref(), block).await?;
            tracing::info!(
                "Synchronised {} validators, {} nodes, {} delegations at block {}",
                summary.validators,
                summary.nodes,
                summary.delegations,
                summary.block_height
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "skale_indexer=info,tower_http=info,sqlx=warn".into()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Run an async function with exponential backoff retry until it returns
/// cleanly. Per-log failures surface here as errors and are retried from
/// the last checkpoint.
async fn run_with_retry<F, Fut>(cancel: &CancellationToken, f: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = skale_common::Result<()>>,
{
    let mut retry_count = 0;

    loop {
        let started = tokio::time::Instant::now();
        match f().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if started.elapsed() >= HEALTHY_RUN {
                    retry_count = 0;
                }
                // Get delay for this retry (cap at MAX_RETRY_DELAY)
                let delay = RETRY_DELAYS
                    .get(retry_count)
                    .copied()
                    .unwrap_or(MAX_RETRY_DELAY);

                tracing::error!(
                    "Follow loop failed: {}. Restarting in {}s (attempt {})...",
                    e,
                    delay,
                    retry_count + 1
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                }
                retry_count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skale_common::IndexerError;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_backoff_restarts_after_healthy_run() {
        let cancel = CancellationToken::new();
        let origin = tokio::time::Instant::now();
        let starts = Mutex::new(Vec::new());
        let (starts_ref, cancel_ref) = (&starts, &cancel);

        run_with_retry(&cancel, move || async move {
            let attempt = {
                let mut starts = starts_ref.lock().unwrap();
                starts.push(origin.elapsed().as_secs());
                starts.len()
            };
            match attempt {
                // made progress for ten minutes before failing
                3 => tokio::time::sleep(Duration::from_secs(600)).await,
                5 => cancel_ref.cancel(),
                _ => {}
            }
            Err(IndexerError::Transport("connection reset".into()))
        })
        .await
        .unwrap();

        // 5s and 10s backoffs, then the long run resets to 5s before climbing again
        assert_eq!(*starts.lock().unwrap(), vec![0, 5, 15, 620, 630]);
    }
}
