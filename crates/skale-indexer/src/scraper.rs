//! Range scraper: fetch every registered contract's logs in a block range and
//! run them through the dispatcher on a fixed pool of workers.
//!
//! Logs are handled in parallel and in no particular order. Outputs are
//! re-sorted by `(block_height, log_index)` before they are reported.

use alloy::primitives::{Address, B256};
use skale_common::{ContractEvent, IndexerError, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::EventDispatcher;
use crate::handlers::HandlerContext;
use crate::header_cache::{BlockRange, HeaderCache};
use crate::transport::ChainLog;

pub const DEFAULT_SCRAPE_WORKERS: usize = 5;

/// Result of handling one log
#[derive(Debug)]
pub struct ScrapeOutput {
    /// Position of the log in the transport's response
    pub order: usize,
    pub block_height: u64,
    pub log_index: u64,
    pub tx_hash: B256,
    pub address: Address,
    pub result: Result<ContractEvent>,
}

#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub from: u64,
    pub to: u64,
    /// Sorted by `(block_height, log_index)`
    pub outputs: Vec<ScrapeOutput>,
    /// Logs returned by the transport
    pub total: usize,
    pub cancelled: bool,
}

impl ScrapeReport {
    pub fn processed(&self) -> usize {
        self.outputs.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = (&ScrapeOutput, &IndexerError)> {
        self.outputs
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o, e)))
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// Whether every log was handled without error
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.outputs.len() == self.total && self.error_count() == 0
    }
}

pub struct RangeScraper {
    ctx: Arc<HandlerContext>,
    workers: usize,
}

impl RangeScraper {
    pub fn new(ctx: Arc<HandlerContext>, workers: usize) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
        }
    }

    /// Scrape `[range.from, range.to]` for every registered contract.
    pub async fn scrape(&self, range: BlockRange, cancel: CancellationToken) -> Result<ScrapeReport> {
        let addresses = self.ctx.registry.addresses();
        self.scrape_addresses(range, &addresses, cancel).await
    }

    /// Scrape `[range.from, range.to]` for the given contracts. Fetching the
    /// logs or losing a worker fails the whole call; per-log failures are
    /// reported in the outputs.
    pub async fn scrape_addresses(
        &self,
        range: BlockRange,
        addresses: &[Address],
        cancel: CancellationToken,
    ) -> Result<ScrapeReport> {
        let started = Instant::now();
        let logs = self
            .ctx
            .view
            .transport()
            .get_logs(range.from, range.to, addresses)
            .await?;

        let mut report = ScrapeReport {
            from: range.from,
            to: range.to,
            total: logs.len(),
            ..Default::default()
        };
        if logs.is_empty() {
            tracing::debug!("No logs in blocks {} to {}", range.from, range.to);
            return Ok(report);
        }

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&self.ctx),
            Arc::new(HeaderCache::new()),
        ));
        let (input_tx, input_rx) = async_channel::unbounded::<(usize, ChainLog)>();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel::<ScrapeOutput>();

        let worker_count = self.workers.min(logs.len());
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let input_rx = input_rx.clone();
            let output_tx = output_tx.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                tracing::debug!("Scrape worker {} started", worker_id);
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        next = input_rx.recv() => next,
                    };
                    let Ok((order, log)) = next else {
                        break;
                    };
                    let output = process(&dispatcher, order, log).await;
                    if output_tx.send(output).is_err() {
                        break;
                    }
                }
                tracing::debug!("Scrape worker {} shutting down", worker_id);
            }));
        }
        // the collector below ends once every worker has dropped its sender
        drop(output_tx);

        for (order, log) in logs.into_iter().enumerate() {
            if input_tx.send((order, log)).await.is_err() {
                break;
            }
        }
        input_tx.close();

        while report.outputs.len() < report.total {
            match output_rx.recv().await {
                Some(output) => report.outputs.push(output),
                None => break,
            }
        }

        let mut lost_workers = 0;
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Scrape worker panicked: {}", e);
                lost_workers += 1;
            }
        }
        if lost_workers > 0 {
            return Err(IndexerError::Internal(format!(
                "{} scrape workers failed in blocks {} to {}; {} of {} logs handled",
                lost_workers,
                range.from,
                range.to,
                report.outputs.len(),
                report.total
            )));
        }

        report.cancelled = report.outputs.len() < report.total;
        report.outputs.sort_by_key(|o| (o.block_height, o.log_index));

        let elapsed = started.elapsed();
        metrics::histogram!("indexer_scrape_duration_seconds").record(elapsed.as_secs_f64());
        tracing::info!(
            "Scraped blocks {} to {}: {} logs, {} errors in {:.2}s{}",
            range.from,
            range.to,
            report.total,
            report.error_count(),
            elapsed.as_secs_f64(),
            if report.cancelled { " (cancelled)" } else { "" }
        );

        Ok(report)
    }
}

/// Dispatch one log and persist the annotated event when its handler succeeds.
async fn process(dispatcher: &EventDispatcher, order: usize, log: ChainLog) -> ScrapeOutput {
    let ctx = dispatcher.context();
    let contract = ctx
        .registry
        .resolve_by_address(&log.address)
        .map(|binding| binding.name.as_str())
        .unwrap_or("unknown");

    let result = match dispatcher.dispatch(&log).await {
        Ok(event) => ctx.store.save_contract_event(&event).await.map(|()| event),
        Err(e) => Err(e),
    };

    match &result {
        Ok(_) => {
            metrics::counter!("indexer_logs_processed_total", "contract" => contract).increment(1);
        }
        Err(e) => {
            metrics::counter!("indexer_log_errors_total", "contract" => contract).increment(1);
            if !matches!(e, IndexerError::Decode(_)) {
                // decode failures are already logged by the dispatcher
                tracing::warn!(
                    tx_hash = %log.tx_hash,
                    address = %log.address,
                    block = log.block_number,
                    "Failed to handle log: {}",
                    e
                );
            }
        }
    }

    ScrapeOutput {
        order,
        block_height: log.block_number,
        log_index: log.log_index,
        tx_hash: log.tx_hash,
        address: log.address,
        result,
    }
}
