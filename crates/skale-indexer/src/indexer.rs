//! Orchestrator: one-off range scrapes, catch-up scrapes requested over the
//! control surface, and the follow loop with monthly epoch synchronisation.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skale_common::{BlockHeader, ContractName, IndexerError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::handlers::HandlerContext;
use crate::header_cache::BlockRange;
use crate::registry::ContractVersion;
use crate::scraper::{RangeScraper, ScrapeReport, DEFAULT_SCRAPE_WORKERS};
use crate::store::{LAST_INDEXED_BLOCK, LAST_SYNCED_EPOCH};
use crate::sync::{EpochSynchroniser, SyncSummary, DEFAULT_SYNC_BATCH_SIZE, DEFAULT_SYNC_WORKERS};

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub network: String,
    pub chain_id: Option<u64>,
    pub start_block: u64,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub scrape_workers: usize,
    pub sync_workers: usize,
    pub sync_batch_size: u64,
    /// Contract version used for epoch syncs; the newest validator service
    /// version when unset
    pub version: Option<ContractVersion>,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            chain_id: None,
            start_block: 0,
            batch_size: 1000,
            poll_interval: Duration::from_secs(5),
            scrape_workers: DEFAULT_SCRAPE_WORKERS,
            sync_workers: DEFAULT_SYNC_WORKERS,
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            version: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeLatestRequest {
    pub network: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
    pub last_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeLatestResponse {
    pub last_height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestOutcome {
    Completed(ScrapeLatestResponse),
    /// Another catch-up scrape is running
    Processing(ScrapeLatestResponse),
}

/// Position of the follow loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowCursor {
    pub next_block: u64,
    /// `YYYY-MM` of the last processed block
    pub epoch: Option<String>,
}

/// Clears the in-flight flag of a catch-up scrape when dropped
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Indexer {
    ctx: Arc<HandlerContext>,
    scraper: RangeScraper,
    synchroniser: EpochSynchroniser,
    options: IndexerOptions,
    latest_in_flight: AtomicBool,
    latest_height: AtomicU64,
}

impl Indexer {
    pub fn new(ctx: Arc<HandlerContext>, options: IndexerOptions) -> Self {
        Self {
            scraper: RangeScraper::new(Arc::clone(&ctx), options.scrape_workers),
            synchroniser: EpochSynchroniser::new(Arc::clone(&ctx), options.sync_workers, options.sync_batch_size),
            ctx,
            latest_in_flight: AtomicBool::new(false),
            latest_height: AtomicU64::new(0),
            options,
        }
    }

    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.ctx
    }

    /// Scrape `[from, to]` once.
    pub async fn scrape_range(&self, from: u64, to: u64) -> Result<ScrapeReport> {
        if from > to {
            return Err(IndexerError::InvalidParameter(format!(
                "from ({}) must not exceed to ({})",
                from, to
            )));
        }
        self.scraper
            .scrape(BlockRange::new(from, to), CancellationToken::new())
            .await
    }

    /// Scrape `(last_height, head]` in batches. A second request made while
    /// one is running answers immediately with the last height reached.
    pub async fn scrape_latest(&self, request: &ScrapeLatestRequest) -> Result<LatestOutcome> {
        let addresses = self.check_target(request)?;

        let Some(_guard) = self.try_begin_latest() else {
            return Ok(LatestOutcome::Processing(ScrapeLatestResponse {
                last_height: self.latest_height.load(Ordering::SeqCst),
                error: None,
            }));
        };

        let head = self.ctx.view.transport().get_current_block_height().await?;
        let mut last_height = request.last_height;
        self.latest_height.store(last_height, Ordering::SeqCst);

        let mut error = None;
        while last_height < head {
            let to = last_height.saturating_add(self.options.batch_size).min(head);
            let range = BlockRange::new(last_height + 1, to);
            match self
                .scraper
                .scrape_addresses(range, &addresses, CancellationToken::new())
                .await
            {
                Ok(report) if report.is_clean() => {
                    last_height = to;
                    self.latest_height.store(last_height, Ordering::SeqCst);
                }
                Ok(report) => {
                    error = Some(format!(
                        "{} of {} logs failed in blocks {} to {}",
                        report.error_count(),
                        report.total,
                        report.from,
                        report.to
                    ));
                    break;
                }
                Err(e) => {
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(LatestOutcome::Completed(ScrapeLatestResponse { last_height, error }))
    }

    fn try_begin_latest(&self) -> Option<InFlight<'_>> {
        if self.latest_in_flight.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(InFlight(&self.latest_in_flight))
    }

    /// Validate the request against this indexer and pick the contracts to
    /// scrape: those of the requested version, or every registered one.
    fn check_target(&self, request: &ScrapeLatestRequest) -> Result<Vec<Address>> {
        if request.network != self.options.network {
            return Err(IndexerError::InvalidParameter(format!(
                "indexer serves network {}, not {}",
                self.options.network, request.network
            )));
        }
        if let (Some(expected), Some(requested)) = (self.options.chain_id, request.chain_id) {
            if expected != requested {
                return Err(IndexerError::InvalidParameter(format!(
                    "indexer serves chain {}, not {}",
                    expected, requested
                )));
            }
        }
        let Some(version) = &request.version else {
            return Ok(self.ctx.registry.addresses());
        };
        let version = ContractVersion::parse(version);
        if self
            .ctx
            .registry
            .resolve_by_name_version(ContractName::ValidatorService, &version)
            .is_none()
        {
            return Err(IndexerError::NotFound(format!("contract version {} is not registered", version)));
        }
        Ok(self.ctx.registry.version_addresses(&version))
    }

    /// Epoch synchronisation at `block_height` (the chain head when unset).
    pub async fn sync(&self, version: Option<&str>, block_height: Option<u64>) -> Result<SyncSummary> {
        let version = match version {
            Some(raw) => ContractVersion::parse(raw),
            None => self.sync_version()?,
        };
        let height = match block_height {
            Some(height) => height,
            None => self.ctx.view.transport().get_current_block_height().await?,
        };
        let header = self.header(height).await?;
        self.synchroniser.sync(&version, height, header.time()).await
    }

    fn sync_version(&self) -> Result<ContractVersion> {
        if let Some(version) = &self.options.version {
            return Ok(version.clone());
        }
        self.ctx
            .registry
            .best_version(ContractName::ValidatorService)
            .map(|binding| binding.version.clone())
            .ok_or_else(|| IndexerError::Config("no validator_service contract registered".to_string()))
    }

    async fn header(&self, height: u64) -> Result<BlockHeader> {
        self.ctx.view.transport().get_block_header(height).await
    }

    /// Follow the chain head until `cancel` fires.
    pub async fn follow(&self, cancel: CancellationToken) -> Result<()> {
        let mut cursor = self.resume().await?;
        tracing::info!("Following chain from block {}", cursor.next_block);

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Follow loop stopped before block {}", cursor.next_block);
                return Ok(());
            }
            if self.advance(&mut cursor, &cancel).await? {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    /// Cursor restored from the stored checkpoint
    pub async fn resume(&self) -> Result<FollowCursor> {
        let store = &self.ctx.store;
        let checkpoint = match store.get_state(LAST_INDEXED_BLOCK).await? {
            Some(raw) => Some(raw.parse::<u64>().map_err(|e| {
                IndexerError::Internal(format!("corrupt {} checkpoint {}: {}", LAST_INDEXED_BLOCK, raw, e))
            })?),
            None => None,
        };
        let next_block = checkpoint
            .map(|block| block + 1)
            .unwrap_or(0)
            .max(self.options.start_block);

        Ok(FollowCursor {
            next_block,
            epoch: store.get_state(LAST_SYNCED_EPOCH).await?,
        })
    }

    /// Scrape the next batch up to the head. Returns false when already at
    /// the head. A range with failed logs fails the call without moving the
    /// checkpoint.
    pub async fn advance(&self, cursor: &mut FollowCursor, cancel: &CancellationToken) -> Result<bool> {
        let head = self.ctx.view.transport().get_current_block_height().await?;
        if cursor.next_block > head {
            return Ok(false);
        }
        let from = cursor.next_block;
        let to = from.saturating_add(self.options.batch_size.saturating_sub(1)).min(head);

        let report = self.scraper.scrape(BlockRange::new(from, to), cancel.child_token()).await?;
        if report.cancelled {
            return Ok(false);
        }
        if let Some((output, error)) = report.errors().next() {
            return Err(IndexerError::Internal(format!(
                "{} logs failed in blocks {} to {}, first at block {} tx {}: {}",
                report.error_count(),
                from,
                to,
                output.block_height,
                output.tx_hash,
                error
            )));
        }

        self.roll_epoch(cursor, from, to).await?;

        let store = &self.ctx.store;
        store.set_state(LAST_INDEXED_BLOCK, &to.to_string()).await?;
        metrics::gauge!("indexer_last_indexed_block").set(to as f64);
        cursor.next_block = to + 1;
        Ok(true)
    }

    /// Run the epoch synchroniser when `[from, to]` enters a new month.
    async fn roll_epoch(&self, cursor: &mut FollowCursor, from: u64, to: u64) -> Result<()> {
        let store = &self.ctx.store;
        let last = self.header(to).await?;
        let month = epoch_of(&last.time());

        let Some(previous) = cursor.epoch.clone() else {
            store.set_state(LAST_SYNCED_EPOCH, &month).await?;
            cursor.epoch = Some(month);
            return Ok(());
        };
        if month <= previous {
            return Ok(());
        }

        let boundary = self.first_block_after(from, to, &previous).await?;
        tracing::info!("Epoch {} starts at block {}", month, boundary.number);
        let version = self.sync_version()?;
        self.synchroniser
            .sync(&version, boundary.number, boundary.time())
            .await?;

        store.set_state(LAST_SYNCED_EPOCH, &month).await?;
        cursor.epoch = Some(month);
        Ok(())
    }

    /// First block in `[from, to]` whose month is later than `previous`.
    /// Block `to` must satisfy that.
    async fn first_block_after(&self, from: u64, to: u64, previous: &str) -> Result<BlockHeader> {
        let (mut low, mut high) = (from, to);
        while low < high {
            let mid = low + (high - low) / 2;
            if epoch_of(&self.header(mid).await?.time()).as_str() > previous {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        self.header(low).await
    }
}

fn epoch_of(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m").to_string()
}
