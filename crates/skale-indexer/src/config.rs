use anyhow::{Context, Result};
use skale_indexer::callers::NodeMode;
use skale_indexer::indexer::IndexerOptions;
use skale_indexer::registry::ContractVersion;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub rpc_url: String,
    pub rpc_requests_per_second: u32,
    pub abi_dir: PathBuf,
    pub network: String,
    pub chain_id: Option<u64>,
    pub control_addr: SocketAddr,
    pub metrics_addr: Option<SocketAddr>,
    pub node_mode: NodeMode,
    pub contract_version: Option<String>,
    pub scrape_workers: usize,
    pub sync_workers: usize,
    pub sync_batch_size: u64,
    pub view_call_timeout: Duration,
    pub start_block: u64,
    pub batch_size: u64,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid DB_MAX_CONNECTIONS")?,
            rpc_url: env::var("RPC_URL")
                .context("RPC_URL must be set")?,
            rpc_requests_per_second: env::var("RPC_REQUESTS_PER_SECOND")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid RPC_REQUESTS_PER_SECOND")?,
            abi_dir: env::var("ABI_DIR")
                .context("ABI_DIR must be set")?
                .into(),
            network: env::var("NETWORK")
                .context("NETWORK must be set")?,
            chain_id: env::var("CHAIN_ID")
                .ok()
                .map(|raw| raw.parse())
                .transpose()
                .context("Invalid CHAIN_ID")?,
            control_addr: env::var("CONTROL_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
                .parse()
                .context("Invalid CONTROL_ADDR")?,
            metrics_addr: env::var("METRICS_ADDR")
                .ok()
                .map(|raw| raw.parse())
                .transpose()
                .context("Invalid METRICS_ADDR")?,
            node_mode: env::var("NODE_MODE")
                .unwrap_or_else(|_| "archive".to_string())
                .parse()
                .context("Invalid NODE_MODE")?,
            contract_version: env::var("CONTRACT_VERSION").ok(),
            scrape_workers: env::var("SCRAPE_WORKERS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid SCRAPE_WORKERS")?,
            sync_workers: env::var("SYNC_WORKERS")
                .unwrap_or_else(|_| "40".to_string())
                .parse()
                .context("Invalid SYNC_WORKERS")?,
            sync_batch_size: env::var("SYNC_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid SYNC_BATCH_SIZE")?,
            view_call_timeout: Duration::from_secs(
                env::var("VIEW_CALL_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid VIEW_CALL_TIMEOUT_SECS")?,
            ),
            start_block: env::var("START_BLOCK")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("Invalid START_BLOCK")?,
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid BATCH_SIZE")?,
            poll_interval: Duration::from_secs(
                env::var("POLL_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("Invalid POLL_INTERVAL_SECS")?,
            ),
        })
    }

    pub fn indexer_options(&self) -> IndexerOptions {
        IndexerOptions {
            network: self.network.clone(),
            chain_id: self.chain_id,
            start_block: self.start_block,
            batch_size: self.batch_size.max(1),
            poll_interval: self.poll_interval,
            scrape_workers: self.scrape_workers,
            sync_workers: self.sync_workers,
            sync_batch_size: self.sync_batch_size,
            version: self.contract_version.as_deref().map(ContractVersion::parse),
        }
    }
}
