//! Chain transport: log ranges, headers, head height and `eth_call`.

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use skale_common::{BlockHeader, IndexerError, Result};
use std::num::NonZeroU32;
use std::sync::Arc;

pub(crate) type SharedRateLimiter = Arc<
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
>;

/// A raw log as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
    pub removed: bool,
}

/// Which state an `eth_call` reads. Exactly one target per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallBlock {
    Number(u64),
    Pending,
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOpts {
    pub block: CallBlock,
    pub from: Option<Address>,
}

impl CallOpts {
    pub fn at(block_number: u64) -> Self {
        Self { block: CallBlock::Number(block_number), from: None }
    }

    pub fn pending() -> Self {
        Self { block: CallBlock::Pending, from: None }
    }

    pub fn latest() -> Self {
        Self { block: CallBlock::Latest, from: None }
    }
}

#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Logs in `[from, to]` emitted by any of `addresses`
    async fn get_logs(&self, from: u64, to: u64, addresses: &[Address]) -> Result<Vec<ChainLog>>;

    async fn get_block_header(&self, height: u64) -> Result<BlockHeader>;

    async fn get_current_block_height(&self) -> Result<u64>;

    /// Perform an `eth_call`. A revert without data or an empty return value
    /// yields `IndexerError::EmptyResponse`.
    async fn call(&self, opts: CallOpts, to: Address, input: Bytes) -> Result<Bytes>;
}

/// Transport over an alloy HTTP provider, paced by a shared rate limiter
pub struct AlloyTransport {
    provider: DynProvider,
    rate_limiter: SharedRateLimiter,
}

impl AlloyTransport {
    pub fn connect(rpc_url: &str, requests_per_second: u32) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| IndexerError::Config(format!("invalid RPC_URL {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter: SharedRateLimiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));
        tracing::info!("Rate limiting RPC requests to {} req/sec", rps);

        Ok(Self { provider, rate_limiter })
    }
}

#[async_trait]
impl ChainTransport for AlloyTransport {
    async fn get_logs(&self, from: u64, to: u64, addresses: &[Address]) -> Result<Vec<ChainLog>> {
        self.rate_limiter.until_ready().await;

        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(addresses.to_vec());
        let logs = self.provider.get_logs(&filter).await.map_err(transport_error)?;

        Ok(logs
            .into_iter()
            .map(|log| ChainLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number.unwrap_or_default(),
                log_index: log.log_index.unwrap_or_default(),
                tx_hash: log.transaction_hash.unwrap_or_default(),
                removed: log.removed,
            })
            .collect())
    }

    async fn get_block_header(&self, height: u64) -> Result<BlockHeader> {
        self.rate_limiter.until_ready().await;

        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .map_err(transport_error)?
            .ok_or_else(|| IndexerError::NotFound(format!("Block {} not found", height)))?;

        Ok(BlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        })
    }

    async fn get_current_block_height(&self) -> Result<u64> {
        self.rate_limiter.until_ready().await;
        self.provider.get_block_number().await.map_err(transport_error)
    }

    async fn call(&self, opts: CallOpts, to: Address, input: Bytes) -> Result<Bytes> {
        self.rate_limiter.until_ready().await;

        let mut request = TransactionRequest::default().to(to).input(input.into());
        if let Some(from) = opts.from {
            request = request.from(from);
        }
        let block = match opts.block {
            CallBlock::Number(number) => BlockId::number(number),
            CallBlock::Pending => BlockId::pending(),
            CallBlock::Latest => BlockId::latest(),
        };

        match self.provider.call(request).block(block).await {
            Ok(output) if output.is_empty() => Err(IndexerError::EmptyResponse),
            Ok(output) => Ok(output),
            Err(e) if is_empty_revert(&e) => Err(IndexerError::EmptyResponse),
            Err(e) => Err(transport_error(e)),
        }
    }
}

fn transport_error(err: RpcError<TransportErrorKind>) -> IndexerError {
    IndexerError::Transport(err.to_string())
}

/// `execution reverted` carrying no revert data (`0x`)
fn is_empty_revert(err: &RpcError<TransportErrorKind>) -> bool {
    match err {
        RpcError::ErrorResp(payload) => {
            let reverted = payload.message.to_lowercase().contains("revert");
            let data = payload
                .data
                .as_ref()
                .map(|raw| raw.get().trim_matches('"').to_string());
            reverted && matches!(data.as_deref(), None | Some("") | Some("0x"))
        }
        _ => false,
    }
}
