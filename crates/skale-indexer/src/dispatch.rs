use skale_common::{ContractEvent, IndexerError, Result};
use std::sync::Arc;

use crate::decode::decode_log;
use crate::handlers::{self, HandlerContext};
use crate::header_cache::HeaderCache;
use crate::transport::ChainLog;

/// Turns one raw log into an annotated contract event: resolves the emitting
/// contract, timestamps the log, decodes it and runs the family handler.
pub struct EventDispatcher {
    ctx: Arc<HandlerContext>,
    headers: Arc<HeaderCache>,
}

impl EventDispatcher {
    pub fn new(ctx: Arc<HandlerContext>, headers: Arc<HeaderCache>) -> Self {
        Self { ctx, headers }
    }

    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.ctx
    }

    pub async fn dispatch(&self, log: &ChainLog) -> Result<ContractEvent> {
        let binding = self
            .ctx
            .registry
            .resolve_by_address(&log.address)
            .ok_or_else(|| IndexerError::NotFound(format!("contract not found for address {}", log.address)))?;

        let header = self
            .headers
            .get_or_fetch(log.block_number, self.ctx.view.transport().as_ref())
            .await?;

        let decoded = decode_log(&self.ctx.registry, log).inspect_err(|e| {
            tracing::warn!(tx_hash = %log.tx_hash, address = %log.address, error = %e, "Failed to decode log");
        })?;

        let event = ContractEvent {
            id: None,
            contract_name: binding.name,
            event_name: decoded.event_name.clone(),
            contract_address: log.address,
            block_height: log.block_number,
            log_index: log.log_index,
            time: header.time(),
            tx_hash: log.tx_hash,
            params: decoded.params.to_json(),
            removed: log.removed,
            bound_type: None,
            bound_ids: Vec::new(),
            bound_addresses: Vec::new(),
            flagged: false,
        };

        handlers::handle(&self.ctx, &binding, &decoded, event).await
    }
}
