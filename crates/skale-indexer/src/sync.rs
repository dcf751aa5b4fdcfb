//! Epoch synchroniser: walk every validator, node and delegation at one block
//! and snapshot per-validator statistics.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skale_common::{ContractName, Delegation, IndexerError, Node, Result, ValidatorSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::callers::{DelegationCaller, NodesCaller, ValidatorServiceCaller};
use crate::handlers::HandlerContext;
use crate::registry::ContractVersion;

pub const DEFAULT_SYNC_WORKERS: usize = 40;
pub const DEFAULT_SYNC_BATCH_SIZE: u64 = 10;

/// Node counts of one validator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeAggregationInfo {
    pub active_count: u64,
    pub linked_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub block_height: u64,
    pub validators: usize,
    pub nodes: usize,
    pub delegations: usize,
}

pub struct EpochSynchroniser {
    ctx: Arc<HandlerContext>,
    workers: usize,
    batch_size: u64,
    // fields other than state, started and finished never change once created
    delegations: RwLock<HashMap<U256, Delegation>>,
}

impl EpochSynchroniser {
    pub fn new(ctx: Arc<HandlerContext>, workers: usize, batch_size: u64) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
            batch_size: batch_size.max(1),
            delegations: RwLock::new(HashMap::new()),
        }
    }

    /// Synchronise against state at `block_height`. Fails on the first
    /// subtask error, before any statistic is written.
    pub async fn sync(
        &self,
        version: &ContractVersion,
        block_height: u64,
        block_time: DateTime<Utc>,
    ) -> Result<SyncSummary> {
        let started = Instant::now();
        let validator_service = ValidatorServiceCaller::new(self.contract(ContractName::ValidatorService, version)?);
        let nodes = NodesCaller::new(self.contract(ContractName::Nodes, version)?);
        let delegations = DelegationCaller::new(self.contract(ContractName::DelegationController, version)?);

        tracing::info!("Epoch sync of {} contracts at block {}", version, block_height);

        let (validator_ids, (node_count, node_info), (delegation_count, stakes)) = tokio::try_join!(
            self.sync_validators(&validator_service, block_height),
            self.sync_nodes(&nodes, block_height, block_time),
            self.sync_delegations(&delegations, block_height),
        )?;

        let snapshots: Vec<ValidatorSnapshot> = validator_ids
            .iter()
            .map(|id| {
                let info = node_info.get(id).copied().unwrap_or_default();
                ValidatorSnapshot {
                    validator_id: *id,
                    active_nodes: U256::from(info.active_count),
                    linked_nodes: U256::from(info.linked_count),
                    total_stake: stakes.get(id).copied().unwrap_or(U256::ZERO),
                }
            })
            .collect();
        self.ctx
            .store
            .save_validator_snapshots(&snapshots, block_height, block_time)
            .await?;

        let summary = SyncSummary {
            block_height,
            validators: validator_ids.len(),
            nodes: node_count,
            delegations: delegation_count,
        };
        metrics::histogram!("indexer_sync_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            "Epoch sync at block {} done: {} validators, {} nodes, {} delegations in {:.2}s",
            block_height,
            summary.validators,
            summary.nodes,
            summary.delegations,
            started.elapsed().as_secs_f64()
        );
        Ok(summary)
    }

    fn contract(&self, name: ContractName, version: &ContractVersion) -> Result<crate::callers::BoundContract> {
        let binding = self
            .ctx
            .registry
            .resolve_by_name_version(name, version)
            .ok_or_else(|| IndexerError::NotFound(format!("{} {} is not registered", name, version)))?;
        Ok(self.ctx.view.bind(binding))
    }

    async fn sync_validators(&self, caller: &ValidatorServiceCaller, height: u64) -> Result<Vec<U256>> {
        let mut ids = Vec::new();
        let mut id = U256::from(1u64);
        loop {
            let validator = match caller.get_validator_with_info(id, height).await {
                Ok(validator) => validator,
                Err(e) if e.is_empty_response() => break,
                Err(e) => return Err(e),
            };
            self.ctx.store.save_validator(&validator).await?;
            ids.push(id);
            id += U256::from(1u64);
        }
        tracing::debug!("Validator enumeration ended after {} ids", ids.len());
        Ok(ids)
    }

    async fn sync_nodes(
        &self,
        caller: &NodesCaller,
        height: u64,
        time: DateTime<Utc>,
    ) -> Result<(usize, BTreeMap<U256, NodeAggregationInfo>)> {
        let mut info: BTreeMap<U256, NodeAggregationInfo> = BTreeMap::new();
        let mut id = U256::from(1u64);
        let mut count = 0usize;
        loop {
            let mut node: Node = match caller.get_node_with_info(id, height).await {
                Ok(node) => node,
                Err(e) if e.is_empty_response() => break,
                Err(e) => return Err(e),
            };
            node.event_time = time;
            self.ctx.store.save_node(&node).await?;

            let entry = info.entry(node.validator_id).or_default();
            if node.status.is_active() {
                entry.active_count += 1;
            }
            if node.status.is_linked() {
                entry.linked_count += 1;
            }
            count += 1;
            id += U256::from(1u64);
        }
        tracing::debug!("Node enumeration ended after {} ids", count);
        Ok((count, info))
    }

    /// Enumerate delegations from id 0 in batches shared by the worker pool.
    /// Returns the number persisted and the staked amount per validator.
    async fn sync_delegations(
        &self,
        caller: &DelegationCaller,
        height: u64,
    ) -> Result<(usize, HashMap<U256, U256>)> {
        let next_batch = AtomicU64::new(0);
        let exhausted = CancellationToken::new();

        let workers = (0..self.workers).map(|_| self.delegation_worker(caller, height, &next_batch, &exhausted));
        let results = futures::future::try_join_all(workers).await?;

        let mut count = 0;
        let mut stakes: HashMap<U256, U256> = HashMap::new();
        for (worker_count, worker_stakes) in results {
            count += worker_count;
            for (validator_id, amount) in worker_stakes {
                let total = stakes.entry(validator_id).or_insert(U256::ZERO);
                *total = total.saturating_add(amount);
            }
        }
        Ok((count, stakes))
    }

    async fn delegation_worker(
        &self,
        caller: &DelegationCaller,
        height: u64,
        next_batch: &AtomicU64,
        exhausted: &CancellationToken,
    ) -> Result<(usize, HashMap<U256, U256>)> {
        let mut count = 0;
        let mut stakes: HashMap<U256, U256> = HashMap::new();

        while !exhausted.is_cancelled() {
            let start = next_batch.fetch_add(1, Ordering::SeqCst).saturating_mul(self.batch_size);
            for id in start..start.saturating_add(self.batch_size) {
                let delegation = match self.read_delegation(caller, U256::from(id), height).await {
                    Ok(delegation) => delegation,
                    Err(e) if e.is_empty_response() => {
                        tracing::debug!("Delegation enumeration ended at id {}", id);
                        exhausted.cancel();
                        break;
                    }
                    Err(e) => return Err(e),
                };
                self.ctx.store.save_delegation(&delegation).await?;
                if delegation.state.is_staked() {
                    let total = stakes.entry(delegation.validator_id).or_insert(U256::ZERO);
                    *total = total.saturating_add(delegation.amount);
                }
                count += 1;
            }
        }
        Ok((count, stakes))
    }

    /// Delegation at `height`. A cached entry whose state is unchanged is
    /// reused without refetching its fields.
    async fn read_delegation(&self, caller: &DelegationCaller, id: U256, height: u64) -> Result<Delegation> {
        let cached = self
            .delegations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned();

        let state = caller.get_delegation_state(id, height).await?;
        let mut delegation = match cached {
            Some(delegation) if delegation.state == state => delegation,
            _ => {
                let mut fetched = caller.get_delegation(id, height).await?;
                fetched.state = state;
                self.delegations
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(id, fetched.clone());
                fetched
            }
        };
        delegation.block_height = height;
        Ok(delegation)
    }
}
