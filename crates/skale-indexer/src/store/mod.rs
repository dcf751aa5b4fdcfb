//! Persistence interface consumed by handlers, the scraper and the synchroniser.

mod postgres;

#[cfg(test)]
pub(crate) mod memory;

pub use postgres::PgStore;

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skale_common::{
    Account, AccountParams, CalculationParams, ContractEvent, ContractEventParams, Delegation,
    DelegationParams, DelegatorStatistic, DelegatorStatisticParams, DelegatorStatisticType, Node,
    NodeParams, Result, RewardClaim, SystemEvent, SystemEventParams, Validator, ValidatorParams,
    ValidatorSnapshot, ValidatorStatistic, ValidatorStatisticParams,
};

/// `indexer_state` key of the follow loop's checkpoint
pub const LAST_INDEXED_BLOCK: &str = "last_indexed_block";
/// `indexer_state` key of the month of the last epoch synchronisation
pub const LAST_SYNCED_EPOCH: &str = "last_synced_epoch";

#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert keyed on `(tx_hash, log_index)`
    async fn save_contract_event(&self, event: &ContractEvent) -> Result<()>;

    async fn save_validator(&self, validator: &Validator) -> Result<()>;

    async fn save_delegation(&self, delegation: &Delegation) -> Result<()>;

    async fn save_nodes(&self, nodes: &[Node]) -> Result<()>;

    async fn save_node(&self, node: &Node) -> Result<()> {
        self.save_nodes(std::slice::from_ref(node)).await
    }

    /// Insert or promote; an account type is never lowered.
    async fn save_account(&self, account: &Account) -> Result<()>;

    /// Change-only write: skipped when equal to the latest strictly older row.
    async fn save_validator_statistic(&self, statistic: &ValidatorStatistic) -> Result<()>;

    /// Record a payout (idempotent per log position) and rebuild the holder's
    /// `CLAIMED_REWARDS` rows from its height onwards.
    async fn record_reward_claim(&self, claim: &RewardClaim) -> Result<()>;

    async fn save_system_event(&self, event: &SystemEvent) -> Result<()>;

    /// Copy the latest statistics onto the validator's current snapshot.
    async fn update_counts_of_validator(&self, validator_id: U256) -> Result<()>;

    async fn calculate_total_stake(&self, params: &CalculationParams) -> Result<U256>;

    async fn calculate_active_nodes(&self, params: &CalculationParams) -> Result<U256>;

    async fn calculate_linked_nodes(&self, params: &CalculationParams) -> Result<U256>;

    /// All three statistics per validator plus the denormalised counters,
    /// committed together.
    async fn save_validator_snapshots(
        &self,
        snapshots: &[ValidatorSnapshot],
        block_height: u64,
        block_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_validators(&self, params: &ValidatorParams) -> Result<Vec<Validator>>;

    async fn get_delegations(&self, params: &DelegationParams) -> Result<Vec<Delegation>>;

    async fn get_nodes(&self, params: &NodeParams) -> Result<Vec<Node>>;

    async fn get_accounts(&self, params: &AccountParams) -> Result<Vec<Account>>;

    async fn get_contract_events(&self, params: &ContractEventParams) -> Result<Vec<ContractEvent>>;

    async fn get_validator_statistics(&self, params: &ValidatorStatisticParams) -> Result<Vec<ValidatorStatistic>>;

    async fn get_delegator_statistics(&self, params: &DelegatorStatisticParams) -> Result<Vec<DelegatorStatistic>>;

    async fn get_system_events(&self, params: &SystemEventParams) -> Result<Vec<SystemEvent>>;

    async fn get_state(&self, key: &str) -> Result<Option<String>>;

    async fn set_state(&self, key: &str, value: &str) -> Result<()>;
}

/// Running `CLAIMED_REWARDS` totals of one holder, one row per height where
/// the total changes. `claims` must be sorted by `(block_height, log_index)`.
pub(crate) fn claimed_reward_rows(claims: &[RewardClaim]) -> Vec<DelegatorStatistic> {
    let mut rows: Vec<DelegatorStatistic> = Vec::new();
    let mut total = U256::ZERO;
    for claim in claims {
        total = total.saturating_add(claim.amount);
        match rows.last_mut() {
            Some(last) if last.block_height == claim.block_height => last.amount = total,
            _ => rows.push(DelegatorStatistic {
                holder: claim.holder,
                block_height: claim.block_height,
                block_time: claim.block_time,
                statistic_type: DelegatorStatisticType::ClaimedRewards,
                amount: total,
            }),
        }
    }
    let mut previous = U256::ZERO;
    rows.retain(|row| {
        let changed = row.amount != previous;
        previous = row.amount;
        changed
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use skale_common::timestamp_to_datetime;

    fn claim(block_height: u64, log_index: u64, amount: u64) -> RewardClaim {
        RewardClaim {
            holder: Address::repeat_byte(0x0a),
            block_height,
            log_index,
            block_time: timestamp_to_datetime(block_height),
            amount: U256::from(amount),
        }
    }

    #[test]
    fn test_claimed_rows_are_running_totals_per_height() {
        let rows = claimed_reward_rows(&[claim(10, 0, 100), claim(10, 3, 20), claim(12, 0, 0), claim(20, 1, 50)]);
        let totals: Vec<(u64, U256)> = rows.iter().map(|r| (r.block_height, r.amount)).collect();
        assert_eq!(totals, vec![(10, U256::from(120u64)), (20, U256::from(170u64))]);
    }
}
