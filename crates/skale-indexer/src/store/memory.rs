//! In-memory `Store` for unit tests. Applies the same change-only and
//! monotonic-account rules as `PgStore` and records every write in order.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skale_common::{
    Account, AccountParams, AccountType, CalculationParams, ContractEvent, ContractEventParams,
    Delegation, DelegationParams, DelegatorStatistic, DelegatorStatisticParams,
    DelegatorStatisticType, IndexerError, Node, NodeParams, Result, RewardClaim, SystemEvent, SystemEventKind,
    SystemEventParams, Validator, ValidatorParams, ValidatorSnapshot, ValidatorStatistic,
    ValidatorStatisticParams, ValidatorStatisticType,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{claimed_reward_rows, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreOp {
    SaveContractEvent(String),
    SaveValidator(U256, u64),
    SaveDelegation(U256, u64),
    SaveNodes(Vec<U256>),
    SaveAccount(Address, AccountType),
    SaveValidatorStatistic(U256, ValidatorStatisticType),
    RecordRewardClaim(Address, u64),
    SaveSystemEvent(SystemEventKind),
    UpdateCounts(U256),
    CalculateTotalStake(U256),
    CalculateActiveNodes(U256),
    CalculateLinkedNodes(U256),
    SaveValidatorSnapshots(usize),
}

#[derive(Default)]
struct State {
    validators: BTreeMap<(U256, u64), Validator>,
    delegations: BTreeMap<(U256, u64), Delegation>,
    nodes: BTreeMap<(U256, u64), Node>,
    accounts: BTreeMap<Address, AccountType>,
    contract_events: BTreeMap<(B256, u64), ContractEvent>,
    next_event_id: i64,
    validator_statistics: BTreeMap<(U256, i16, u64), ValidatorStatistic>,
    delegator_statistics: BTreeMap<(Address, i16, u64), DelegatorStatistic>,
    reward_claims: BTreeMap<(Address, u64, u64), RewardClaim>,
    system_events: Vec<SystemEvent>,
    kv: HashMap<String, String>,
    ops: Vec<StoreOp>,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every later call of the named operation fail with a database error.
    pub(crate) fn fail_on(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    /// Make every later call of the named operation panic.
    pub(crate) fn panic_on(&self, operation: &'static str) {
        self.lock().panicking.insert(operation);
    }

    pub(crate) fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    pub(crate) fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Every stored validator statistic row, in key order
    pub(crate) fn validator_statistic_rows(&self) -> Vec<ValidatorStatistic> {
        self.lock().validator_statistics.values().cloned().collect()
    }

    pub(crate) fn validator_rows(&self) -> Vec<Validator> {
        self.lock().validators.values().cloned().collect()
    }

    fn begin(&self, operation: &'static str) -> Result<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.panicking.contains(operation) {
            drop(state);
            panic!("injected panic in {}", operation);
        }
        if state.failing.contains(operation) {
            return Err(IndexerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state)
    }
}

/// Latest snapshot per id, optionally strictly below `before`
fn current<K: Ord + Clone, V: Clone>(map: &BTreeMap<(K, u64), V>, before: Option<u64>) -> Vec<V> {
    let mut latest: BTreeMap<K, V> = BTreeMap::new();
    for ((id, height), value) in map {
        if before.map_or(true, |b| *height < b) {
            latest.insert(id.clone(), value.clone());
        }
    }
    latest.into_values().collect()
}

fn upsert_change_only<K: Ord + Clone, V>(
    map: &mut BTreeMap<(K, i16, u64), V>,
    key: (K, i16, u64),
    row: V,
    amount: fn(&V) -> U256,
) {
    let (id, code, height) = key.clone();
    let previous = map
        .range((id.clone(), code, 0)..(id, code, height))
        .next_back()
        .map(|(_, v)| amount(v));
    if previous == Some(amount(&row)) {
        map.remove(&key);
    } else {
        map.insert(key, row);
    }
}

fn in_range(height: u64, from: Option<u64>, to: Option<u64>) -> bool {
    from.map_or(true, |f| height >= f) && to.map_or(true, |t| height <= t)
}

impl State {
    fn save_statistic(&mut self, statistic: ValidatorStatistic) {
        let key = (
            statistic.validator_id,
            statistic.statistic_type.code(),
            statistic.block_height,
        );
        upsert_change_only(&mut self.validator_statistics, key, statistic, |s| s.amount);
    }

    fn set_counter(&mut self, validator_id: U256, statistic_type: ValidatorStatisticType, amount: U256) {
        let latest = self
            .validators
            .range((validator_id, 0)..=(validator_id, u64::MAX))
            .next_back()
            .map(|(key, _)| *key);
        if let Some(key) = latest {
            if let Some(validator) = self.validators.get_mut(&key) {
                match statistic_type {
                    ValidatorStatisticType::TotalStake => validator.staked = amount,
                    ValidatorStatisticType::ActiveNodes => validator.active_nodes = amount,
                    ValidatorStatisticType::LinkedNodes => validator.linked_nodes = amount,
                }
            }
        }
    }

    fn latest_statistic(&self, validator_id: U256, statistic_type: ValidatorStatisticType) -> U256 {
        let code = statistic_type.code();
        self.validator_statistics
            .range((validator_id, code, 0)..=(validator_id, code, u64::MAX))
            .next_back()
            .map(|(_, s)| s.amount)
            .unwrap_or_default()
    }

    fn recalculate(
        &mut self,
        params: &CalculationParams,
        statistic_type: ValidatorStatisticType,
        amount: U256,
    ) -> U256 {
        self.save_statistic(ValidatorStatistic {
            validator_id: params.validator_id,
            block_height: params.block_height,
            block_time: params.block_time,
            statistic_type,
            amount,
        });
        let latest = self.latest_statistic(params.validator_id, statistic_type);
        self.set_counter(params.validator_id, statistic_type, latest);
        amount
    }

    fn count_nodes(&self, params: &CalculationParams, predicate: fn(&Node) -> bool) -> U256 {
        let count = current(&self.nodes, params.block_height.checked_add(1))
            .into_iter()
            .filter(|n| n.validator_id == params.validator_id && predicate(n))
            .count();
        U256::from(count)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_contract_event(&self, event: &ContractEvent) -> Result<()> {
        let mut state = self.begin("save_contract_event")?;
        let key = (event.tx_hash, event.log_index);
        let existing = state.contract_events.get(&key).and_then(|e| e.id);
        let id = match existing {
            Some(id) => id,
            None => {
                state.next_event_id += 1;
                state.next_event_id
            }
        };
        let mut event = event.clone();
        event.id = Some(id);
        state.ops.push(StoreOp::SaveContractEvent(event.event_name.clone()));
        state.contract_events.insert(key, event);
        Ok(())
    }

    async fn save_validator(&self, validator: &Validator) -> Result<()> {
        let mut state = self.begin("save_validator")?;
        state
            .ops
            .push(StoreOp::SaveValidator(validator.validator_id, validator.block_height));
        state
            .validators
            .insert((validator.validator_id, validator.block_height), validator.clone());
        Ok(())
    }

    async fn save_delegation(&self, delegation: &Delegation) -> Result<()> {
        let mut state = self.begin("save_delegation")?;
        state
            .ops
            .push(StoreOp::SaveDelegation(delegation.delegation_id, delegation.block_height));
        state
            .delegations
            .insert((delegation.delegation_id, delegation.block_height), delegation.clone());
        Ok(())
    }

    async fn save_nodes(&self, nodes: &[Node]) -> Result<()> {
        let mut state = self.begin("save_nodes")?;
        state
            .ops
            .push(StoreOp::SaveNodes(nodes.iter().map(|n| n.node_id).collect()));
        for node in nodes {
            state.nodes.insert((node.node_id, node.block_height), node.clone());
        }
        Ok(())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut state = self.begin("save_account")?;
        state
            .ops
            .push(StoreOp::SaveAccount(account.address, account.account_type));
        let entry = state
            .accounts
            .entry(account.address)
            .or_insert(account.account_type);
        if account.account_type > *entry {
            *entry = account.account_type;
        }
        Ok(())
    }

    async fn save_validator_statistic(&self, statistic: &ValidatorStatistic) -> Result<()> {
        let mut state = self.begin("save_validator_statistic")?;
        state.ops.push(StoreOp::SaveValidatorStatistic(
            statistic.validator_id,
            statistic.statistic_type,
        ));
        state.save_statistic(statistic.clone());
        Ok(())
    }

    async fn record_reward_claim(&self, claim: &RewardClaim) -> Result<()> {
        let mut state = self.begin("record_reward_claim")?;
        state
            .ops
            .push(StoreOp::RecordRewardClaim(claim.holder, claim.block_height));
        state
            .reward_claims
            .insert((claim.holder, claim.block_height, claim.log_index), claim.clone());

        let claims: Vec<RewardClaim> = state
            .reward_claims
            .range((claim.holder, 0, 0)..=(claim.holder, u64::MAX, u64::MAX))
            .map(|(_, c)| c.clone())
            .collect();
        let code = DelegatorStatisticType::ClaimedRewards.code();
        state
            .delegator_statistics
            .retain(|(holder, c, height), _| !(*holder == claim.holder && *c == code && *height >= claim.block_height));
        for row in claimed_reward_rows(&claims) {
            if row.block_height >= claim.block_height {
                state
                    .delegator_statistics
                    .insert((row.holder, code, row.block_height), row);
            }
        }
        Ok(())
    }

    async fn save_system_event(&self, event: &SystemEvent) -> Result<()> {
        let mut state = self.begin("save_system_event")?;
        state.ops.push(StoreOp::SaveSystemEvent(event.kind));
        let existing = state.system_events.iter_mut().find(|e| {
            e.height == event.height
                && e.kind == event.kind
                && e.sender == event.sender
                && e.sender_id == event.sender_id
                && e.recipient == event.recipient
                && e.recipient_id == event.recipient_id
        });
        match existing {
            Some(existing) => {
                existing.before = event.before;
                existing.after = event.after;
                existing.change = event.change.clone();
            }
            None => state.system_events.push(event.clone()),
        }
        Ok(())
    }

    async fn update_counts_of_validator(&self, validator_id: U256) -> Result<()> {
        let mut state = self.begin("update_counts_of_validator")?;
        state.ops.push(StoreOp::UpdateCounts(validator_id));
        for statistic_type in [
            ValidatorStatisticType::TotalStake,
            ValidatorStatisticType::ActiveNodes,
            ValidatorStatisticType::LinkedNodes,
        ] {
            let amount = state.latest_statistic(validator_id, statistic_type);
            state.set_counter(validator_id, statistic_type, amount);
        }
        Ok(())
    }

    async fn calculate_total_stake(&self, params: &CalculationParams) -> Result<U256> {
        let mut state = self.begin("calculate_total_stake")?;
        state.ops.push(StoreOp::CalculateTotalStake(params.validator_id));
        let total = current(&state.delegations, params.block_height.checked_add(1))
            .into_iter()
            .filter(|d| d.validator_id == params.validator_id && d.state.is_staked())
            .fold(U256::ZERO, |acc, d| acc.saturating_add(d.amount));
        Ok(state.recalculate(params, ValidatorStatisticType::TotalStake, total))
    }

    async fn calculate_active_nodes(&self, params: &CalculationParams) -> Result<U256> {
        let mut state = self.begin("calculate_active_nodes")?;
        state.ops.push(StoreOp::CalculateActiveNodes(params.validator_id));
        let count = state.count_nodes(params, |n| n.status.is_active());
        Ok(state.recalculate(params, ValidatorStatisticType::ActiveNodes, count))
    }

    async fn calculate_linked_nodes(&self, params: &CalculationParams) -> Result<U256> {
        let mut state = self.begin("calculate_linked_nodes")?;
        state.ops.push(StoreOp::CalculateLinkedNodes(params.validator_id));
        let count = state.count_nodes(params, |n| n.status.is_linked());
        Ok(state.recalculate(params, ValidatorStatisticType::LinkedNodes, count))
    }

    async fn save_validator_snapshots(
        &self,
        snapshots: &[ValidatorSnapshot],
        block_height: u64,
        block_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.begin("save_validator_snapshots")?;
        state.ops.push(StoreOp::SaveValidatorSnapshots(snapshots.len()));
        for snapshot in snapshots {
            let params = CalculationParams {
                validator_id: snapshot.validator_id,
                block_height,
                block_time,
            };
            state.recalculate(&params, ValidatorStatisticType::ActiveNodes, snapshot.active_nodes);
            state.recalculate(&params, ValidatorStatisticType::LinkedNodes, snapshot.linked_nodes);
            state.recalculate(&params, ValidatorStatisticType::TotalStake, snapshot.total_stake);
        }
        Ok(())
    }

    async fn get_validators(&self, params: &ValidatorParams) -> Result<Vec<Validator>> {
        let state = self.begin("get_validators")?;
        Ok(current(&state.validators, params.before_height)
            .into_iter()
            .filter(|v| params.validator_id.map_or(true, |id| v.validator_id == id))
            .filter(|v| params.validator_address.map_or(true, |a| v.validator_address == a))
            .collect())
    }

    async fn get_delegations(&self, params: &DelegationParams) -> Result<Vec<Delegation>> {
        let state = self.begin("get_delegations")?;
        Ok(current(&state.delegations, params.before_height)
            .into_iter()
            .filter(|d| params.delegation_id.map_or(true, |id| d.delegation_id == id))
            .filter(|d| params.validator_id.map_or(true, |id| d.validator_id == id))
            .filter(|d| params.holder.map_or(true, |h| d.holder == h))
            .filter(|d| params.states.is_empty() || params.states.contains(&d.state))
            .collect())
    }

    async fn get_nodes(&self, params: &NodeParams) -> Result<Vec<Node>> {
        let state = self.begin("get_nodes")?;
        Ok(current(&state.nodes, params.before_height)
            .into_iter()
            .filter(|n| params.node_id.map_or(true, |id| n.node_id == id))
            .filter(|n| params.validator_id.map_or(true, |id| n.validator_id == id))
            .filter(|n| params.status.map_or(true, |s| n.status == s))
            .collect())
    }

    async fn get_accounts(&self, params: &AccountParams) -> Result<Vec<Account>> {
        let state = self.begin("get_accounts")?;
        Ok(state
            .accounts
            .iter()
            .filter(|(address, _)| params.address.map_or(true, |a| **address == a))
            .filter(|(_, t)| params.account_type.map_or(true, |wanted| **t == wanted))
            .map(|(address, t)| Account::new(*address, *t))
            .collect())
    }

    async fn get_contract_events(&self, params: &ContractEventParams) -> Result<Vec<ContractEvent>> {
        let state = self.begin("get_contract_events")?;
        let mut events: Vec<ContractEvent> = state
            .contract_events
            .values()
            .filter(|e| params.contract_address.map_or(true, |a| e.contract_address == a))
            .filter(|e| params.event_name.as_ref().map_or(true, |n| &e.event_name == n))
            .filter(|e| params.bound_type.map_or(true, |t| e.bound_type == Some(t)))
            .filter(|e| params.bound_id.map_or(true, |id| e.bound_ids.contains(&id)))
            .filter(|e| params.bound_address.map_or(true, |a| e.bound_addresses.contains(&a)))
            .filter(|e| in_range(e.block_height, params.from_height, params.to_height))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_height, e.log_index));
        Ok(events)
    }

    async fn get_validator_statistics(&self, params: &ValidatorStatisticParams) -> Result<Vec<ValidatorStatistic>> {
        let state = self.begin("get_validator_statistics")?;
        let mut rows: Vec<ValidatorStatistic> = state
            .validator_statistics
            .values()
            .filter(|s| params.validator_id.map_or(true, |id| s.validator_id == id))
            .filter(|s| params.statistic_type.map_or(true, |t| s.statistic_type == t))
            .filter(|s| in_range(s.block_height, params.from_height, params.to_height))
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.block_height);
        Ok(rows)
    }

    async fn get_delegator_statistics(&self, params: &DelegatorStatisticParams) -> Result<Vec<DelegatorStatistic>> {
        let state = self.begin("get_delegator_statistics")?;
        let mut rows: Vec<DelegatorStatistic> = state
            .delegator_statistics
            .values()
            .filter(|s| params.holder.map_or(true, |h| s.holder == h))
            .filter(|s| params.statistic_type.map_or(true, |t| s.statistic_type == t))
            .filter(|s| in_range(s.block_height, params.from_height, params.to_height))
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.block_height);
        Ok(rows)
    }

    async fn get_system_events(&self, params: &SystemEventParams) -> Result<Vec<SystemEvent>> {
        let state = self.begin("get_system_events")?;
        let mut events: Vec<SystemEvent> = state
            .system_events
            .iter()
            .filter(|e| params.kind.map_or(true, |k| e.kind == k))
            .filter(|e| params.sender_id.map_or(true, |id| e.sender_id == id))
            .filter(|e| params.recipient_id.map_or(true, |id| e.recipient_id == id))
            .filter(|e| params.address.map_or(true, |a| e.sender == a || e.recipient == a))
            .filter(|e| in_range(e.height, params.from_height, params.to_height))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.height);
        Ok(events)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let state = self.begin("get_state")?;
        Ok(state.kv.get(key).cloned())
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.begin("set_state")?;
        state.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skale_common::timestamp_to_datetime;

    fn statistic(height: u64, amount: u64) -> ValidatorStatistic {
        ValidatorStatistic {
            validator_id: U256::from(1u64),
            block_height: height,
            block_time: timestamp_to_datetime(height),
            statistic_type: ValidatorStatisticType::TotalStake,
            amount: U256::from(amount),
        }
    }

    #[tokio::test]
    async fn test_statistics_change_only() {
        let store = MemoryStore::new();
        for height in [10, 11, 12] {
            store.save_validator_statistic(&statistic(height, 100)).await.unwrap();
        }
        store.save_validator_statistic(&statistic(13, 150)).await.unwrap();
        let heights: Vec<u64> = store
            .validator_statistic_rows()
            .iter()
            .map(|s| s.block_height)
            .collect();
        assert_eq!(heights, vec![10, 13]);
    }

    fn validator(height: u64) -> Validator {
        Validator {
            validator_id: U256::from(1u64),
            name: "v".into(),
            validator_address: Address::repeat_byte(1),
            requested_address: Address::ZERO,
            description: String::new(),
            fee_rate: U256::ZERO,
            registration_time: timestamp_to_datetime(0),
            minimum_delegation_amount: U256::ZERO,
            accept_new_requests: true,
            authorized: true,
            active_nodes: U256::ZERO,
            linked_nodes: U256::ZERO,
            staked: U256::ZERO,
            block_height: height,
        }
    }

    fn delegation(state: skale_common::DelegationState, height: u64) -> Delegation {
        Delegation {
            delegation_id: U256::from(5u64),
            holder: Address::repeat_byte(0xaa),
            validator_id: U256::from(1u64),
            amount: U256::from(100u64),
            delegation_period: U256::from(3u64),
            created: timestamp_to_datetime(0),
            started: U256::ZERO,
            finished: U256::ZERO,
            info: String::new(),
            state,
            block_height: height,
            transaction_hash: B256::ZERO,
        }
    }

    fn params(height: u64) -> CalculationParams {
        CalculationParams {
            validator_id: U256::from(1u64),
            block_height: height,
            block_time: timestamp_to_datetime(height),
        }
    }

    #[tokio::test]
    async fn test_counter_tracks_latest_height_not_latest_write() {
        use skale_common::DelegationState;

        let store = MemoryStore::new();
        store.save_validator(&validator(1)).await.unwrap();
        store.save_delegation(&delegation(DelegationState::Proposed, 100)).await.unwrap();
        store.save_delegation(&delegation(DelegationState::Delegated, 200)).await.unwrap();

        // block 200 is recalculated before block 100
        assert_eq!(store.calculate_total_stake(&params(200)).await.unwrap(), U256::from(100u64));
        assert_eq!(store.calculate_total_stake(&params(100)).await.unwrap(), U256::ZERO);

        let current = &store.get_validators(&ValidatorParams::default()).await.unwrap()[0];
        assert_eq!(current.staked, U256::from(100u64));
    }

    #[tokio::test]
    async fn test_older_snapshot_keeps_newer_counters() {
        let store = MemoryStore::new();
        store.save_validator(&validator(1)).await.unwrap();
        let snapshot = |stake: u64| ValidatorSnapshot {
            validator_id: U256::from(1u64),
            active_nodes: U256::from(2u64),
            linked_nodes: U256::from(2u64),
            total_stake: U256::from(stake),
        };

        store
            .save_validator_snapshots(&[snapshot(700)], 300, timestamp_to_datetime(300))
            .await
            .unwrap();
        store
            .save_validator_snapshots(&[snapshot(400)], 100, timestamp_to_datetime(100))
            .await
            .unwrap();

        let current = &store.get_validators(&ValidatorParams::default()).await.unwrap()[0];
        assert_eq!(current.staked, U256::from(700u64));
    }

    #[tokio::test]
    async fn test_account_type_is_monotonic() {
        let store = MemoryStore::new();
        let address = Address::repeat_byte(9);
        for account_type in [
            AccountType::Delegator,
            AccountType::Validator,
            AccountType::Default,
            AccountType::Delegator,
        ] {
            store.save_account(&Account::new(address, account_type)).await.unwrap();
        }
        let accounts = store.get_accounts(&AccountParams::default()).await.unwrap();
        assert_eq!(accounts, vec![Account::new(address, AccountType::Validator)]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_on("save_account");
        let err = store
            .save_account(&Account::new(Address::ZERO, AccountType::Default))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
