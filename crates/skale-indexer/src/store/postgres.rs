use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use skale_common::convert::{
    address_to_decimal, decimal_to_address, decimal_to_u256, u256_to_decimal,
};
use skale_common::{
    Account, AccountParams, AccountType, BoundType, CalculationParams, ContractEvent,
    ContractEventParams, ContractName, Delegation, DelegationParams, DelegationState,
    DelegatorStatistic, DelegatorStatisticParams, DelegatorStatisticType, IndexerError, Node,
    NodeParams, NodeStatus, Result, RewardClaim, SystemEvent, SystemEventKind, SystemEventParams, Validator,
    ValidatorParams, ValidatorSnapshot, ValidatorStatistic, ValidatorStatisticParams,
    ValidatorStatisticType,
};
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Transaction};
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::{claimed_reward_rows, Store};

/// Insert a statistic row unless the latest strictly older row for the same
/// `(id, type)` already carries the amount. A same-height row made redundant
/// by such an older row is removed.
const UPSERT_VALIDATOR_STATISTIC: &str = "
    WITH prev AS (
        SELECT amount FROM validator_statistics
        WHERE validator_id = $1 AND statistic_type = $4 AND block_height < $2
        ORDER BY block_height DESC
        LIMIT 1
    ), redundant AS (
        DELETE FROM validator_statistics
        WHERE validator_id = $1 AND statistic_type = $4 AND block_height = $2
          AND EXISTS (SELECT 1 FROM prev WHERE amount = $5)
    )
    INSERT INTO validator_statistics (validator_id, block_height, block_time, statistic_type, amount)
    SELECT $1::NUMERIC, $2::BIGINT, $3::TIMESTAMPTZ, $4::SMALLINT, $5::NUMERIC
    WHERE NOT EXISTS (SELECT 1 FROM prev WHERE amount = $5)
    ON CONFLICT (validator_id, block_height, statistic_type)
    DO UPDATE SET amount = EXCLUDED.amount, block_time = EXCLUDED.block_time";

const LATEST_VALIDATOR_ROW: &str =
    "validator_id = $1 AND block_height = (SELECT MAX(block_height) FROM validators WHERE validator_id = $1)";

/// `Store` over a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn recalculate(
        &self,
        params: &CalculationParams,
        statistic_type: ValidatorStatisticType,
        compute: &str,
    ) -> Result<U256> {
        let mut tx = self.begin_serializable().await?;

        let (amount,): (BigDecimal,) = sqlx::query_as(compute)
            .bind(u256_to_decimal(params.validator_id))
            .bind(height(params.block_height))
            .fetch_one(&mut *tx)
            .await?;
        let amount = decimal_to_u256(&amount)?;

        upsert_validator_statistic(
            &mut *tx,
            &ValidatorStatistic {
                validator_id: params.validator_id,
                block_height: params.block_height,
                block_time: params.block_time,
                statistic_type,
                amount,
            },
        )
        .await?;
        set_counter(&mut *tx, params.validator_id, statistic_type).await?;

        tx.commit().await?;
        Ok(amount)
    }
}

fn height(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn counter_column(statistic_type: ValidatorStatisticType) -> &'static str {
    match statistic_type {
        ValidatorStatisticType::TotalStake => "staked",
        ValidatorStatisticType::ActiveNodes => "active_nodes",
        ValidatorStatisticType::LinkedNodes => "linked_nodes",
    }
}

async fn upsert_validator_statistic<'e, E: PgExecutor<'e>>(
    executor: E,
    statistic: &ValidatorStatistic,
) -> Result<()> {
    sqlx::query(UPSERT_VALIDATOR_STATISTIC)
        .bind(u256_to_decimal(statistic.validator_id))
        .bind(height(statistic.block_height))
        .bind(statistic.block_time)
        .bind(statistic.statistic_type.code())
        .bind(u256_to_decimal(statistic.amount))
        .execute(executor)
        .await?;
    Ok(())
}

/// Point the denormalised counter at the latest statistic row, which may
/// belong to a later block than the one just recalculated.
async fn set_counter<'e, E: PgExecutor<'e>>(
    executor: E,
    validator_id: U256,
    statistic_type: ValidatorStatisticType,
) -> Result<()> {
    let sql = format!(
        "UPDATE validators SET {} = COALESCE((SELECT amount FROM validator_statistics
                                              WHERE validator_id = $1 AND statistic_type = $2
                                              ORDER BY block_height DESC LIMIT 1), 0)
         WHERE {}",
        counter_column(statistic_type),
        LATEST_VALIDATOR_ROW
    );
    sqlx::query(&sql)
        .bind(u256_to_decimal(validator_id))
        .bind(statistic_type.code())
        .execute(executor)
        .await?;
    Ok(())
}

// =====================
// Row mappings
// =====================

#[derive(FromRow)]
struct ValidatorRow {
    validator_id: BigDecimal,
    block_height: i64,
    name: String,
    validator_address: BigDecimal,
    requested_address: BigDecimal,
    description: String,
    fee_rate: BigDecimal,
    registration_time: DateTime<Utc>,
    minimum_delegation_amount: BigDecimal,
    accept_new_requests: bool,
    authorized: bool,
    active_nodes: BigDecimal,
    linked_nodes: BigDecimal,
    staked: BigDecimal,
}

impl TryFrom<ValidatorRow> for Validator {
    type Error = IndexerError;

    fn try_from(row: ValidatorRow) -> Result<Self> {
        Ok(Validator {
            validator_id: decimal_to_u256(&row.validator_id)?,
            name: row.name,
            validator_address: decimal_to_address(&row.validator_address)?,
            requested_address: decimal_to_address(&row.requested_address)?,
            description: row.description,
            fee_rate: decimal_to_u256(&row.fee_rate)?,
            registration_time: row.registration_time,
            minimum_delegation_amount: decimal_to_u256(&row.minimum_delegation_amount)?,
            accept_new_requests: row.accept_new_requests,
            authorized: row.authorized,
            active_nodes: decimal_to_u256(&row.active_nodes)?,
            linked_nodes: decimal_to_u256(&row.linked_nodes)?,
            staked: decimal_to_u256(&row.staked)?,
            block_height: row.block_height as u64,
        })
    }
}

#[derive(FromRow)]
struct DelegationRow {
    delegation_id: BigDecimal,
    block_height: i64,
    holder: BigDecimal,
    validator_id: BigDecimal,
    amount: BigDecimal,
    delegation_period: BigDecimal,
    created: DateTime<Utc>,
    started: BigDecimal,
    finished: BigDecimal,
    info: String,
    state: i16,
    transaction_hash: String,
}

impl TryFrom<DelegationRow> for Delegation {
    type Error = IndexerError;

    fn try_from(row: DelegationRow) -> Result<Self> {
        let state = if row.state < 0 {
            DelegationState::Unknown
        } else {
            DelegationState::from_code(row.state as u64)
        };
        Ok(Delegation {
            delegation_id: decimal_to_u256(&row.delegation_id)?,
            holder: decimal_to_address(&row.holder)?,
            validator_id: decimal_to_u256(&row.validator_id)?,
            amount: decimal_to_u256(&row.amount)?,
            delegation_period: decimal_to_u256(&row.delegation_period)?,
            created: row.created,
            started: decimal_to_u256(&row.started)?,
            finished: decimal_to_u256(&row.finished)?,
            info: row.info,
            state,
            block_height: row.block_height as u64,
            transaction_hash: parse_hash(&row.transaction_hash)?,
        })
    }
}

#[derive(FromRow)]
struct NodeRow {
    node_id: BigDecimal,
    block_height: i64,
    name: String,
    ip: String,
    public_ip: String,
    port: i32,
    start_block: BigDecimal,
    next_reward_date: DateTime<Utc>,
    last_reward_date: DateTime<Utc>,
    finish_time: DateTime<Utc>,
    status: i16,
    validator_id: BigDecimal,
    event_time: DateTime<Utc>,
}

impl TryFrom<NodeRow> for Node {
    type Error = IndexerError;

    fn try_from(row: NodeRow) -> Result<Self> {
        Ok(Node {
            node_id: decimal_to_u256(&row.node_id)?,
            name: row.name,
            ip: parse_ip(&row.ip)?,
            public_ip: parse_ip(&row.public_ip)?,
            port: u16::try_from(row.port)
                .map_err(|_| IndexerError::Decode(format!("stored port {} out of range", row.port)))?,
            start_block: decimal_to_u256(&row.start_block)?,
            next_reward_date: row.next_reward_date,
            last_reward_date: row.last_reward_date,
            finish_time: row.finish_time,
            status: NodeStatus::from_code(row.status.max(0) as u64)?,
            validator_id: decimal_to_u256(&row.validator_id)?,
            event_time: row.event_time,
            block_height: row.block_height as u64,
        })
    }
}

#[derive(FromRow)]
struct ContractEventRow {
    id: i64,
    contract_name: String,
    event_name: String,
    contract_address: BigDecimal,
    block_height: i64,
    log_index: i64,
    time: DateTime<Utc>,
    tx_hash: String,
    params: serde_json::Value,
    removed: bool,
    bound_type: Option<String>,
    bound_ids: Vec<BigDecimal>,
    bound_addresses: Vec<BigDecimal>,
    flagged: bool,
}

impl TryFrom<ContractEventRow> for ContractEvent {
    type Error = IndexerError;

    fn try_from(row: ContractEventRow) -> Result<Self> {
        Ok(ContractEvent {
            id: Some(row.id),
            contract_name: ContractName::from_str(&row.contract_name)?,
            event_name: row.event_name,
            contract_address: decimal_to_address(&row.contract_address)?,
            block_height: row.block_height as u64,
            log_index: row.log_index as u64,
            time: row.time,
            tx_hash: parse_hash(&row.tx_hash)?,
            params: row.params,
            removed: row.removed,
            bound_type: row.bound_type.as_deref().and_then(BoundType::parse),
            bound_ids: row
                .bound_ids
                .iter()
                .map(decimal_to_u256)
                .collect::<Result<_>>()?,
            bound_addresses: row
                .bound_addresses
                .iter()
                .map(decimal_to_address)
                .collect::<Result<_>>()?,
            flagged: row.flagged,
        })
    }
}

#[derive(FromRow)]
struct StatisticRow {
    subject: BigDecimal,
    block_height: i64,
    block_time: DateTime<Utc>,
    statistic_type: i16,
    amount: BigDecimal,
}

#[derive(FromRow)]
struct SystemEventRow {
    height: i64,
    time: DateTime<Utc>,
    kind: String,
    sender_id: BigDecimal,
    recipient_id: BigDecimal,
    sender: BigDecimal,
    recipient: BigDecimal,
    before: BigDecimal,
    after: BigDecimal,
    change: BigDecimal,
}

impl TryFrom<SystemEventRow> for SystemEvent {
    type Error = IndexerError;

    fn try_from(row: SystemEventRow) -> Result<Self> {
        Ok(SystemEvent {
            height: row.height as u64,
            time: row.time,
            kind: SystemEventKind::parse(&row.kind)
                .ok_or_else(|| IndexerError::Decode(format!("unknown system event kind {}", row.kind)))?,
            sender_id: decimal_to_u256(&row.sender_id)?,
            recipient_id: decimal_to_u256(&row.recipient_id)?,
            sender: decimal_to_address(&row.sender)?,
            recipient: decimal_to_address(&row.recipient)?,
            before: decimal_to_u256(&row.before)?,
            after: decimal_to_u256(&row.after)?,
            change: row.change,
        })
    }
}

fn parse_hash(value: &str) -> Result<B256> {
    B256::from_str(value).map_err(|e| IndexerError::Decode(format!("invalid hash {}: {}", value, e)))
}

fn parse_ip(value: &str) -> Result<Ipv4Addr> {
    value
        .parse()
        .map_err(|e| IndexerError::Decode(format!("invalid ip {}: {}", value, e)))
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = IndexerError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn save_contract_event(&self, event: &ContractEvent) -> Result<()> {
        let bound_ids: Vec<BigDecimal> = event.bound_ids.iter().copied().map(u256_to_decimal).collect();
        let bound_addresses: Vec<BigDecimal> = event
            .bound_addresses
            .iter()
            .copied()
            .map(address_to_decimal)
            .collect();

        sqlx::query(
            "INSERT INTO contract_events (contract_name, event_name, contract_address, block_height, log_index,
                                          time, tx_hash, params, removed, bound_type, bound_ids, bound_addresses, flagged)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (tx_hash, log_index) DO UPDATE SET
                contract_name = EXCLUDED.contract_name,
                event_name = EXCLUDED.event_name,
                contract_address = EXCLUDED.contract_address,
                block_height = EXCLUDED.block_height,
                time = EXCLUDED.time,
                params = EXCLUDED.params,
                removed = EXCLUDED.removed,
                bound_type = EXCLUDED.bound_type,
                bound_ids = EXCLUDED.bound_ids,
                bound_addresses = EXCLUDED.bound_addresses,
                flagged = EXCLUDED.flagged"
        )
        .bind(event.contract_name.as_str())
        .bind(&event.event_name)
        .bind(address_to_decimal(event.contract_address))
        .bind(height(event.block_height))
        .bind(height(event.log_index))
        .bind(event.time)
        .bind(format!("{:?}", event.tx_hash))
        .bind(&event.params)
        .bind(event.removed)
        .bind(event.bound_type.map(|t| t.as_str()))
        .bind(bound_ids)
        .bind(bound_addresses)
        .bind(event.flagged)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_validator(&self, validator: &Validator) -> Result<()> {
        sqlx::query(
            "INSERT INTO validators (validator_id, block_height, name, validator_address, requested_address,
                                     description, fee_rate, registration_time, minimum_delegation_amount,
                                     accept_new_requests, authorized, active_nodes, linked_nodes, staked)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (validator_id, block_height) DO UPDATE SET
                name = EXCLUDED.name,
                validator_address = EXCLUDED.validator_address,
                requested_address = EXCLUDED.requested_address,
                description = EXCLUDED.description,
                fee_rate = EXCLUDED.fee_rate,
                registration_time = EXCLUDED.registration_time,
                minimum_delegation_amount = EXCLUDED.minimum_delegation_amount,
                accept_new_requests = EXCLUDED.accept_new_requests,
                authorized = EXCLUDED.authorized"
        )
        .bind(u256_to_decimal(validator.validator_id))
        .bind(height(validator.block_height))
        .bind(&validator.name)
        .bind(address_to_decimal(validator.validator_address))
        .bind(address_to_decimal(validator.requested_address))
        .bind(&validator.description)
        .bind(u256_to_decimal(validator.fee_rate))
        .bind(validator.registration_time)
        .bind(u256_to_decimal(validator.minimum_delegation_amount))
        .bind(validator.accept_new_requests)
        .bind(validator.authorized)
        .bind(u256_to_decimal(validator.active_nodes))
        .bind(u256_to_decimal(validator.linked_nodes))
        .bind(u256_to_decimal(validator.staked))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_delegation(&self, delegation: &Delegation) -> Result<()> {
        sqlx::query(
            "INSERT INTO delegations (delegation_id, block_height, holder, validator_id, amount, delegation_period,
                                      created, started, finished, info, state, transaction_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (delegation_id, block_height) DO UPDATE SET
                holder = EXCLUDED.holder,
                validator_id = EXCLUDED.validator_id,
                amount = EXCLUDED.amount,
                delegation_period = EXCLUDED.delegation_period,
                created = EXCLUDED.created,
                started = EXCLUDED.started,
                finished = EXCLUDED.finished,
                info = EXCLUDED.info,
                state = EXCLUDED.state,
                transaction_hash = EXCLUDED.transaction_hash"
        )
        .bind(u256_to_decimal(delegation.delegation_id))
        .bind(height(delegation.block_height))
        .bind(address_to_decimal(delegation.holder))
        .bind(u256_to_decimal(delegation.validator_id))
        .bind(u256_to_decimal(delegation.amount))
        .bind(u256_to_decimal(delegation.delegation_period))
        .bind(delegation.created)
        .bind(u256_to_decimal(delegation.started))
        .bind(u256_to_decimal(delegation.finished))
        .bind(&delegation.info)
        .bind(delegation.state.code())
        .bind(format!("{:?}", delegation.transaction_hash))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_nodes(&self, nodes: &[Node]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            sqlx::query(
                "INSERT INTO nodes (node_id, block_height, name, ip, public_ip, port, start_block, next_reward_date,
                                    last_reward_date, finish_time, status, validator_id, event_time)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (node_id, block_height) DO UPDATE SET
                    name = EXCLUDED.name,
                    ip = EXCLUDED.ip,
                    public_ip = EXCLUDED.public_ip,
                    port = EXCLUDED.port,
                    start_block = EXCLUDED.start_block,
                    next_reward_date = EXCLUDED.next_reward_date,
                    last_reward_date = EXCLUDED.last_reward_date,
                    finish_time = EXCLUDED.finish_time,
                    status = EXCLUDED.status,
                    validator_id = EXCLUDED.validator_id,
                    event_time = EXCLUDED.event_time"
            )
            .bind(u256_to_decimal(node.node_id))
            .bind(height(node.block_height))
            .bind(&node.name)
            .bind(node.ip.to_string())
            .bind(node.public_ip.to_string())
            .bind(i32::from(node.port))
            .bind(u256_to_decimal(node.start_block))
            .bind(node.next_reward_date)
            .bind(node.last_reward_date)
            .bind(node.finish_time)
            .bind(node.status.code())
            .bind(u256_to_decimal(node.validator_id))
            .bind(node.event_time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (address, account_type) VALUES ($1, $2)
             ON CONFLICT (address) DO UPDATE SET account_type = EXCLUDED.account_type, updated_at = NOW()
             WHERE accounts.account_type < EXCLUDED.account_type"
        )
        .bind(address_to_decimal(account.address))
        .bind(account.account_type.rank())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_validator_statistic(&self, statistic: &ValidatorStatistic) -> Result<()> {
        upsert_validator_statistic(&self.pool, statistic).await
    }

    async fn record_reward_claim(&self, claim: &RewardClaim) -> Result<()> {
        let holder = address_to_decimal(claim.holder);
        let mut tx = self.pool.begin().await?;
        // one writer per holder, so concurrent claims rebuild from the full ledger
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT, 0))")
            .bind(&holder)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO reward_claims (holder, block_height, log_index, block_time, amount)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (holder, block_height, log_index)
             DO UPDATE SET amount = EXCLUDED.amount, block_time = EXCLUDED.block_time",
        )
        .bind(&holder)
        .bind(height(claim.block_height))
        .bind(height(claim.log_index))
        .bind(claim.block_time)
        .bind(u256_to_decimal(claim.amount))
        .execute(&mut *tx)
        .await?;

        let rows: Vec<(i64, i64, DateTime<Utc>, BigDecimal)> = sqlx::query_as(
            "SELECT block_height, log_index, block_time, amount FROM reward_claims
             WHERE holder = $1 ORDER BY block_height, log_index",
        )
        .bind(&holder)
        .fetch_all(&mut *tx)
        .await?;
        let claims = rows
            .into_iter()
            .map(|(block_height, log_index, block_time, amount)| {
                Ok(RewardClaim {
                    holder: claim.holder,
                    block_height: block_height as u64,
                    log_index: log_index as u64,
                    block_time,
                    amount: decimal_to_u256(&amount)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let code = DelegatorStatisticType::ClaimedRewards.code();
        sqlx::query(
            "DELETE FROM delegator_statistics
             WHERE holder = $1 AND statistic_type = $2 AND block_height >= $3",
        )
        .bind(&holder)
        .bind(code)
        .bind(height(claim.block_height))
        .execute(&mut *tx)
        .await?;
        for row in claimed_reward_rows(&claims)
            .into_iter()
            .filter(|row| row.block_height >= claim.block_height)
        {
            sqlx::query(
                "INSERT INTO delegator_statistics (holder, block_height, block_time, statistic_type, amount)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&holder)
            .bind(height(row.block_height))
            .bind(row.block_time)
            .bind(code)
            .bind(u256_to_decimal(row.amount))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_system_event(&self, event: &SystemEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_events (height, time, kind, sender_id, recipient_id, sender, recipient, before, after, change)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (height, kind, sender, sender_id, recipient, recipient_id) DO UPDATE SET
                before = EXCLUDED.before,
                after = EXCLUDED.after,
                change = EXCLUDED.change"
        )
        .bind(height(event.height))
        .bind(event.time)
        .bind(event.kind.as_str())
        .bind(u256_to_decimal(event.sender_id))
        .bind(u256_to_decimal(event.recipient_id))
        .bind(address_to_decimal(event.sender))
        .bind(address_to_decimal(event.recipient))
        .bind(u256_to_decimal(event.before))
        .bind(u256_to_decimal(event.after))
        .bind(&event.change)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_counts_of_validator(&self, validator_id: U256) -> Result<()> {
        let sql = format!(
            "UPDATE validators SET
                staked = COALESCE((SELECT amount FROM validator_statistics
                                   WHERE validator_id = $1 AND statistic_type = {}
                                   ORDER BY block_height DESC LIMIT 1), 0),
                active_nodes = COALESCE((SELECT amount FROM validator_statistics
                                         WHERE validator_id = $1 AND statistic_type = {}
                                         ORDER BY block_height DESC LIMIT 1), 0),
                linked_nodes = COALESCE((SELECT amount FROM validator_statistics
                                         WHERE validator_id = $1 AND statistic_type = {}
                                         ORDER BY block_height DESC LIMIT 1), 0)
             WHERE {}",
            ValidatorStatisticType::TotalStake.code(),
            ValidatorStatisticType::ActiveNodes.code(),
            ValidatorStatisticType::LinkedNodes.code(),
            LATEST_VALIDATOR_ROW
        );
        sqlx::query(&sql)
            .bind(u256_to_decimal(validator_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn calculate_total_stake(&self, params: &CalculationParams) -> Result<U256> {
        let sql = format!(
            "SELECT COALESCE(SUM(amount), 0)::NUMERIC FROM (
                SELECT DISTINCT ON (delegation_id) amount, state FROM delegations
                WHERE validator_id = $1 AND block_height <= $2
                ORDER BY delegation_id, block_height DESC
             ) latest
             WHERE state IN ({}, {})",
            DelegationState::Delegated.code(),
            DelegationState::UndelegationRequested.code()
        );
        self.recalculate(params, ValidatorStatisticType::TotalStake, &sql).await
    }

    async fn calculate_active_nodes(&self, params: &CalculationParams) -> Result<U256> {
        let sql = format!(
            "SELECT COUNT(*)::NUMERIC FROM (
                SELECT DISTINCT ON (node_id) status FROM nodes
                WHERE validator_id = $1 AND block_height <= $2
                ORDER BY node_id, block_height DESC
             ) latest
             WHERE status = {}",
            NodeStatus::Active.code()
        );
        self.recalculate(params, ValidatorStatisticType::ActiveNodes, &sql).await
    }

    async fn calculate_linked_nodes(&self, params: &CalculationParams) -> Result<U256> {
        let sql = format!(
            "SELECT COUNT(*)::NUMERIC FROM (
                SELECT DISTINCT ON (node_id) status FROM nodes
                WHERE validator_id = $1 AND block_height <= $2
                ORDER BY node_id, block_height DESC
             ) latest
             WHERE status <> {}",
            NodeStatus::Left.code()
        );
        self.recalculate(params, ValidatorStatisticType::LinkedNodes, &sql).await
    }

    async fn save_validator_snapshots(
        &self,
        snapshots: &[ValidatorSnapshot],
        block_height: u64,
        block_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            for (statistic_type, amount) in [
                (ValidatorStatisticType::ActiveNodes, snapshot.active_nodes),
                (ValidatorStatisticType::LinkedNodes, snapshot.linked_nodes),
                (ValidatorStatisticType::TotalStake, snapshot.total_stake),
            ] {
                upsert_validator_statistic(
                    &mut *tx,
                    &ValidatorStatistic {
                        validator_id: snapshot.validator_id,
                        block_height,
                        block_time,
                        statistic_type,
                        amount,
                    },
                )
                .await?;
                set_counter(&mut *tx, snapshot.validator_id, statistic_type).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_validators(&self, params: &ValidatorParams) -> Result<Vec<Validator>> {
        let rows: Vec<ValidatorRow> = sqlx::query_as(
            "SELECT * FROM (
                SELECT DISTINCT ON (validator_id)
                       validator_id, block_height, name, validator_address, requested_address, description,
                       fee_rate, registration_time, minimum_delegation_amount, accept_new_requests, authorized,
                       active_nodes, linked_nodes, staked
                FROM validators
                WHERE ($1::NUMERIC IS NULL OR validator_id = $1)
                  AND ($3::BIGINT IS NULL OR block_height < $3)
                ORDER BY validator_id, block_height DESC
             ) latest
             WHERE ($2::NUMERIC IS NULL OR validator_address = $2)
             ORDER BY validator_id"
        )
        .bind(params.validator_id.map(u256_to_decimal))
        .bind(params.validator_address.map(address_to_decimal))
        .bind(params.before_height.map(height))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn get_delegations(&self, params: &DelegationParams) -> Result<Vec<Delegation>> {
        let states: Vec<i16> = params.states.iter().map(|s| s.code()).collect();
        let rows: Vec<DelegationRow> = sqlx::query_as(
            "SELECT * FROM (
                SELECT DISTINCT ON (delegation_id)
                       delegation_id, block_height, holder, validator_id, amount, delegation_period,
                       created, started, finished, info, state, transaction_hash
                FROM delegations
                WHERE ($1::NUMERIC IS NULL OR delegation_id = $1)
                  AND ($5::BIGINT IS NULL OR block_height < $5)
                ORDER BY delegation_id, block_height DESC
             ) latest
             WHERE ($2::NUMERIC IS NULL OR validator_id = $2)
               AND ($3::NUMERIC IS NULL OR holder = $3)
               AND (cardinality($4::SMALLINT[]) = 0 OR state = ANY($4))
             ORDER BY delegation_id"
        )
        .bind(params.delegation_id.map(u256_to_decimal))
        .bind(params.validator_id.map(u256_to_decimal))
        .bind(params.holder.map(address_to_decimal))
        .bind(states)
        .bind(params.before_height.map(height))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn get_nodes(&self, params: &NodeParams) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            "SELECT * FROM (
                SELECT DISTINCT ON (node_id)
                       node_id, block_height, name, ip, public_ip, port, start_block, next_reward_date,
                       last_reward_date, finish_time, status, validator_id, event_time
                FROM nodes
                WHERE ($1::NUMERIC IS NULL OR node_id = $1)
                  AND ($4::BIGINT IS NULL OR block_height < $4)
                ORDER BY node_id, block_height DESC
             ) latest
             WHERE ($2::NUMERIC IS NULL OR validator_id = $2)
               AND ($3::SMALLINT IS NULL OR status = $3)
             ORDER BY node_id"
        )
        .bind(params.node_id.map(u256_to_decimal))
        .bind(params.validator_id.map(u256_to_decimal))
        .bind(params.status.map(|s| s.code()))
        .bind(params.before_height.map(height))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn get_accounts(&self, params: &AccountParams) -> Result<Vec<Account>> {
        let rows: Vec<(BigDecimal, i16)> = sqlx::query_as(
            "SELECT address, account_type FROM accounts
             WHERE ($1::NUMERIC IS NULL OR address = $1)
               AND ($2::SMALLINT IS NULL OR account_type = $2)
             ORDER BY address"
        )
        .bind(params.address.map(address_to_decimal))
        .bind(params.account_type.map(|t| t.rank()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(address, rank)| Ok(Account::new(decimal_to_address(&address)?, AccountType::from_rank(rank))))
            .collect()
    }

    async fn get_contract_events(&self, params: &ContractEventParams) -> Result<Vec<ContractEvent>> {
        let rows: Vec<ContractEventRow> = sqlx::query_as(
            "SELECT id, contract_name, event_name, contract_address, block_height, log_index, time, tx_hash,
                    params, removed, bound_type, bound_ids, bound_addresses, flagged
             FROM contract_events
             WHERE ($1::NUMERIC IS NULL OR contract_address = $1)
               AND ($2::TEXT IS NULL OR event_name = $2)
               AND ($3::TEXT IS NULL OR bound_type = $3)
               AND ($4::NUMERIC IS NULL OR $4 = ANY(bound_ids))
               AND ($5::NUMERIC IS NULL OR $5 = ANY(bound_addresses))
               AND ($6::BIGINT IS NULL OR block_height >= $6)
               AND ($7::BIGINT IS NULL OR block_height <= $7)
             ORDER BY block_height, log_index"
        )
        .bind(params.contract_address.map(address_to_decimal))
        .bind(params.event_name.as_deref())
        .bind(params.bound_type.map(|t| t.as_str()))
        .bind(params.bound_id.map(u256_to_decimal))
        .bind(params.bound_address.map(address_to_decimal))
        .bind(params.from_height.map(height))
        .bind(params.to_height.map(height))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn get_validator_statistics(&self, params: &ValidatorStatisticParams) -> Result<Vec<ValidatorStatistic>> {
        let rows: Vec<StatisticRow> = sqlx::query_as(
            "SELECT validator_id AS subject, block_height, block_time, statistic_type, amount
             FROM validator_statistics
             WHERE ($1::NUMERIC IS NULL OR validator_id = $1)
               AND ($2::SMALLINT IS NULL OR statistic_type = $2)
               AND ($3::BIGINT IS NULL OR block_height >= $3)
               AND ($4::BIGINT IS NULL OR block_height <= $4)
             ORDER BY block_height, validator_id, statistic_type"
        )
        .bind(params.validator_id.map(u256_to_decimal))
        .bind(params.statistic_type.map(|t| t.code()))
        .bind(params.from_height.map(height))
        .bind(params.to_height.map(height))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ValidatorStatistic {
                    validator_id: decimal_to_u256(&row.subject)?,
                    block_height: row.block_height as u64,
                    block_time: row.block_time,
                    statistic_type: ValidatorStatisticType::from_code(row.statistic_type).ok_or_else(|| {
                        IndexerError::Decode(format!("unknown statistic type {}", row.statistic_type))
                    })?,
                    amount: decimal_to_u256(&row.amount)?,
                })
            })
            .collect()
    }

    async fn get_delegator_statistics(&self, params: &DelegatorStatisticParams) -> Result<Vec<DelegatorStatistic>> {
        let rows: Vec<StatisticRow> = sqlx::query_as(
            "SELECT holder AS subject, block_height, block_time, statistic_type, amount
             FROM delegator_statistics
             WHERE ($1::NUMERIC IS NULL OR holder = $1)
               AND ($2::SMALLINT IS NULL OR statistic_type = $2)
               AND ($3::BIGINT IS NULL OR block_height >= $3)
               AND ($4::BIGINT IS NULL OR block_height <= $4)
             ORDER BY block_height, holder, statistic_type"
        )
        .bind(params.holder.map(address_to_decimal))
        .bind(params.statistic_type.map(|t| t.code()))
        .bind(params.from_height.map(height))
        .bind(params.to_height.map(height))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DelegatorStatistic {
                    holder: decimal_to_address(&row.subject)?,
                    block_height: row.block_height as u64,
                    block_time: row.block_time,
                    statistic_type: DelegatorStatisticType::from_code(row.statistic_type).ok_or_else(|| {
                        IndexerError::Decode(format!("unknown statistic type {}", row.statistic_type))
                    })?,
                    amount: decimal_to_u256(&row.amount)?,
                })
            })
            .collect()
    }

    async fn get_system_events(&self, params: &SystemEventParams) -> Result<Vec<SystemEvent>> {
        let rows: Vec<SystemEventRow> = sqlx::query_as(
            "SELECT height, time, kind, sender_id, recipient_id, sender, recipient, before, after, change
             FROM system_events
             WHERE ($1::TEXT IS NULL OR kind = $1)
               AND ($2::NUMERIC IS NULL OR sender_id = $2)
               AND ($3::NUMERIC IS NULL OR recipient_id = $3)
               AND ($4::NUMERIC IS NULL OR sender = $4 OR recipient = $4)
               AND ($5::BIGINT IS NULL OR height >= $5)
               AND ($6::BIGINT IS NULL OR height <= $6)
             ORDER BY height, id"
        )
        .bind(params.kind.map(|k| k.as_str()))
        .bind(params.sender_id.map(u256_to_decimal))
        .bind(params.recipient_id.map(u256_to_decimal))
        .bind(params.address.map(address_to_decimal))
        .bind(params.from_height.map(height))
        .bind(params.to_height.map(height))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM indexer_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO indexer_state (key, value, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()"
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
