use alloy::primitives::{Address, B256, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::IndexerError;

pub fn timestamp_to_datetime(seconds: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds.min(i64::MAX as u64) as i64, 0).unwrap_or_default()
}

/// Minimal block header needed to timestamp events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn time(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.timestamp)
    }
}

// =====================
// Contracts
// =====================

/// Logical role of a deployed contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractName {
    ValidatorService,
    DelegationController,
    Nodes,
    Distributor,
    Punisher,
    SkaleManager,
    SkaleToken,
    Bounty,
    BountyV2,
}

impl ContractName {
    pub const ALL: [ContractName; 9] = [
        ContractName::ValidatorService,
        ContractName::DelegationController,
        ContractName::Nodes,
        ContractName::Distributor,
        ContractName::Punisher,
        ContractName::SkaleManager,
        ContractName::SkaleToken,
        ContractName::Bounty,
        ContractName::BountyV2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractName::ValidatorService => "validator_service",
            ContractName::DelegationController => "delegation_controller",
            ContractName::Nodes => "nodes",
            ContractName::Distributor => "distributor",
            ContractName::Punisher => "punisher",
            ContractName::SkaleManager => "skale_manager",
            ContractName::SkaleToken => "skale_token",
            ContractName::Bounty => "bounty",
            ContractName::BountyV2 => "bounty_v2",
        }
    }
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContractName {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContractName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| IndexerError::NotFound(format!("unknown contract name {}", s)))
    }
}

// =====================
// Validators
// =====================

/// Validator snapshot observed at `block_height`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub validator_id: U256,
    pub name: String,
    pub validator_address: Address,
    pub requested_address: Address,
    pub description: String,
    pub fee_rate: U256,
    pub registration_time: DateTime<Utc>,
    pub minimum_delegation_amount: U256,
    pub accept_new_requests: bool,
    pub authorized: bool,
    pub active_nodes: U256,
    pub linked_nodes: U256,
    pub staked: U256,
    pub block_height: u64,
}

// =====================
// Delegations
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationState {
    Proposed,
    Accepted,
    Canceled,
    Rejected,
    Delegated,
    UndelegationRequested,
    Completed,
    Unknown,
}

impl DelegationState {
    /// Decode the on-chain `State` enum ordinal.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => DelegationState::Proposed,
            1 => DelegationState::Accepted,
            2 => DelegationState::Canceled,
            3 => DelegationState::Rejected,
            4 => DelegationState::Delegated,
            5 => DelegationState::UndelegationRequested,
            6 => DelegationState::Completed,
            _ => DelegationState::Unknown,
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            DelegationState::Proposed => 0,
            DelegationState::Accepted => 1,
            DelegationState::Canceled => 2,
            DelegationState::Rejected => 3,
            DelegationState::Delegated => 4,
            DelegationState::UndelegationRequested => 5,
            DelegationState::Completed => 6,
            DelegationState::Unknown => -1,
        }
    }

    /// States whose amount counts toward a validator's stake
    pub fn is_staked(&self) -> bool {
        matches!(self, DelegationState::Delegated | DelegationState::UndelegationRequested)
    }

    fn successors(&self) -> &'static [DelegationState] {
        match self {
            DelegationState::Proposed => &[
                DelegationState::Accepted,
                DelegationState::Canceled,
                DelegationState::Rejected,
            ],
            DelegationState::Accepted => &[DelegationState::Delegated],
            DelegationState::Delegated => &[DelegationState::UndelegationRequested],
            DelegationState::UndelegationRequested => &[DelegationState::Completed],
            _ => &[],
        }
    }

    /// Whether `next` is reachable from `self` along the lifecycle DAG.
    /// Observations may skip intermediate states, so reachability rather than
    /// a single edge is what is checked. `Unknown` on either side is accepted.
    pub fn can_transition_to(&self, next: DelegationState) -> bool {
        if *self == next || *self == DelegationState::Unknown || next == DelegationState::Unknown {
            return true;
        }
        self.successors()
            .iter()
            .any(|s| *s == next || s.can_transition_to(next))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegation_id: U256,
    pub holder: Address,
    pub validator_id: U256,
    pub amount: U256,
    pub delegation_period: U256,
    pub created: DateTime<Utc>,
    pub started: U256,
    pub finished: U256,
    pub info: String,
    pub state: DelegationState,
    pub block_height: u64,
    pub transaction_hash: B256,
}

// =====================
// Nodes
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Leaving,
    Left,
    #[serde(rename = "In_Maintenance")]
    InMaintenance,
}

impl NodeStatus {
    pub fn from_code(code: u64) -> Result<Self, IndexerError> {
        match code {
            0 => Ok(NodeStatus::Active),
            1 => Ok(NodeStatus::Leaving),
            2 => Ok(NodeStatus::Left),
            3 => Ok(NodeStatus::InMaintenance),
            other => Err(IndexerError::Decode(format!("unknown node status {}", other))),
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            NodeStatus::Active => 0,
            NodeStatus::Leaving => 1,
            NodeStatus::Left => 2,
            NodeStatus::InMaintenance => 3,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Active)
    }

    /// A node stays linked to its validator until it has fully left.
    pub fn is_linked(&self) -> bool {
        !matches!(self, NodeStatus::Left)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: U256,
    pub name: String,
    pub ip: Ipv4Addr,
    pub public_ip: Ipv4Addr,
    pub port: u16,
    pub start_block: U256,
    pub next_reward_date: DateTime<Utc>,
    pub last_reward_date: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub status: NodeStatus,
    pub validator_id: U256,
    pub event_time: DateTime<Utc>,
    pub block_height: u64,
}

// =====================
// Accounts
// =====================

/// Ordered so that an account may only ever be promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Default,
    Delegator,
    Validator,
}

impl AccountType {
    pub fn rank(&self) -> i16 {
        match self {
            AccountType::Default => 0,
            AccountType::Delegator => 1,
            AccountType::Validator => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Self {
        match rank {
            2 => AccountType::Validator,
            1 => AccountType::Delegator,
            _ => AccountType::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub account_type: AccountType,
}

impl Account {
    pub fn new(address: Address, account_type: AccountType) -> Self {
        Self { address, account_type }
    }
}

// =====================
// Raw contract events
// =====================

/// Kind of entity a persisted event is denormalised against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundType {
    Validator,
    Node,
    Delegation,
    Delegator,
    Account,
}

impl BoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundType::Validator => "validator",
            BoundType::Node => "node",
            BoundType::Delegation => "delegation",
            BoundType::Delegator => "delegator",
            BoundType::Account => "account",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validator" => Some(BoundType::Validator),
            "node" => Some(BoundType::Node),
            "delegation" => Some(BoundType::Delegation),
            "delegator" => Some(BoundType::Delegator),
            "account" => Some(BoundType::Account),
            _ => None,
        }
    }
}

/// Decoded log as persisted in `contract_events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEvent {
    pub id: Option<i64>,
    pub contract_name: ContractName,
    pub event_name: String,
    pub contract_address: Address,
    pub block_height: u64,
    pub log_index: u64,
    pub time: DateTime<Utc>,
    pub tx_hash: B256,
    pub params: serde_json::Value,
    pub removed: bool,
    pub bound_type: Option<BoundType>,
    pub bound_ids: Vec<U256>,
    pub bound_addresses: Vec<Address>,
    /// Set when the event implies a lifecycle transition that contradicts
    /// previously indexed history.
    pub flagged: bool,
}

impl ContractEvent {
    pub fn bind(&mut self, bound_type: BoundType, ids: Vec<U256>, addresses: Vec<Address>) {
        self.bound_type = Some(bound_type);
        self.bound_ids = ids;
        self.bound_addresses = addresses;
    }
}

// =====================
// Statistics
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorStatisticType {
    TotalStake,
    ActiveNodes,
    LinkedNodes,
}

impl ValidatorStatisticType {
    pub fn code(&self) -> i16 {
        match self {
            ValidatorStatisticType::TotalStake => 1,
            ValidatorStatisticType::ActiveNodes => 2,
            ValidatorStatisticType::LinkedNodes => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(ValidatorStatisticType::TotalStake),
            2 => Some(ValidatorStatisticType::ActiveNodes),
            3 => Some(ValidatorStatisticType::LinkedNodes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStatistic {
    pub validator_id: U256,
    pub block_height: u64,
    pub block_time: DateTime<Utc>,
    pub statistic_type: ValidatorStatisticType,
    pub amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegatorStatisticType {
    ClaimedRewards,
    UnclaimedRewards,
}

impl DelegatorStatisticType {
    pub fn code(&self) -> i16 {
        match self {
            DelegatorStatisticType::ClaimedRewards => 1,
            DelegatorStatisticType::UnclaimedRewards => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(DelegatorStatisticType::ClaimedRewards),
            2 => Some(DelegatorStatisticType::UnclaimedRewards),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatorStatistic {
    pub holder: Address,
    pub block_height: u64,
    pub block_time: DateTime<Utc>,
    pub statistic_type: DelegatorStatisticType,
    pub amount: U256,
}

/// One `WithdrawBounty` payout, identified by its position in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    pub holder: Address,
    pub block_height: u64,
    pub log_index: u64,
    pub block_time: DateTime<Utc>,
    pub amount: U256,
}

/// Per-validator figures written by the epoch synchroniser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSnapshot {
    pub validator_id: U256,
    pub active_nodes: U256,
    pub linked_nodes: U256,
    pub total_stake: U256,
}

// =====================
// System events
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    NewDelegation,
    DelegationAccepted,
    DelegationRejected,
    UndelegationRequested,
    JoinedActiveSet,
    LeftActiveSet,
    Slashed,
    Forgiven,
    MdrChange,
    FeeChange,
}

impl SystemEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventKind::NewDelegation => "new_delegation",
            SystemEventKind::DelegationAccepted => "delegation_accepted",
            SystemEventKind::DelegationRejected => "delegation_rejected",
            SystemEventKind::UndelegationRequested => "undelegation_requested",
            SystemEventKind::JoinedActiveSet => "joined_active_set",
            SystemEventKind::LeftActiveSet => "left_active_set",
            SystemEventKind::Slashed => "slashed",
            SystemEventKind::Forgiven => "forgiven",
            SystemEventKind::MdrChange => "mdr_change",
            SystemEventKind::FeeChange => "fee_change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            SystemEventKind::NewDelegation,
            SystemEventKind::DelegationAccepted,
            SystemEventKind::DelegationRejected,
            SystemEventKind::UndelegationRequested,
            SystemEventKind::JoinedActiveSet,
            SystemEventKind::LeftActiveSet,
            SystemEventKind::Slashed,
            SystemEventKind::Forgiven,
            SystemEventKind::MdrChange,
            SystemEventKind::FeeChange,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub height: u64,
    pub time: DateTime<Utc>,
    pub kind: SystemEventKind,
    pub sender_id: U256,
    pub recipient_id: U256,
    pub sender: Address,
    pub recipient: Address,
    pub before: U256,
    pub after: U256,
    /// Signed difference `after - before`
    pub change: BigDecimal,
}

impl SystemEvent {
    pub fn new(height: u64, time: DateTime<Utc>, kind: SystemEventKind) -> Self {
        Self {
            height,
            time,
            kind,
            sender_id: U256::ZERO,
            recipient_id: U256::ZERO,
            sender: Address::ZERO,
            recipient: Address::ZERO,
            before: U256::ZERO,
            after: U256::ZERO,
            change: BigDecimal::from(0),
        }
    }

    pub fn with_sender(mut self, sender_id: U256, sender: Address) -> Self {
        self.sender_id = sender_id;
        self.sender = sender;
        self
    }

    pub fn with_recipient(mut self, recipient_id: U256, recipient: Address) -> Self {
        self.recipient_id = recipient_id;
        self.recipient = recipient;
        self
    }

    pub fn with_values(mut self, before: U256, after: U256) -> Self {
        self.before = before;
        self.after = after;
        self.change = crate::convert::u256_to_decimal(after) - crate::convert::u256_to_decimal(before);
        self
    }
}

// =====================
// Query parameters
// =====================

/// Filters for current validator snapshots. `before_height` is exclusive.
#[derive(Debug, Clone, Default)]
pub struct ValidatorParams {
    pub validator_id: Option<U256>,
    pub validator_address: Option<Address>,
    pub before_height: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DelegationParams {
    pub delegation_id: Option<U256>,
    pub validator_id: Option<U256>,
    pub holder: Option<Address>,
    pub states: Vec<DelegationState>,
    pub before_height: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeParams {
    pub node_id: Option<U256>,
    pub validator_id: Option<U256>,
    pub status: Option<NodeStatus>,
    pub before_height: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AccountParams {
    pub address: Option<Address>,
    pub account_type: Option<AccountType>,
}

/// Inclusive height bounds
#[derive(Debug, Clone, Default)]
pub struct ContractEventParams {
    pub contract_address: Option<Address>,
    pub event_name: Option<String>,
    pub bound_type: Option<BoundType>,
    pub bound_id: Option<U256>,
    pub bound_address: Option<Address>,
    pub from_height: Option<u64>,
    pub to_height: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorStatisticParams {
    pub validator_id: Option<U256>,
    pub statistic_type: Option<ValidatorStatisticType>,
    pub from_height: Option<u64>,
    pub to_height: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DelegatorStatisticParams {
    pub holder: Option<Address>,
    pub statistic_type: Option<DelegatorStatisticType>,
    pub from_height: Option<u64>,
    pub to_height: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SystemEventParams {
    pub kind: Option<SystemEventKind>,
    pub sender_id: Option<U256>,
    pub recipient_id: Option<U256>,
    pub address: Option<Address>,
    pub from_height: Option<u64>,
    pub to_height: Option<u64>,
}

/// Input of a statistics recomputation
#[derive(Debug, Clone)]
pub struct CalculationParams {
    pub validator_id: U256,
    pub block_height: u64,
    pub block_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_name_round_trip() {
        for name in ContractName::ALL {
            assert_eq!(name.as_str().parse::<ContractName>().unwrap(), name);
        }
        assert!("schains".parse::<ContractName>().is_err());
    }

    #[test]
    fn test_delegation_transitions() {
        use DelegationState::*;
        assert!(Proposed.can_transition_to(Accepted));
        assert!(Proposed.can_transition_to(Canceled));
        assert!(Proposed.can_transition_to(Delegated)); // skipped Accepted
        assert!(Delegated.can_transition_to(Completed));
        assert!(!Delegated.can_transition_to(Proposed));
        assert!(!Canceled.can_transition_to(Accepted));
        assert!(!Completed.can_transition_to(Delegated));
        assert!(Unknown.can_transition_to(Completed));
    }

    #[test]
    fn test_account_type_order() {
        assert!(AccountType::Default < AccountType::Delegator);
        assert!(AccountType::Delegator < AccountType::Validator);
        for t in [AccountType::Default, AccountType::Delegator, AccountType::Validator] {
            assert_eq!(AccountType::from_rank(t.rank()), t);
        }
    }

    #[test]
    fn test_node_status_codes() {
        assert_eq!(NodeStatus::from_code(3).unwrap(), NodeStatus::InMaintenance);
        assert!(NodeStatus::from_code(9).is_err());
        assert!(NodeStatus::Leaving.is_linked());
        assert!(!NodeStatus::Left.is_linked());
    }

    #[test]
    fn test_system_event_change_is_signed() {
        let event = SystemEvent::new(1, timestamp_to_datetime(0), SystemEventKind::FeeChange)
            .with_values(U256::from(50u64), U256::from(20u64));
        assert_eq!(event.change, BigDecimal::from(-30));
    }
}
