//! Shared fixtures for unit tests: contract ABIs, a registry wired to fixed
//! addresses, and helpers that build encoded logs.

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, B256, U256};
use skale_common::ContractName;
use std::sync::Arc;

use crate::registry::{ContractBinding, ContractRegistry, ContractVersion};
use crate::transport::ChainLog;

pub(crate) const VERSION: &str = "1.9.0";

pub(crate) fn address_of(name: ContractName) -> Address {
    let index = ContractName::ALL.iter().position(|n| *n == name).unwrap_or(0) as u8;
    Address::repeat_byte(0xa0 + index)
}

pub(crate) fn validator_service_abi() -> JsonAbi {
    JsonAbi::parse([
        "function getValidator(uint256 validatorId) view returns ((string,address,address,string,uint256,uint256,uint256,bool))",
        "function isAuthorizedValidator(uint256 validatorId) view returns (bool)",
        "event ValidatorRegistered(uint256 validatorId)",
        "event ValidatorAddressChanged(uint256 validatorId, address newAddress)",
        "event ValidatorWasEnabled(uint256 validatorId)",
        "event ValidatorWasDisabled(uint256 validatorId)",
        "event NodeAddressWasAdded(uint256 validatorId, address nodeAddress)",
        "event NodeAddressWasRemoved(uint256 validatorId, address nodeAddress)",
    ])
    .expect("validator service ABI")
}

pub(crate) fn nodes_abi() -> JsonAbi {
    JsonAbi::parse([
        "function nodes(uint256) view returns (string name, bytes4 ip, bytes4 publicIP, uint16 port, uint256 startBlock, uint256 lastRewardDate, uint256 finishTime, uint8 status, uint256 validatorId)",
        "function getNodeNextRewardDate(uint256 nodeIndex) view returns (uint256)",
        "function getValidatorNodeIndexes(uint256 validatorId) view returns (uint256[])",
        "event NodeCreated(uint256 nodeIndex, address owner, string name, bytes4 ip, bytes4 publicIP, uint16 port, uint16 nonce, uint256 time, uint256 gasSpend)",
        "event ExitInitialized(uint256 nodeIndex, uint256 startLeavingPeriod, uint256 time, uint256 gasSpend)",
        "event ExitCompleted(uint256 nodeIndex, uint256 time, uint256 gasSpend)",
    ])
    .expect("nodes ABI")
}

pub(crate) fn delegation_controller_abi() -> JsonAbi {
    JsonAbi::parse([
        "function getDelegation(uint256 delegationId) view returns ((address,uint256,uint256,uint256,uint256,uint256,uint256,string))",
        "function getState(uint256 delegationId) view returns (uint8)",
        "function getDelegationsByHolderLength(address holder) view returns (uint256)",
        "function delegationsByHolder(address, uint256) view returns (uint256)",
        "function getDelegationsByValidatorLength(uint256 validatorId) view returns (uint256)",
        "function delegationsByValidator(uint256, uint256) view returns (uint256)",
        "function getLockedInPendingDelegations(address holder) view returns (uint256)",
        "event DelegationProposed(uint256 delegationId)",
        "event DelegationAccepted(uint256 delegationId)",
        "event DelegationRequestCanceledByUser(uint256 delegationId)",
        "event UndelegationRequested(uint256 delegationId)",
    ])
    .expect("delegation controller ABI")
}

pub(crate) fn distributor_abi() -> JsonAbi {
    JsonAbi::parse([
        "function getEarnedFeeAmountOf(uint256 validatorId) view returns (uint256 earned, uint256 endMonth)",
        "event WithdrawBounty(address holder, uint256 validatorId, address destination, uint256 amount)",
        "event WithdrawFee(uint256 validatorId, address destination, uint256 amount)",
    ])
    .expect("distributor ABI")
}

pub(crate) fn punisher_abi() -> JsonAbi {
    JsonAbi::parse([
        "event Slash(uint256 validatorId, uint256 amount)",
        "event Forgive(address wallet, uint256 amount)",
    ])
    .expect("punisher ABI")
}

pub(crate) fn token_abi() -> JsonAbi {
    JsonAbi::parse([
        "function balanceOf(address owner) view returns (uint256)",
        "function totalSupply() view returns (uint256)",
        "event Transfer(address indexed from, address indexed to, uint256 value)",
        "event Approval(address indexed owner, address indexed spender, uint256 value)",
        "event Minted(address indexed operator, address indexed to, uint256 amount, bytes data, bytes operatorData)",
    ])
    .expect("token ABI")
}

pub(crate) fn skale_manager_abi() -> JsonAbi {
    JsonAbi::parse(["event BountyReceived(uint256 indexed nodeIndex, address owner, uint256 averageDowntime, uint256 averageLatency, uint256 bounty, uint256 previousBlockEvent, uint256 time, uint256 gasSpend)"])
        .expect("skale manager ABI")
}

pub(crate) fn abi_of(name: ContractName) -> JsonAbi {
    match name {
        ContractName::ValidatorService => validator_service_abi(),
        ContractName::Nodes => nodes_abi(),
        ContractName::DelegationController => delegation_controller_abi(),
        ContractName::Distributor => distributor_abi(),
        ContractName::Punisher => punisher_abi(),
        ContractName::SkaleToken => token_abi(),
        ContractName::SkaleManager | ContractName::Bounty | ContractName::BountyV2 => skale_manager_abi(),
    }
}

pub(crate) fn binding(name: ContractName) -> ContractBinding {
    ContractBinding {
        name,
        version: ContractVersion::parse(VERSION),
        address: address_of(name),
        abi: Arc::new(abi_of(name)),
    }
}

/// Registry holding every tracked contract at `VERSION`
pub(crate) fn registry() -> Arc<ContractRegistry> {
    Arc::new(ContractRegistry::from_bindings(
        [
            ContractName::ValidatorService,
            ContractName::Nodes,
            ContractName::DelegationController,
            ContractName::Distributor,
            ContractName::Punisher,
            ContractName::SkaleToken,
            ContractName::SkaleManager,
        ]
        .into_iter()
        .map(binding),
    ))
}

pub(crate) fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

/// Encode `event_name(values)` as emitted by the `name` contract.
pub(crate) fn log(
    name: ContractName,
    event_name: &str,
    values: &[DynSolValue],
    block_number: u64,
    log_index: u64,
) -> ChainLog {
    let abi = abi_of(name);
    let event = &abi.event(event_name).expect("event in ABI")[0];

    let mut topics = vec![event.selector()];
    let mut body = Vec::new();
    for (input, value) in event.inputs.iter().zip(values) {
        if input.indexed {
            topics.push(value.as_word().expect("indexed value fits a word"));
        } else {
            body.push(value.clone());
        }
    }
    let data = DynSolValue::Tuple(body).abi_encode_params();

    ChainLog {
        address: address_of(name),
        topics,
        data: Bytes::from(data),
        block_number,
        log_index,
        tx_hash: B256::from(U256::from(block_number * 1_000 + log_index)),
        removed: false,
    }
}
