use alloy::primitives::{Address, U256};
use skale_common::{
    Account, AccountType, BoundType, ContractEvent, ContractName, Result, SystemEvent, SystemEventKind, Validator,
    ValidatorParams,
};
use std::sync::Arc;

use super::{calculation, recalculate_nodes, HandlerContext};
use crate::callers::{NodesCaller, ValidatorServiceCaller};
use crate::decode::DecodedLog;
use crate::registry::ContractBinding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorServiceEvent {
    Registered { validator_id: U256 },
    AddressChanged { validator_id: U256, new_address: Address },
    Enabled { validator_id: U256 },
    Disabled { validator_id: U256 },
    NodeAddressAdded { validator_id: U256, node_address: Address },
    NodeAddressRemoved { validator_id: U256, node_address: Address },
}

impl ValidatorServiceEvent {
    /// `None` for events this family does not track.
    pub fn parse(decoded: &DecodedLog) -> Result<Option<Self>> {
        let params = &decoded.params;
        let event = match decoded.event_name.as_str() {
            "ValidatorRegistered" => Self::Registered {
                validator_id: params.uint("validatorId")?,
            },
            "ValidatorAddressChanged" => Self::AddressChanged {
                validator_id: params.uint("validatorId")?,
                new_address: params.address("newAddress")?,
            },
            "ValidatorWasEnabled" => Self::Enabled {
                validator_id: params.uint("validatorId")?,
            },
            "ValidatorWasDisabled" => Self::Disabled {
                validator_id: params.uint("validatorId")?,
            },
            "NodeAddressWasAdded" => Self::NodeAddressAdded {
                validator_id: params.uint("validatorId")?,
                node_address: params.address("nodeAddress")?,
            },
            "NodeAddressWasRemoved" => Self::NodeAddressRemoved {
                validator_id: params.uint("validatorId")?,
                node_address: params.address("nodeAddress")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn validator_id(&self) -> U256 {
        match self {
            Self::Registered { validator_id }
            | Self::AddressChanged { validator_id, .. }
            | Self::Enabled { validator_id }
            | Self::Disabled { validator_id }
            | Self::NodeAddressAdded { validator_id, .. }
            | Self::NodeAddressRemoved { validator_id, .. } => *validator_id,
        }
    }
}

pub(super) async fn handle(
    ctx: &HandlerContext,
    binding: &Arc<ContractBinding>,
    decoded: &DecodedLog,
    mut event: ContractEvent,
) -> Result<ContractEvent> {
    let Some(parsed) = ValidatorServiceEvent::parse(decoded)? else {
        tracing::debug!("Untracked validator service event {}", decoded.event_name);
        return Ok(event);
    };
    let validator_id = parsed.validator_id();
    let height = event.block_height;

    let caller = ValidatorServiceCaller::new(ctx.contract(binding));
    let validator = caller.get_validator_with_info(validator_id, height).await?;

    let previous = ctx
        .store
        .get_validators(&ValidatorParams {
            validator_id: Some(validator_id),
            before_height: Some(height),
            ..Default::default()
        })
        .await?
        .into_iter()
        .next();

    ctx.store.save_validator(&validator).await?;
    ctx.store.update_counts_of_validator(validator_id).await?;

    if let Some(previous) = previous {
        save_parameter_changes(ctx, &event, &previous, &validator).await?;
    }

    match parsed {
        ValidatorServiceEvent::NodeAddressAdded { .. } | ValidatorServiceEvent::NodeAddressRemoved { .. } => {
            let nodes_caller = NodesCaller::new(ctx.sibling(binding, ContractName::Nodes)?);
            let mut nodes = nodes_caller.get_validator_nodes(validator_id, height).await?;
            for node in &mut nodes {
                node.event_time = event.time;
                node.block_height = height;
            }
            ctx.store.save_nodes(&nodes).await?;
            recalculate_nodes(ctx, &calculation(validator_id, &event)).await?;
        }
        ValidatorServiceEvent::Registered { .. } => {
            ctx.store
                .save_account(&Account::new(validator.validator_address, AccountType::Validator))
                .await?;
        }
        ValidatorServiceEvent::AddressChanged { new_address, .. } => {
            ctx.store
                .save_account(&Account::new(new_address, AccountType::Validator))
                .await?;
        }
        ValidatorServiceEvent::Enabled { .. } => {
            let system_event = SystemEvent::new(height, event.time, SystemEventKind::JoinedActiveSet)
                .with_sender(validator_id, validator.validator_address);
            ctx.store.save_system_event(&system_event).await?;
        }
        ValidatorServiceEvent::Disabled { .. } => {
            let system_event = SystemEvent::new(height, event.time, SystemEventKind::LeftActiveSet)
                .with_sender(validator_id, validator.validator_address);
            ctx.store.save_system_event(&system_event).await?;
        }
    }

    event.bind(BoundType::Validator, vec![validator_id], Vec::new());
    Ok(event)
}

/// Record fee and minimum delegation amount changes against the latest
/// strictly older snapshot.
async fn save_parameter_changes(
    ctx: &HandlerContext,
    event: &ContractEvent,
    previous: &Validator,
    current: &Validator,
) -> Result<()> {
    let changes = [
        (SystemEventKind::FeeChange, previous.fee_rate, current.fee_rate),
        (
            SystemEventKind::MdrChange,
            previous.minimum_delegation_amount,
            current.minimum_delegation_amount,
        ),
    ];
    for (kind, before, after) in changes {
        if before == after {
            continue;
        }
        let system_event = SystemEvent::new(event.block_height, event.time, kind)
            .with_sender(current.validator_id, current.validator_address)
            .with_values(before, after);
        ctx.store.save_system_event(&system_event).await?;
    }
    Ok(())
}
