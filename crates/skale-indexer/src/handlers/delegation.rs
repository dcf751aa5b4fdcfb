use alloy::primitives::{Address, U256};
use skale_common::{
    Account, AccountType, BoundType, ContractEvent, Delegation, DelegationParams, DelegationState, Result, SystemEvent,
    SystemEventKind,
};
use std::sync::Arc;

use super::{calculation, HandlerContext};
use crate::callers::DelegationCaller;
use crate::decode::DecodedLog;
use crate::registry::ContractBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationEvent {
    Proposed { delegation_id: U256 },
    Accepted { delegation_id: U256 },
    CanceledByUser { delegation_id: U256 },
    UndelegationRequested { delegation_id: U256 },
}

impl DelegationEvent {
    pub fn parse(decoded: &DecodedLog) -> Result<Option<Self>> {
        let event = match decoded.event_name.as_str() {
            "DelegationProposed" => Self::Proposed {
                delegation_id: decoded.params.uint("delegationId")?,
            },
            "DelegationAccepted" => Self::Accepted {
                delegation_id: decoded.params.uint("delegationId")?,
            },
            "DelegationRequestCanceledByUser" => Self::CanceledByUser {
                delegation_id: decoded.params.uint("delegationId")?,
            },
            "UndelegationRequested" => Self::UndelegationRequested {
                delegation_id: decoded.params.uint("delegationId")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn delegation_id(&self) -> U256 {
        match self {
            Self::Proposed { delegation_id }
            | Self::Accepted { delegation_id }
            | Self::CanceledByUser { delegation_id }
            | Self::UndelegationRequested { delegation_id } => *delegation_id,
        }
    }
}

pub(super) async fn handle(
    ctx: &HandlerContext,
    binding: &Arc<ContractBinding>,
    decoded: &DecodedLog,
    mut event: ContractEvent,
) -> Result<ContractEvent> {
    let Some(parsed) = DelegationEvent::parse(decoded)? else {
        tracing::debug!("Untracked delegation controller event {}", decoded.event_name);
        return Ok(event);
    };
    let delegation_id = parsed.delegation_id();
    let height = event.block_height;

    let caller = DelegationCaller::new(ctx.contract(binding));
    let mut delegation = caller.get_delegation(delegation_id, height).await?;
    delegation.state = caller.get_delegation_state(delegation_id, height).await?;
    delegation.transaction_hash = event.tx_hash;

    let previous = ctx
        .store
        .get_delegations(&DelegationParams {
            delegation_id: Some(delegation_id),
            before_height: Some(height),
            ..Default::default()
        })
        .await?
        .into_iter()
        .next();
    if let Some(previous) = previous {
        if !previous.state.can_transition_to(delegation.state) {
            tracing::warn!(
                delegation_id = %delegation_id,
                tx_hash = %event.tx_hash,
                "Delegation moved from {:?} at block {} to {:?} at block {}",
                previous.state,
                previous.block_height,
                delegation.state,
                height
            );
            event.flagged = true;
        }
    }

    ctx.store.save_delegation(&delegation).await?;

    if !caller.get_holder_delegation_count(delegation.holder, height).await?.is_zero() {
        ctx.store
            .save_account(&Account::new(delegation.holder, AccountType::Delegator))
            .await?;
    }

    ctx.store
        .calculate_total_stake(&calculation(delegation.validator_id, &event))
        .await?;

    for (kind, before, after) in system_events(parsed, &delegation) {
        let system_event = SystemEvent::new(height, event.time, kind)
            .with_sender(delegation_id, delegation.holder)
            .with_recipient(delegation.validator_id, Address::ZERO)
            .with_values(before, after);
        ctx.store.save_system_event(&system_event).await?;
    }

    event.bind(
        BoundType::Delegation,
        vec![delegation_id, delegation.validator_id],
        vec![delegation.holder],
    );
    Ok(event)
}

/// Derived events as `(kind, before, after)`, the amount moving into or out of
/// the validator's pool.
fn system_events(event: DelegationEvent, delegation: &Delegation) -> Vec<(SystemEventKind, U256, U256)> {
    let amount = delegation.amount;
    let mut events = Vec::new();
    match event {
        DelegationEvent::Proposed { .. } => events.push((SystemEventKind::NewDelegation, U256::ZERO, amount)),
        DelegationEvent::Accepted { .. } => events.push((SystemEventKind::DelegationAccepted, U256::ZERO, amount)),
        DelegationEvent::UndelegationRequested { .. } => {
            events.push((SystemEventKind::UndelegationRequested, amount, U256::ZERO))
        }
        DelegationEvent::CanceledByUser { .. } => {}
    }
    if delegation.state == DelegationState::Rejected {
        events.push((SystemEventKind::DelegationRejected, amount, U256::ZERO));
    }
    events
}
