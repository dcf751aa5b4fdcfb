use alloy::primitives::{Address, U256};
use skale_common::{BoundType, ContractEvent, Result, SystemEvent, SystemEventKind};

use super::HandlerContext;
use crate::decode::DecodedLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunisherEvent {
    Slash { validator_id: U256, amount: U256 },
    Forgive { wallet: Address, amount: U256 },
}

impl PunisherEvent {
    pub fn parse(decoded: &DecodedLog) -> Result<Option<Self>> {
        let params = &decoded.params;
        let event = match decoded.event_name.as_str() {
            "Slash" => Self::Slash {
                validator_id: params.uint("validatorId")?,
                amount: params.uint("amount")?,
            },
            "Forgive" => Self::Forgive {
                wallet: params.address("wallet")?,
                amount: params.uint("amount")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Annotation plus a derived system event; nothing is refetched.
pub(super) async fn handle(
    ctx: &HandlerContext,
    decoded: &DecodedLog,
    mut event: ContractEvent,
) -> Result<ContractEvent> {
    let Some(parsed) = PunisherEvent::parse(decoded)? else {
        return Ok(event);
    };

    let system_event = match parsed {
        PunisherEvent::Slash { validator_id, amount } => {
            event.bind(BoundType::Validator, vec![validator_id], Vec::new());
            SystemEvent::new(event.block_height, event.time, SystemEventKind::Slashed)
                .with_recipient(validator_id, Address::ZERO)
                .with_values(U256::ZERO, amount)
        }
        PunisherEvent::Forgive { wallet, amount } => {
            event.bind(BoundType::Account, Vec::new(), vec![wallet]);
            SystemEvent::new(event.block_height, event.time, SystemEventKind::Forgiven)
                .with_recipient(U256::ZERO, wallet)
                .with_values(U256::ZERO, amount)
        }
    };
    ctx.store.save_system_event(&system_event).await?;

    Ok(event)
}
