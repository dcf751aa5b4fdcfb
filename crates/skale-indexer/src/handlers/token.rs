use alloy::primitives::{Address, U256};
use skale_common::{Account, AccountType, BoundType, ContractEvent, Result};

use super::HandlerContext;
use crate::decode::DecodedLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    Transfer { from: Address, to: Address, value: U256 },
    Approval { owner: Address, spender: Address, value: U256 },
}

impl TokenEvent {
    pub fn parse(decoded: &DecodedLog) -> Result<Option<Self>> {
        let params = &decoded.params;
        let event = match decoded.event_name.as_str() {
            "Transfer" => Self::Transfer {
                from: params.address("from")?,
                to: params.address("to")?,
                value: params.uint("value")?,
            },
            "Approval" => Self::Approval {
                owner: params.address("owner")?,
                spender: params.address("spender")?,
                value: params.uint("value")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Binds the involved addresses and registers each as a default account.
/// Mint and burn counterparts (the zero address) are not accounts.
pub(super) async fn handle(
    ctx: &HandlerContext,
    decoded: &DecodedLog,
    mut event: ContractEvent,
) -> Result<ContractEvent> {
    let (first, second) = match TokenEvent::parse(decoded)? {
        Some(TokenEvent::Transfer { from, to, .. }) => (from, to),
        Some(TokenEvent::Approval { owner, spender, .. }) => (owner, spender),
        None => {
            tracing::debug!("Skipping token event {} at block {}", decoded.event_name, event.block_height);
            return Ok(event);
        }
    };

    event.bind(BoundType::Account, Vec::new(), vec![first, second]);
    for address in [first, second] {
        if address != Address::ZERO {
            ctx.store
                .save_account(&Account::new(address, AccountType::Default))
                .await?;
        }
    }
    Ok(event)
}
