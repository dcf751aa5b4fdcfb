//! Per-family event handlers.
//!
//! A handler converts the decoded parameter map into its family's event enum,
//! refetches the entities the event touches at the event height, persists
//! them and returns the raw event annotated with its bound entities. The
//! caller persists that event only when the handler succeeds.

mod delegation;
mod distributor;
mod nodes;
mod punisher;
mod token;
mod validator;

pub use delegation::DelegationEvent;
pub use distributor::DistributorEvent;
pub use nodes::NodesEvent;
pub use punisher::PunisherEvent;
pub use token::TokenEvent;
pub use validator::ValidatorServiceEvent;

use alloy::primitives::U256;
use skale_common::{CalculationParams, ContractEvent, ContractName, IndexerError, Result};
use std::sync::Arc;

use crate::callers::{BoundContract, ViewCaller};
use crate::decode::DecodedLog;
use crate::registry::{ContractBinding, ContractRegistry};
use crate::store::Store;

/// Everything a handler needs, shared by all scrape workers
pub struct HandlerContext {
    pub store: Arc<dyn Store>,
    pub registry: Arc<ContractRegistry>,
    pub view: Arc<ViewCaller>,
}

impl HandlerContext {
    pub fn new(store: Arc<dyn Store>, registry: Arc<ContractRegistry>, view: Arc<ViewCaller>) -> Self {
        Self { store, registry, view }
    }

    fn contract(&self, binding: &Arc<ContractBinding>) -> BoundContract {
        self.view.bind(Arc::clone(binding))
    }

    /// The `name` contract deployed alongside `binding`. Sibling calls never
    /// cross versions.
    fn sibling(&self, binding: &ContractBinding, name: ContractName) -> Result<BoundContract> {
        let sibling = self
            .registry
            .resolve_by_name_version(name, &binding.version)
            .ok_or_else(|| {
                IndexerError::NotFound(format!("{} {} is not registered", name, binding.version))
            })?;
        Ok(self.view.bind(sibling))
    }
}

/// Route an event to its family handler.
pub async fn handle(
    ctx: &HandlerContext,
    binding: &Arc<ContractBinding>,
    decoded: &DecodedLog,
    event: ContractEvent,
) -> Result<ContractEvent> {
    match binding.name {
        ContractName::ValidatorService => validator::handle(ctx, binding, decoded, event).await,
        ContractName::Nodes => nodes::handle(ctx, binding, decoded, event).await,
        ContractName::DelegationController => delegation::handle(ctx, binding, decoded, event).await,
        ContractName::Punisher => punisher::handle(ctx, decoded, event).await,
        ContractName::SkaleToken => token::handle(ctx, decoded, event).await,
        ContractName::Distributor => distributor::handle(ctx, decoded, event).await,
        // raw persistence only
        ContractName::SkaleManager | ContractName::Bounty | ContractName::BountyV2 => Ok(event),
    }
}

fn calculation(validator_id: U256, event: &ContractEvent) -> CalculationParams {
    CalculationParams {
        validator_id,
        block_height: event.block_height,
        block_time: event.time,
    }
}

async fn recalculate_nodes(ctx: &HandlerContext, params: &CalculationParams) -> Result<()> {
    ctx.store.calculate_active_nodes(params).await?;
    ctx.store.calculate_linked_nodes(params).await?;
    Ok(())
}
