use alloy::primitives::U256;
use skale_common::{BoundType, ContractEvent, Result};
use std::sync::Arc;

use super::{calculation, recalculate_nodes, HandlerContext};
use crate::callers::NodesCaller;
use crate::decode::DecodedLog;
use crate::registry::ContractBinding;

const NODE_ID: &[&str] = &["nodeIndex", "nodeId"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodesEvent {
    Created { node_id: U256 },
    ExitInitialized { node_id: U256 },
    ExitCompleted { node_id: U256 },
}

impl NodesEvent {
    pub fn parse(decoded: &DecodedLog) -> Result<Option<Self>> {
        let event = match decoded.event_name.as_str() {
            "NodeCreated" => Self::Created {
                node_id: decoded.params.uint_any(NODE_ID)?,
            },
            "ExitInitialized" => Self::ExitInitialized {
                node_id: decoded.params.uint_any(NODE_ID)?,
            },
            "ExitCompleted" => Self::ExitCompleted {
                node_id: decoded.params.uint_any(NODE_ID)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn node_id(&self) -> U256 {
        match self {
            Self::Created { node_id } | Self::ExitInitialized { node_id } | Self::ExitCompleted { node_id } => {
                *node_id
            }
        }
    }
}

pub(super) async fn handle(
    ctx: &HandlerContext,
    binding: &Arc<ContractBinding>,
    decoded: &DecodedLog,
    mut event: ContractEvent,
) -> Result<ContractEvent> {
    let Some(parsed) = NodesEvent::parse(decoded)? else {
        tracing::debug!("Untracked nodes event {}", decoded.event_name);
        return Ok(event);
    };
    let node_id = parsed.node_id();

    let caller = NodesCaller::new(ctx.contract(binding));
    let mut node = caller.get_node_with_info(node_id, event.block_height).await?;
    node.event_time = event.time;

    ctx.store.save_node(&node).await?;
    recalculate_nodes(ctx, &calculation(node.validator_id, &event)).await?;

    event.bind(BoundType::Node, vec![node_id], Vec::new());
    Ok(event)
}
