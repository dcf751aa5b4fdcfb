use alloy::dyn_abi::DynSolValue;
use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use skale_common::convert::u256_to_u64;
use skale_common::{timestamp_to_datetime, IndexerError, Node, NodeStatus, Result};
use std::net::Ipv4Addr;

use super::BoundContract;
use crate::decode::{field, fixed_bytes, flatten, string, uint, uint_array};

pub struct NodesCaller {
    contract: BoundContract,
}

impl NodesCaller {
    pub fn new(contract: BoundContract) -> Self {
        Self { contract }
    }

    /// Node record at `height`, including its next reward date. `event_time`
    /// is left at the epoch for the caller to stamp.
    pub async fn get_node(&self, node_id: U256, height: u64) -> Result<Node> {
        let values = flatten(
            self.contract
                .call(height, "nodes", &[DynSolValue::Uint(node_id, 256)])
                .await?,
        );

        let port = uint(field(&values, 3, "port")?, "port")?;
        let status = u256_to_u64(uint(field(&values, 7, "status")?, "status")?);

        Ok(Node {
            node_id,
            name: string(field(&values, 0, "name")?, "name")?,
            ip: ipv4(fixed_bytes(field(&values, 1, "ip")?, "ip")?)?,
            public_ip: ipv4(fixed_bytes(field(&values, 2, "publicIP")?, "publicIP")?)?,
            port: u16::try_from(u256_to_u64(port))
                .map_err(|_| IndexerError::Decode(format!("port {} out of range", port)))?,
            start_block: uint(field(&values, 4, "startBlock")?, "startBlock")?,
            next_reward_date: self.get_node_next_reward_date(node_id, height).await?,
            last_reward_date: time(field(&values, 5, "lastRewardDate")?, "lastRewardDate")?,
            finish_time: time(field(&values, 6, "finishTime")?, "finishTime")?,
            status: NodeStatus::from_code(status)?,
            validator_id: uint(field(&values, 8, "validatorId")?, "validatorId")?,
            event_time: DateTime::<Utc>::default(),
            block_height: height,
        })
    }

    pub async fn get_node_with_info(&self, node_id: U256, height: u64) -> Result<Node> {
        self.get_node(node_id, height).await
    }

    pub async fn get_node_next_reward_date(&self, node_id: U256, height: u64) -> Result<DateTime<Utc>> {
        let values = self
            .contract
            .call(height, "getNodeNextRewardDate", &[DynSolValue::Uint(node_id, 256)])
            .await?;
        time(field(&values, 0, "nextRewardDate")?, "nextRewardDate")
    }

    pub async fn get_validator_nodes(&self, validator_id: U256, height: u64) -> Result<Vec<Node>> {
        let values = self
            .contract
            .call(height, "getValidatorNodeIndexes", &[DynSolValue::Uint(validator_id, 256)])
            .await?;
        let indexes = uint_array(field(&values, 0, "nodeIndexes")?, "nodeIndexes")?;

        let mut nodes = Vec::with_capacity(indexes.len());
        for node_id in indexes {
            nodes.push(self.get_node(node_id, height).await?);
        }
        Ok(nodes)
    }
}

fn time(value: &DynSolValue, name: &str) -> Result<DateTime<Utc>> {
    Ok(timestamp_to_datetime(u256_to_u64(uint(value, name)?)))
}

fn ipv4(bytes: &[u8]) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = bytes
        .try_into()
        .map_err(|_| IndexerError::Decode(format!("expected 4 address bytes, got {}", bytes.len())))?;
    Ok(Ipv4Addr::from(octets))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::callers::{NodeMode, ViewCaller, DEFAULT_VIEW_TIMEOUT};
    use crate::testing;
    use crate::transport::mock::MockTransport;
    use skale_common::ContractName;
    use std::sync::Arc;

    fn caller(transport: Arc<MockTransport>) -> NodesCaller {
        let view = Arc::new(ViewCaller::new(transport, NodeMode::Archive, DEFAULT_VIEW_TIMEOUT));
        NodesCaller::new(view.bind(Arc::new(testing::binding(ContractName::Nodes))))
    }

    #[tokio::test]
    async fn test_get_node() {
        let transport = Arc::new(MockTransport::new());
        respond_node(&transport, 4, 7, NodeStatus::Leaving);

        let node = caller(transport).get_node(U256::from(4u64), 50).await.unwrap();
        assert_eq!(node.name, "node-4");
        assert_eq!(node.ip, Ipv4Addr::new(10, 0, 0, 4));
        assert_eq!(node.port, 10_000);
        assert_eq!(node.status, NodeStatus::Leaving);
        assert_eq!(node.validator_id, U256::from(7u64));
        assert_eq!(node.next_reward_date.timestamp(), 1_602_592_000);
        assert_eq!(node.block_height, 50);
    }

    #[tokio::test]
    async fn test_get_validator_nodes() {
        let transport = Arc::new(MockTransport::new());
        respond_node(&transport, 1, 7, NodeStatus::Active);
        respond_node(&transport, 2, 7, NodeStatus::Left);
        respond_validator_nodes(&transport, 7, &[1, 2]);

        let nodes = caller(transport).get_validator_nodes(U256::from(7u64), 50).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].status, NodeStatus::Left);
    }

    #[test]
    fn test_ipv4_needs_four_bytes() {
        assert_eq!(ipv4(&[127, 0, 0, 1]).unwrap(), Ipv4Addr::LOCALHOST);
        assert!(ipv4(&[1, 2, 3]).is_err());
    }
}
