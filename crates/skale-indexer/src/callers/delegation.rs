use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, B256, U256};
use skale_common::convert::u256_to_u64;
use skale_common::{timestamp_to_datetime, Delegation, DelegationState, Result};

use super::BoundContract;
use crate::decode::{address, field, flatten, string, uint};

pub struct DelegationCaller {
    contract: BoundContract,
}

impl DelegationCaller {
    pub fn new(contract: BoundContract) -> Self {
        Self { contract }
    }

    /// Delegation record at `height`. The state is left as `Unknown`; it
    /// lives behind a separate view.
    pub async fn get_delegation(&self, delegation_id: U256, height: u64) -> Result<Delegation> {
        let values = flatten(
            self.contract
                .call(height, "getDelegation", &[DynSolValue::Uint(delegation_id, 256)])
                .await?,
        );

        Ok(Delegation {
            delegation_id,
            holder: address(field(&values, 0, "holder")?, "holder")?,
            validator_id: uint(field(&values, 1, "validatorId")?, "validatorId")?,
            amount: uint(field(&values, 2, "amount")?, "amount")?,
            delegation_period: uint(field(&values, 3, "delegationPeriod")?, "delegationPeriod")?,
            created: timestamp_to_datetime(u256_to_u64(uint(field(&values, 4, "created")?, "created")?)),
            started: uint(field(&values, 5, "started")?, "started")?,
            finished: uint(field(&values, 6, "finished")?, "finished")?,
            info: string(field(&values, 7, "info")?, "info")?,
            state: DelegationState::Unknown,
            block_height: height,
            transaction_hash: B256::ZERO,
        })
    }

    pub async fn get_delegation_state(&self, delegation_id: U256, height: u64) -> Result<DelegationState> {
        let values = self
            .contract
            .call(height, "getState", &[DynSolValue::Uint(delegation_id, 256)])
            .await?;
        let code = uint(field(&values, 0, "state")?, "state")?;
        Ok(DelegationState::from_code(u256_to_u64(code)))
    }

    pub async fn get_delegation_with_info(&self, delegation_id: U256, height: u64) -> Result<Delegation> {
        let mut delegation = self.get_delegation(delegation_id, height).await?;
        delegation.state = self.get_delegation_state(delegation_id, height).await?;
        Ok(delegation)
    }

    pub async fn get_holder_delegations(&self, holder: Address, height: u64) -> Result<Vec<Delegation>> {
        let holder_arg = DynSolValue::Address(holder);
        let length = self
            .read_uint(height, "getDelegationsByHolderLength", &[holder_arg.clone()])
            .await?;

        let mut delegations = Vec::new();
        for index in 0..u256_to_u64(length) {
            let id = self
                .read_uint(
                    height,
                    "delegationsByHolder",
                    &[holder_arg.clone(), DynSolValue::Uint(U256::from(index), 256)],
                )
                .await?;
            delegations.push(self.get_delegation_with_info(id, height).await?);
        }
        Ok(delegations)
    }

    /// Number of delegations ever made by `holder`
    pub async fn get_holder_delegation_count(&self, holder: Address, height: u64) -> Result<U256> {
        self.read_uint(height, "getDelegationsByHolderLength", &[DynSolValue::Address(holder)])
            .await
    }

    pub async fn get_validator_delegations(&self, validator_id: U256, height: u64) -> Result<Vec<Delegation>> {
        let validator_arg = DynSolValue::Uint(validator_id, 256);
        let length = self
            .read_uint(height, "getDelegationsByValidatorLength", &[validator_arg.clone()])
            .await?;

        let mut delegations = Vec::new();
        for index in 0..u256_to_u64(length) {
            let id = self
                .read_uint(
                    height,
                    "delegationsByValidator",
                    &[validator_arg.clone(), DynSolValue::Uint(U256::from(index), 256)],
                )
                .await?;
            delegations.push(self.get_delegation_with_info(id, height).await?);
        }
        Ok(delegations)
    }

    /// Tokens of `holder` locked in delegations that are still proposed
    pub async fn get_pending_delegations_tokens(&self, holder: Address, height: u64) -> Result<U256> {
        self.read_uint(height, "getLockedInPendingDelegations", &[DynSolValue::Address(holder)])
            .await
    }

    async fn read_uint(&self, height: u64, method: &str, args: &[DynSolValue]) -> Result<U256> {
        let values = self.contract.call(height, method, args).await?;
        uint(field(&values, 0, method)?, method)
    }
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

    fn caller(transport: Arc<MockTransport>) -> DelegationCaller {
        let view = Arc::new(ViewCaller::new(transport, NodeMode::Archive, DEFAULT_VIEW_TIMEOUT));
        DelegationCaller::new(view.bind(Arc::new(testing::binding(ContractName::DelegationController))))
    }

    #[tokio::test]
    async fn test_get_delegation_leaves_state_unknown() {
        let transport = Arc::new(MockTransport::new());
        let holder = Address::repeat_byte(0xaa);
        respond_delegation(&transport, 42, holder, 7, 100, DelegationState::Proposed);
        let caller = caller(transport);

        let delegation = caller.get_delegation(U256::from(42u64), 10).await.unwrap();
        assert_eq!(delegation.holder, holder);
        assert_eq!(delegation.validator_id, U256::from(7u64));
        assert_eq!(delegation.amount, U256::from(100u64));
        assert_eq!(delegation.state, DelegationState::Unknown);

        let state = caller.get_delegation_state(U256::from(42u64), 10).await.unwrap();
        assert_eq!(state, DelegationState::Proposed);
    }

    #[tokio::test]
    async fn test_holder_delegations_enumerates_length() {
        let transport = Arc::new(MockTransport::new());
        let holder = Address::repeat_byte(0xaa);
        respond_delegation(&transport, 1, holder, 7, 100, DelegationState::Delegated);
        respond_delegation(&transport, 5, holder, 8, 300, DelegationState::Proposed);
        respond_holder_delegations(&transport, holder, &[1, 5]);

        let delegations = caller(transport).get_holder_delegations(holder, 10).await.unwrap();
        let ids: Vec<U256> = delegations.iter().map(|d| d.delegation_id).collect();
        assert_eq!(ids, vec![U256::from(1u64), U256::from(5u64)]);
        assert_eq!(delegations[0].state, DelegationState::Delegated);
    }

    #[tokio::test]
    async fn test_holder_without_delegations() {
        let transport = Arc::new(MockTransport::new());
        let holder = Address::repeat_byte(0xbb);
        respond_holder_delegations(&transport, holder, &[]);
        let delegations = caller(transport).get_holder_delegations(holder, 10).await.unwrap();
        assert!(delegations.is_empty());
    }

    #[tokio::test]
    async fn test_holder_delegation_count_reads_length_only() {
        let transport = Arc::new(MockTransport::new());
        let holder = Address::repeat_byte(0xcc);
        respond_holder_delegations(&transport, holder, &[4, 9, 11]);

        let count = caller(transport.clone())
            .get_holder_delegation_count(holder, 10)
            .await
            .unwrap();
        assert_eq!(count, U256::from(3u64));
        assert_eq!(transport.calls().len(), 1);
    }
}
