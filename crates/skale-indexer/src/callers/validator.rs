use alloy::dyn_abi::DynSolValue;
use alloy::primitives::U256;
use skale_common::convert::u256_to_u64;
use skale_common::{timestamp_to_datetime, Result, Validator};

use super::BoundContract;
use crate::decode::{address, boolean, field, flatten, string, uint};

pub struct ValidatorServiceCaller {
    contract: BoundContract,
}

impl ValidatorServiceCaller {
    pub fn new(contract: BoundContract) -> Self {
        Self { contract }
    }

    /// Validator tuple at `height`. `authorized` and the denormalised counters
    /// are left at their defaults.
    pub async fn get_validator(&self, validator_id: U256, height: u64) -> Result<Validator> {
        let values = flatten(
            self.contract
                .call(height, "getValidator", &[DynSolValue::Uint(validator_id, 256)])
                .await?,
        );

        Ok(Validator {
            validator_id,
            name: string(field(&values, 0, "name")?, "name")?,
            validator_address: address(field(&values, 1, "validatorAddress")?, "validatorAddress")?,
            requested_address: address(field(&values, 2, "requestedAddress")?, "requestedAddress")?,
            description: string(field(&values, 3, "description")?, "description")?,
            fee_rate: uint(field(&values, 4, "feeRate")?, "feeRate")?,
            registration_time: timestamp_to_datetime(u256_to_u64(uint(
                field(&values, 5, "registrationTime")?,
                "registrationTime",
            )?)),
            minimum_delegation_amount: uint(
                field(&values, 6, "minimumDelegationAmount")?,
                "minimumDelegationAmount",
            )?,
            accept_new_requests: boolean(field(&values, 7, "acceptNewRequests")?, "acceptNewRequests")?,
            authorized: false,
            active_nodes: U256::ZERO,
            linked_nodes: U256::ZERO,
            staked: U256::ZERO,
            block_height: height,
        })
    }

    pub async fn is_authorized_validator(&self, validator_id: U256, height: u64) -> Result<bool> {
        let values = self
            .contract
            .call(height, "isAuthorizedValidator", &[DynSolValue::Uint(validator_id, 256)])
            .await?;
        boolean(field(&values, 0, "authorized")?, "authorized")
    }

    pub async fn get_validator_with_info(&self, validator_id: U256, height: u64) -> Result<Validator> {
        let mut validator = self.get_validator(validator_id, height).await?;
        validator.authorized = self.is_authorized_validator(validator_id, height).await?;
        Ok(validator)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::callers::{NodeMode, ViewCaller, DEFAULT_VIEW_TIMEOUT};
    use crate::testing;
    use crate::transport::mock::MockTransport;
    use skale_common::{ContractName, IndexerError};
    use std::sync::Arc;

    fn caller(transport: Arc<MockTransport>) -> ValidatorServiceCaller {
        let view = Arc::new(ViewCaller::new(transport, NodeMode::Archive, DEFAULT_VIEW_TIMEOUT));
        ValidatorServiceCaller::new(view.bind(Arc::new(testing::binding(ContractName::ValidatorService))))
    }

    #[tokio::test]
    async fn test_get_validator_with_info() {
        let transport = Arc::new(MockTransport::new());
        let fixture = ValidatorFixture::new(3);
        respond_validator(&transport, &fixture);

        let validator = caller(transport).get_validator_with_info(U256::from(3u64), 120).await.unwrap();
        assert_eq!(validator.validator_id, U256::from(3u64));
        assert_eq!(validator.name, "validator");
        assert_eq!(validator.validator_address, fixture.address);
        assert_eq!(validator.fee_rate, U256::from(50u64));
        assert_eq!(validator.minimum_delegation_amount, U256::from(100u64));
        assert!(validator.accept_new_requests);
        assert!(validator.authorized);
        assert_eq!(validator.block_height, 120);
        assert_eq!(validator.registration_time.timestamp(), 1_600_000_000);
    }

    #[tokio::test]
    async fn test_missing_validator_is_empty_response() {
        let transport = Arc::new(MockTransport::new());
        let err = caller(transport).get_validator(U256::from(9u64), 1).await.unwrap_err();
        assert!(matches!(err, IndexerError::EmptyResponse));
    }
}
