use alloy::dyn_abi::DynSolValue;
use alloy::primitives::U256;
use skale_common::Result;

use super::BoundContract;
use crate::decode::{field, flatten, uint};

pub struct DistributorCaller {
    contract: BoundContract,
}

impl DistributorCaller {
    pub fn new(contract: BoundContract) -> Self {
        Self { contract }
    }

    /// Fee earned by a validator and the month it is accounted up to
    pub async fn get_earned_fee_amount_of(&self, validator_id: U256, height: u64) -> Result<(U256, U256)> {
        let values = flatten(
            self.contract
                .call(height, "getEarnedFeeAmountOf", &[DynSolValue::Uint(validator_id, 256)])
                .await?,
        );
        let earned = uint(field(&values, 0, "earned")?, "earned")?;
        let end_month = uint(field(&values, 1, "endMonth")?, "endMonth")?;
        Ok((earned, end_month))
    }
}
