use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, U256};
use skale_common::Result;

use super::BoundContract;
use crate::decode::{field, uint};

/// ERC20/777 token views
pub struct TokenCaller {
    contract: BoundContract,
}

impl TokenCaller {
    pub fn new(contract: BoundContract) -> Self {
        Self { contract }
    }

    pub async fn balance_of(&self, holder: Address, height: u64) -> Result<U256> {
        let values = self
            .contract
            .call(height, "balanceOf", &[DynSolValue::Address(holder)])
            .await?;
        uint(field(&values, 0, "balance")?, "balance")
    }

    pub async fn total_supply(&self, height: u64) -> Result<U256> {
        let values = self.contract.call(height, "totalSupply", &[]).await?;
        uint(field(&values, 0, "totalSupply")?, "totalSupply")
    }
}
