use alloy::primitives::{Address, U256};
use skale_common::{BoundType, ContractEvent, Result, RewardClaim};

use super::HandlerContext;
use crate::decode::DecodedLog;

const WITHDRAW_BOUNTY: &str = "WithdrawBounty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributorEvent {
    WithdrawBounty {
        holder: Address,
        validator_id: U256,
        destination: Address,
        amount: U256,
    },
    /// Any other distributor event scoped to a validator
    Validator { validator_id: U256 },
}

impl DistributorEvent {
    pub fn parse(decoded: &DecodedLog) -> Result<Option<Self>> {
        let params = &decoded.params;
        if decoded.event_name == WITHDRAW_BOUNTY {
            return Ok(Some(Self::WithdrawBounty {
                holder: params.address("holder")?,
                validator_id: params.uint("validatorId")?,
                destination: params.address("destination")?,
                amount: params.uint("amount")?,
            }));
        }
        if params.get("validatorId").is_some() {
            return Ok(Some(Self::Validator {
                validator_id: params.uint("validatorId")?,
            }));
        }
        Ok(None)
    }
}

/// Additive bookkeeping only: annotations and the holder's claimed rewards.
pub(super) async fn handle(
    ctx: &HandlerContext,
    decoded: &DecodedLog,
    mut event: ContractEvent,
) -> Result<ContractEvent> {
    match DistributorEvent::parse(decoded)? {
        Some(DistributorEvent::WithdrawBounty {
            holder,
            validator_id,
            amount,
            ..
        }) => {
            event.bind(BoundType::Delegator, vec![validator_id], vec![holder]);
            ctx.store
                .record_reward_claim(&RewardClaim {
                    holder,
                    block_height: event.block_height,
                    log_index: event.log_index,
                    block_time: event.time,
                    amount,
                })
                .await?;
        }
        Some(DistributorEvent::Validator { validator_id }) => {
            event.bind(BoundType::Validator, vec![validator_id], Vec::new());
        }
        None => {}
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fixtures::Harness;
    use crate::store::Store;
    use crate::testing;
    use alloy::dyn_abi::DynSolValue;
    use skale_common::{ContractName, DelegatorStatisticParams};

    fn withdraw(holder: Address, amount: u64, block: u64, index: u64) -> crate::transport::ChainLog {
        testing::log(
            ContractName::Distributor,
            WITHDRAW_BOUNTY,
            &[
                DynSolValue::Address(holder),
                testing::uint(7),
                DynSolValue::Address(holder),
                testing::uint(amount),
            ],
            block,
            index,
        )
    }

    async fn claimed(harness: &Harness, holder: Address) -> Vec<(u64, U256)> {
        harness
            .store
            .get_delegator_statistics(&DelegatorStatisticParams {
                holder: Some(holder),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.block_height, r.amount))
            .collect()
    }

    #[tokio::test]
    async fn test_withdraw_bounty_accumulates_claimed_rewards() {
        let harness = Harness::new();
        let holder = Address::repeat_byte(0x0a);

        for (amount, block) in [(100, 10), (50, 20)] {
            let event = harness.dispatch(withdraw(holder, amount, block, 0)).await.unwrap();
            assert_eq!(event.bound_type, Some(BoundType::Delegator));
            assert_eq!(event.bound_ids, vec![U256::from(7u64)]);
            assert_eq!(event.bound_addresses, vec![holder]);
        }

        assert_eq!(
            claimed(&harness, holder).await,
            vec![(10, U256::from(100u64)), (20, U256::from(150u64))]
        );
    }

    #[tokio::test]
    async fn test_withdrawals_handled_out_of_order() {
        let harness = Harness::new();
        let holder = Address::repeat_byte(0x0a);

        harness.dispatch(withdraw(holder, 50, 20, 0)).await.unwrap();
        harness.dispatch(withdraw(holder, 100, 10, 0)).await.unwrap();
        harness.dispatch(withdraw(holder, 25, 10, 4)).await.unwrap();

        assert_eq!(
            claimed(&harness, holder).await,
            vec![(10, U256::from(125u64)), (20, U256::from(175u64))]
        );
    }

    #[tokio::test]
    async fn test_concurrent_withdrawals_all_counted() {
        let harness = Harness::new();
        let holder = Address::repeat_byte(0x0a);

        let (a, b, c) = tokio::join!(
            harness.dispatch(withdraw(holder, 10, 30, 0)),
            harness.dispatch(withdraw(holder, 20, 10, 0)),
            harness.dispatch(withdraw(holder, 30, 20, 0)),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(
            claimed(&harness, holder).await,
            vec![
                (10, U256::from(20u64)),
                (20, U256::from(50u64)),
                (30, U256::from(60u64)),
            ]
        );
    }

    #[tokio::test]
    async fn test_replayed_withdrawal_is_not_double_counted() {
        let harness = Harness::new();
        let holder = Address::repeat_byte(0x0a);

        harness.dispatch(withdraw(holder, 100, 10, 0)).await.unwrap();
        harness.dispatch(withdraw(holder, 100, 10, 0)).await.unwrap();

        assert_eq!(claimed(&harness, holder).await, vec![(10, U256::from(100u64))]);
    }

    #[tokio::test]
    async fn test_withdraw_fee_binds_validator() {
        let harness = Harness::new();
        let log = testing::log(
            ContractName::Distributor,
            "WithdrawFee",
            &[testing::uint(9), DynSolValue::Address(Address::repeat_byte(1)), testing::uint(3)],
            10,
            0,
        );
        let event = harness.dispatch(log).await.unwrap();
        assert_eq!(event.bound_type, Some(BoundType::Validator));
        assert_eq!(event.bound_ids, vec![U256::from(9u64)]);
    }
}
