//! Canonical decimal representation of chain integers.
//!
//! Ids, amounts and addresses are persisted as `NUMERIC(78,0)`. Addresses are
//! stored as the integer formed by left-padding the 20 address bytes to 32.

use alloy::primitives::{Address, B256, U256};
use bigdecimal::num_bigint::Sign;
use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::error::IndexerError;

pub fn u256_to_decimal(value: U256) -> BigDecimal {
    // U256's Display is plain base-10, which BigDecimal always accepts
    BigDecimal::from_str(&value.to_string()).unwrap_or_default()
}

pub fn decimal_to_u256(value: &BigDecimal) -> Result<U256, IndexerError> {
    let (digits, scale) = value.normalized().as_bigint_and_exponent();
    if digits.sign() == Sign::Minus {
        return Err(IndexerError::Decode(format!("negative chain integer {}", value)));
    }
    if scale > 0 {
        return Err(IndexerError::Decode(format!("fractional chain integer {}", value)));
    }
    let mut plain = digits.to_string();
    plain.extend(std::iter::repeat('0').take((-scale) as usize));
    U256::from_str_radix(&plain, 10)
        .map_err(|e| IndexerError::Decode(format!("chain integer {} out of range: {}", value, e)))
}

pub fn address_to_u256(address: Address) -> U256 {
    U256::from_be_slice(address.into_word().as_slice())
}

pub fn address_to_decimal(address: Address) -> BigDecimal {
    u256_to_decimal(address_to_u256(address))
}

pub fn decimal_to_address(value: &BigDecimal) -> Result<Address, IndexerError> {
    let word = B256::from(decimal_to_u256(value)?.to_be_bytes::<32>());
    if word[..12].iter().any(|b| *b != 0) {
        return Err(IndexerError::Decode(format!("{} does not fit in an address", value)));
    }
    Ok(Address::from_word(word))
}

/// Saturating narrowing used for counters and heights read back from NUMERIC columns.
pub fn u256_to_u64(value: U256) -> u64 {
    value.try_into().unwrap_or(u64::MAX)
}
