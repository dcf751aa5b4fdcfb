//! Log decoding and helpers for reading ABI values.
//!
//! The untyped parameter map exists only between decoding and handler
//! dispatch; each handler family converts it into its own event enum.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::primitives::{hex, Address, U256};
use skale_common::{IndexerError, Result};
use std::collections::BTreeMap;

use crate::registry::ContractRegistry;
use crate::transport::ChainLog;

#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub event_name: String,
    pub params: EventParams,
}

/// Event parameters keyed by ABI input name
#[derive(Debug, Clone, Default)]
pub struct EventParams(BTreeMap<String, DynSolValue>);

impl EventParams {
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.0.get(name)
    }

    pub fn uint(&self, name: &str) -> Result<U256> {
        let value = self.require(name)?;
        uint(value, name)
    }

    /// First present parameter among `names`, as a uint
    pub fn uint_any(&self, names: &[&str]) -> Result<U256> {
        for name in names {
            if let Some(value) = self.get(name) {
                return uint(value, name);
            }
        }
        Err(IndexerError::InvalidParameter(format!("missing parameter {}", names.join("|"))))
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        let value = self.require(name)?;
        address(value, name)
    }

    fn require(&self, name: &str) -> Result<&DynSolValue> {
        self.get(name)
            .ok_or_else(|| IndexerError::InvalidParameter(format!("missing parameter {}", name)))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        )
    }
}

impl FromIterator<(String, DynSolValue)> for EventParams {
    fn from_iter<T: IntoIterator<Item = (String, DynSolValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Decode a raw log against the registry's event index.
pub fn decode_log(registry: &ContractRegistry, log: &ChainLog) -> Result<DecodedLog> {
    let selector = log
        .topics
        .first()
        .ok_or_else(|| IndexerError::Decode("log has no topics".to_string()))?;
    let schema = registry
        .event_schema_by_id(selector)
        .ok_or_else(|| IndexerError::Decode(format!("unknown event selector {}", selector)))?;

    let decoded = schema
        .event
        .decode_log_parts(log.topics.iter().copied(), &log.data)
        .map_err(|e| IndexerError::Decode(format!("{}: {}", schema.event.name, e)))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut params = BTreeMap::new();
    for (position, input) in schema.event.inputs.iter().enumerate() {
        let value = if input.indexed { indexed.next() } else { body.next() };
        let Some(value) = value else {
            return Err(IndexerError::Decode(format!(
                "{}: missing value for input {}",
                schema.event.name, position
            )));
        };
        let name = if input.name.is_empty() {
            format!("param{}", position)
        } else {
            input.name.clone()
        };
        params.insert(name, value);
    }

    Ok(DecodedLog {
        event_name: schema.event.name.clone(),
        params: EventParams(params),
    })
}

pub fn value_to_json(value: &DynSolValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::Function(f) => Value::String(hex::encode_prefixed(f.as_slice())),
        DynSolValue::Bytes(b) => Value::String(hex::encode_prefixed(b)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Unwrap a call result consisting of a single tuple into its fields.
pub(crate) fn flatten(values: Vec<DynSolValue>) -> Vec<DynSolValue> {
    match <[DynSolValue; 1]>::try_from(values) {
        Ok([DynSolValue::Tuple(fields)]) => fields,
        Ok([single]) => vec![single],
        Err(values) => values,
    }
}

pub(crate) fn field<'a>(values: &'a [DynSolValue], index: usize, name: &str) -> Result<&'a DynSolValue> {
    values
        .get(index)
        .ok_or_else(|| IndexerError::Decode(format!("missing field {} ({})", index, name)))
}

pub(crate) fn uint(value: &DynSolValue, name: &str) -> Result<U256> {
    value
        .as_uint()
        .map(|(u, _)| u)
        .ok_or_else(|| IndexerError::InvalidParameter(format!("{} is not an unsigned integer", name)))
}

pub(crate) fn address(value: &DynSolValue, name: &str) -> Result<Address> {
    value
        .as_address()
        .ok_or_else(|| IndexerError::InvalidParameter(format!("{} is not an address", name)))
}

pub(crate) fn boolean(value: &DynSolValue, name: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| IndexerError::InvalidParameter(format!("{} is not a bool", name)))
}

pub(crate) fn string(value: &DynSolValue, name: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| IndexerError::InvalidParameter(format!("{} is not a string", name)))
}

pub(crate) fn fixed_bytes<'a>(value: &'a DynSolValue, name: &str) -> Result<&'a [u8]> {
    value
        .as_fixed_bytes()
        .map(|(bytes, size)| &bytes[..size])
        .ok_or_else(|| IndexerError::InvalidParameter(format!("{} is not fixed bytes", name)))
}

pub(crate) fn uint_array(value: &DynSolValue, name: &str) -> Result<Vec<U256>> {
    value
        .as_array()
        .ok_or_else(|| IndexerError::InvalidParameter(format!("{} is not an array", name)))?
        .iter()
        .map(|item| uint(item, name))
        .collect()
}
