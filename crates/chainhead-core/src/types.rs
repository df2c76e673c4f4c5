//! Block headers and the block marker the tracker persists.

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TrackerError;

// ─── BlockMarker ──────────────────────────────────────────────────────────────

/// The highest block the node has seen: height plus hash.
///
/// Heights are arbitrary precision. `digits` is the length of the decimal
/// rendering of `number`, kept so that text-backed stores can order heights
/// without numeric columns wide enough to hold them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarker {
    pub number: BigUint,
    pub hash: String,
    pub digits: usize,
}

impl BlockMarker {
    pub fn new(number: impl Into<BigUint>, hash: impl Into<String>) -> Self {
        let number = number.into();
        let digits = number.to_str_radix(10).len();
        Self {
            number,
            hash: hash.into(),
            digits,
        }
    }

    /// Compare two markers by height only.
    pub fn cmp_height(&self, other: &BlockMarker) -> Ordering {
        self.number.cmp(&other.number)
    }

    /// Returns `true` if `self` is strictly higher than `other`.
    pub fn is_higher_than(&self, other: &BlockMarker) -> bool {
        self.cmp_height(other) == Ordering::Greater
    }

    /// Decimal rendering of the height.
    pub fn number_string(&self) -> String {
        self.number.to_str_radix(10)
    }

    /// Height as `u64`, if it fits.
    pub fn as_u64(&self) -> Option<u64> {
        u64::try_from(&self.number).ok()
    }
}

impl fmt::Display for BlockMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.number)
    }
}

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// A new-head notification as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: BigUint,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: u64,
}

impl BlockHeader {
    /// Parse an Ethereum `newHeads` notification payload.
    pub fn from_json(value: &Value) -> Result<Self, TrackerError> {
        let number = parse_quantity(field(value, "number")?)?;
        let timestamp = match value.get("timestamp").and_then(Value::as_str) {
            Some(ts) => u64::try_from(&parse_quantity(ts)?)
                .map_err(|_| TrackerError::Decode(format!("timestamp out of range: {ts}")))?,
            None => 0,
        };
        Ok(Self {
            number,
            hash: field(value, "hash")?.to_string(),
            parent_hash: value
                .get("parentHash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            timestamp,
        })
    }

    /// The marker this header advances the tracker to.
    pub fn marker(&self) -> BlockMarker {
        BlockMarker::new(self.number.clone(), self.hash.clone())
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a str, TrackerError> {
    value
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| TrackerError::Decode(format!("header missing '{name}'")))
}

/// Parse a `0x`-prefixed hex quantity of any width.
pub fn parse_quantity(s: &str) -> Result<BigUint, TrackerError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| TrackerError::Decode(format!("quantity '{s}' is not 0x-prefixed")))?;
    if digits.is_empty() {
        return Err(TrackerError::Decode("empty hex quantity".into()));
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| TrackerError::Decode(format!("invalid hex quantity '{s}'")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
