//! The attribute value model: the tagged union used on the wire and in
//! storage, typed comparison, set algebra, and exact decimal arithmetic.
//!
//! Values are stored as their canonical JSON encoding, so a record read
//! back from disk is byte-identical in meaning to what the client sent.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StorageError};

/// Maximum significant digits an arithmetic result may carry.
const MAX_NUMBER_DIGITS: u64 = 38;

/// A single attribute value, tagged with its wire type.
///
/// Exactly one tag is set per value; the externally-tagged serde encoding
/// preserves this on the wire (`{"S":"abc"}`, `{"N":"3.14"}`, ...).
/// Unknown tags and multi-tag objects fail deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number, kept as the caller's decimal string.
    N(String),
    /// Binary, base64-encoded.
    B(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    /// String set. Element order is irrelevant on the wire.
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    /// Number set.
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    /// Binary set (base64 elements).
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
    /// Ordered list.
    L(Vec<AttributeValue>),
    /// Nested mapping.
    M(BTreeMap<String, AttributeValue>),
}

/// A stored item: attribute name to value. Insertion order is irrelevant.
pub type Record = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    /// The raw string of an `S` or `N` value — the two types allowed as
    /// key attributes. Returns `None` for everything else.
    pub fn key_string(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) => Some(s),
            _ => None,
        }
    }

    /// Short tag name for error messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::StringSet(_) => "SS",
            AttributeValue::NumberSet(_) => "NS",
            AttributeValue::BinarySet(_) => "BS",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(
            self,
            AttributeValue::StringSet(_)
                | AttributeValue::NumberSet(_)
                | AttributeValue::BinarySet(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Record (un)marshalling
// ---------------------------------------------------------------------------

/// Serialize a record to its stored JSON bytes.
pub fn marshal_record(record: &Record) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StorageError::Corrupt(e).into())
}

/// Deserialize a record from stored JSON bytes.
pub fn unmarshal_record(bytes: &[u8]) -> Result<Record> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt(e).into())
}

// ---------------------------------------------------------------------------
// Typed comparison
// ---------------------------------------------------------------------------

/// Compare two scalar values of the same type.
///
/// Numbers compare by exact decimal value, strings by Unicode code points,
/// binary by raw bytes. Any other pairing is a validation error.
pub fn compare(a: &AttributeValue, b: &AttributeValue) -> Result<Ordering> {
    match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Ok(x.cmp(y)),
        (AttributeValue::N(x), AttributeValue::N(y)) => {
            Ok(parse_number(x)?.cmp(&parse_number(y)?))
        }
        (AttributeValue::B(x), AttributeValue::B(y)) => {
            Ok(decode_binary(x)?.cmp(&decode_binary(y)?))
        }
        _ => Err(Error::validation(format!(
            "cannot compare {} with {}",
            a.type_label(),
            b.type_label()
        ))),
    }
}

/// Decode a base64 `B` payload to raw bytes.
pub fn decode_binary(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|_| Error::validation("invalid base64 in binary value"))
}

// ---------------------------------------------------------------------------
// Decimal numbers
// ---------------------------------------------------------------------------

/// Parse a decimal string, rejecting anything `N` cannot carry.
pub fn parse_number(text: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(text.trim())
        .map_err(|_| Error::validation(format!("invalid number: {text}")))
}

/// Exact decimal addition. The result is trimmed of trailing zeros and
/// capped at 38 significant digits.
pub fn add_numbers(a: &str, b: &str) -> Result<String> {
    render_number(parse_number(a)? + parse_number(b)?)
}

/// Exact decimal subtraction with the same bounds as [`add_numbers`].
pub fn subtract_numbers(a: &str, b: &str) -> Result<String> {
    render_number(parse_number(a)? - parse_number(b)?)
}

fn render_number(value: BigDecimal) -> Result<String> {
    let normalized = value.normalized();
    if normalized.digits() > MAX_NUMBER_DIGITS {
        return Err(Error::validation(format!(
            "number overflows {MAX_NUMBER_DIGITS} significant digits"
        )));
    }
    Ok(normalized.to_string())
}

// ---------------------------------------------------------------------------
// Set algebra
// ---------------------------------------------------------------------------

/// Union a set value with new elements of the same set type.
///
/// With no current value the addition stands alone. Duplicates collapse;
/// the result is sorted so repeated unions are deterministic.
pub fn union_sets(current: Option<&AttributeValue>, add: &AttributeValue) -> Result<AttributeValue> {
    match (current, add) {
        (None, _) if add.is_set() => Ok(sorted_set(add)),
        (Some(AttributeValue::StringSet(cur)), AttributeValue::StringSet(more)) => {
            Ok(AttributeValue::StringSet(merge(cur, more)))
        }
        (Some(AttributeValue::NumberSet(cur)), AttributeValue::NumberSet(more)) => {
            Ok(AttributeValue::NumberSet(merge(cur, more)))
        }
        (Some(AttributeValue::BinarySet(cur)), AttributeValue::BinarySet(more)) => {
            Ok(AttributeValue::BinarySet(merge(cur, more)))
        }
        (Some(cur), _) => Err(Error::validation(format!(
            "set union requires matching set types, got {} and {}",
            cur.type_label(),
            add.type_label()
        ))),
        (None, _) => Err(Error::validation(format!(
            "set union requires a set type, got {}",
            add.type_label()
        ))),
    }
}

/// Remove elements from a set value. A result with zero elements is
/// reported as `None`; the caller drops the attribute entirely.
pub fn subtract_set(
    current: &AttributeValue,
    delete: &AttributeValue,
) -> Result<Option<AttributeValue>> {
    match (current, delete) {
        (AttributeValue::StringSet(cur), AttributeValue::StringSet(del)) => {
            Ok(difference(cur, del).map(AttributeValue::StringSet))
        }
        (AttributeValue::NumberSet(cur), AttributeValue::NumberSet(del)) => {
            Ok(difference(cur, del).map(AttributeValue::NumberSet))
        }
        (AttributeValue::BinarySet(cur), AttributeValue::BinarySet(del)) => {
            Ok(difference(cur, del).map(AttributeValue::BinarySet))
        }
        _ => Err(Error::validation(format!(
            "set difference requires matching set types, got {} and {}",
            current.type_label(),
            delete.type_label()
        ))),
    }
}

fn sorted_set(value: &AttributeValue) -> AttributeValue {
    match value {
        AttributeValue::StringSet(v) => AttributeValue::StringSet(dedup_sorted(v)),
        AttributeValue::NumberSet(v) => AttributeValue::NumberSet(dedup_sorted(v)),
        AttributeValue::BinarySet(v) => AttributeValue::BinarySet(dedup_sorted(v)),
        other => other.clone(),
    }
}

fn dedup_sorted(elements: &[String]) -> Vec<String> {
    elements
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn merge(current: &[String], more: &[String]) -> Vec<String> {
    current
        .iter()
        .chain(more.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn difference(current: &[String], delete: &[String]) -> Option<Vec<String>> {
    let drop: BTreeSet<&String> = delete.iter().collect();
    let kept: Vec<String> = current
        .iter()
        .filter(|e| !drop.contains(e))
        .cloned()
        .collect();
    if kept.is_empty() { None } else { Some(kept) }
}
