//! Byte-key layout for base items, GSI entries, and schema entries.
//!
//! The ordered KV sorts keys lexicographically, so these layouts are the
//! single source of the "sorted within partition" contract:
//!
//! - base item:  `<table> '#' <pk>` or `<table> '#' <pk> '#' <sk>`
//! - GSI entry:  `<index> '$' <gpk> '$' <gsk> '$' <base suffix>` where the
//!   gsk segment is empty for indexes without a sort key and the base
//!   suffix is the item's `<pk>` or `<pk> '#' <sk>`
//! - schema:     `__SCHEMA__ '#' <table>`
//!
//! Both separators are reserved: key attribute values containing them are
//! rejected at write time.

/// Separator inside base item keys and the schema prefix.
pub const SEP_BASE: char = '#';

/// Separator inside GSI entry keys.
pub const SEP_GSI: char = '$';

/// Prefix under which table schemas are persisted.
pub const SCHEMA_PREFIX: &str = "__SCHEMA__#";

/// True if `value` contains a reserved separator and may not be used as a
/// key segment.
pub fn contains_separator(value: &str) -> bool {
    value.contains(SEP_BASE) || value.contains(SEP_GSI)
}

/// The portion of a base item key after the table name: `pk` or `pk#sk`.
pub fn base_suffix(pk: &str, sk: Option<&str>) -> String {
    match sk {
        Some(sk) => format!("{pk}{SEP_BASE}{sk}"),
        None => pk.to_string(),
    }
}

/// Full base item key.
pub fn item_key(table: &str, suffix: &str) -> Vec<u8> {
    format!("{table}{SEP_BASE}{suffix}").into_bytes()
}

/// Prefix covering every item of a table.
pub fn table_prefix(table: &str) -> Vec<u8> {
    format!("{table}{SEP_BASE}").into_bytes()
}

/// Scan bounds for one partition of a table.
///
/// With a sort key the partition is the half-open prefix range
/// `table#pk#…`; without one the partition is exactly the single key
/// `table#pk`, so the range is pinned to it (a bare prefix scan would
/// also match partitions whose key value merely starts with `pk`).
pub fn partition_range(table: &str, pk: &str, has_sort_key: bool) -> (Vec<u8>, Vec<u8>) {
    if has_sort_key {
        let prefix = format!("{table}{SEP_BASE}{pk}{SEP_BASE}").into_bytes();
        let upper = upper_bound(&prefix);
        (prefix, upper)
    } else {
        let key = format!("{table}{SEP_BASE}{pk}").into_bytes();
        let mut upper = key.clone();
        upper.push(0);
        (key, upper)
    }
}

/// Full GSI entry key. The base suffix is always the last `$`-segment;
/// it contains no `$`, so it can be split back off unambiguously.
pub fn gsi_key(index: &str, gpk: &str, gsk: &str, base_suffix: &str) -> Vec<u8> {
    format!("{index}{SEP_GSI}{gpk}{SEP_GSI}{gsk}{SEP_GSI}{base_suffix}").into_bytes()
}

/// Prefix covering one partition of a GSI.
pub fn gsi_partition_prefix(index: &str, gpk: &str) -> Vec<u8> {
    format!("{index}{SEP_GSI}{gpk}{SEP_GSI}").into_bytes()
}

/// Prefix covering every entry of a GSI.
pub fn gsi_index_prefix(index: &str) -> Vec<u8> {
    format!("{index}{SEP_GSI}").into_bytes()
}

/// Recover the base item key referenced by a GSI entry key.
///
/// Returns `None` if the entry key is not valid UTF-8 or has no `$`.
pub fn base_key_from_gsi(table: &str, gsi_entry_key: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(gsi_entry_key).ok()?;
    let (_, suffix) = text.rsplit_once(SEP_GSI)?;
    Some(item_key(table, suffix))
}

/// Key under which a table's schema is persisted.
pub fn schema_key(table: &str) -> Vec<u8> {
    format!("{SCHEMA_PREFIX}{table}").into_bytes()
}

/// Smallest byte string greater than every key with the given prefix.
///
/// Falls back to an empty vec (meaning "unbounded") when the prefix is all
/// `0xFF`, which cannot occur for the textual prefixes built above.
pub fn upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.last().copied() {
        if last < 0xFF {
            *bound.last_mut().unwrap() = last + 1;
            return bound;
        }
        bound.pop();
    }
    Vec::new()
}
