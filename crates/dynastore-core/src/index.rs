//! Secondary-index maintenance: diffing a base item's old and new GSI
//! projections into the same write batch as the base mutation, so index
//! entries commit atomically with the item they point at.

use crate::error::{Error, Result};
use crate::keys;
use crate::store::WriteBatch;
use crate::types::{GsiSchema, TableSchema};
use crate::value::Record;

/// Enqueue the GSI entry changes implied by replacing `old` with `new`
/// (either side may be absent: insert, update, or delete).
///
/// `base_suffix` is the item's primary-key suffix; old and new always
/// share it, since key attributes are immutable.
pub fn apply_gsi_diff(
    batch: &mut WriteBatch,
    schema: &TableSchema,
    old: Option<&Record>,
    new: Option<&Record>,
    base_suffix: &str,
) -> Result<()> {
    for gsi in schema.gsis.values() {
        let old_key = match old {
            Some(record) => project(record, gsi, base_suffix)?,
            None => None,
        };
        let new_key = match new {
            Some(record) => project(record, gsi, base_suffix)?,
            None => None,
        };

        if old_key == new_key {
            continue;
        }
        if let Some(key) = old_key {
            batch.delete(key);
        }
        if let Some(key) = new_key {
            batch.put(key, Vec::new());
        }
    }
    Ok(())
}

/// Compute the GSI entry key a record projects to, if any.
///
/// A record projects iff the index partition key attribute is present and
/// of type `S`/`N`, and — when the index declares a sort key — that
/// attribute is present and `S`/`N` too. Anything else simply does not
/// project; only reserved separators in a projected value are an error.
fn project(record: &Record, gsi: &GsiSchema, base_suffix: &str) -> Result<Option<Vec<u8>>> {
    let Some(gpk) = record.get(&gsi.partition_key).and_then(|v| v.key_string()) else {
        return Ok(None);
    };
    reject_separators(&gsi.partition_key, gpk)?;

    let gsk = match &gsi.sort_key {
        Some(attr) => {
            let Some(gsk) = record.get(attr).and_then(|v| v.key_string()) else {
                return Ok(None);
            };
            reject_separators(attr, gsk)?;
            gsk
        }
        None => "",
    };

    Ok(Some(keys::gsi_key(&gsi.index_name, gpk, gsk, base_suffix)))
}

fn reject_separators(attribute: &str, value: &str) -> Result<()> {
    if keys::contains_separator(value) {
        return Err(Error::validation(format!(
            "indexed attribute '{attribute}' contains a reserved key separator"
        )));
    }
    Ok(())
}
