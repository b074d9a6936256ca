//! In-memory table catalog and its persistence into the KV store.
//!
//! Schemas live under the reserved `__SCHEMA__#` prefix as JSON. The map
//! is rebuilt by scanning that prefix on startup and after a snapshot is
//! loaded. Persistence and the in-memory map are updated separately so
//! the executor can commit the schema batch first and register the table
//! only once it is durable. Access is serialized by the database's
//! process-wide lock; the catalog itself is plain data.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{Error, Result, StorageError};
use crate::keys;
use crate::store::{Storage, WriteBatch};
use crate::types::TableSchema;

/// The table-name → schema mapping.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<String, TableSchema>,
}

impl Catalog {
    /// Rebuild the catalog by scanning the schema prefix.
    ///
    /// Entries that fail to decode are skipped with a warning rather than
    /// poisoning startup.
    pub fn load(store: &Storage) -> Result<Self> {
        let prefix = keys::SCHEMA_PREFIX.as_bytes().to_vec();
        let upper = keys::upper_bound(&prefix);
        let mut tables = HashMap::new();

        for entry in store.scan(
            std::ops::Bound::Included(prefix),
            std::ops::Bound::Excluded(upper),
            false,
        ) {
            let (key, value) = entry.map_err(Error::from)?;
            match serde_json::from_slice::<TableSchema>(&value) {
                Ok(schema) => {
                    tables.insert(schema.table_name.clone(), schema);
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "skipping undecodable schema entry"
                    );
                }
            }
        }

        Ok(Catalog { tables })
    }

    /// Look up a schema, failing with `ResourceNotFound` when absent.
    pub fn get(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::ResourceNotFound(format!("table not found: {table}")))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Enqueue the persistent entry for a schema.
    pub fn persist(schema: &TableSchema, batch: &mut WriteBatch) -> Result<()> {
        let bytes =
            serde_json::to_vec(schema).map_err(|e| Error::Storage(StorageError::Corrupt(e)))?;
        batch.put(keys::schema_key(&schema.table_name), bytes);
        Ok(())
    }

    /// Enqueue removal of a schema's persistent entry.
    pub fn unpersist(table: &str, batch: &mut WriteBatch) {
        batch.delete(keys::schema_key(table));
    }

    /// Add a schema to the in-memory map (after its batch committed).
    pub fn register(&mut self, schema: TableSchema) {
        self.tables.insert(schema.table_name.clone(), schema);
    }

    /// Drop a schema from the in-memory map (after its batch committed).
    pub fn unregister(&mut self, table: &str) -> Option<TableSchema> {
        self.tables.remove(table)
    }

    /// All table names, sorted for deterministic listings.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every schema, for cross-table validation.
    pub fn schemas(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
