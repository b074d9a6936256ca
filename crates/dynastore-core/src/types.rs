//! Core types: table schemas and secondary index definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Schema definition for a table.
///
/// Immutable after creation; persisted as JSON under the reserved schema
/// prefix so it survives restarts and snapshot loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    /// Name of the partition key attribute. Values must be `S` or `N`.
    pub partition_key: String,
    /// Optional sort key attribute; orders items within a partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    /// Global secondary indexes, keyed by index name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gsis: BTreeMap<String, GsiSchema>,
    /// Optional TTL attribute name. Items whose TTL attribute (`N`, Unix
    /// epoch seconds) is in the past are invisible to reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_attribute: Option<String>,
}

/// A global secondary index: a view of the table keyed by different
/// attributes, maintained synchronously on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GsiSchema {
    pub index_name: String,
    pub partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        TableSchema {
            table_name: table_name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            gsis: BTreeMap::new(),
            ttl_attribute: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_gsi(mut self, gsi: GsiSchema) -> Self {
        self.gsis.insert(gsi.index_name.clone(), gsi);
        self
    }

    pub fn with_ttl_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.ttl_attribute = Some(attribute.into());
        self
    }
}

impl GsiSchema {
    pub fn new(index_name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        GsiSchema {
            index_name: index_name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}
