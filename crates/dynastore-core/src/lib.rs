//! # DynaStore core
//!
//! The storage, indexing, and expression engine behind the DynaStore
//! emulator: a local, durable document store speaking the data model of a
//! well-known managed NoSQL service.
//!
//! Logical tables, primary keys, and secondary indexes are mapped onto a
//! single ordered byte-keyed store. Writes keep base items and GSI
//! entries consistent through one atomic batch; reads go through prefix
//! range scans that the key codec keeps in sort-key order. A small
//! expression language drives conditions, key queries, and updates.
//!
//! ## Quick start
//!
//! ```no_run
//! use dynastore_core::database::DynaStore;
//! use dynastore_core::expr::ExpressionParams;
//! use dynastore_core::types::TableSchema;
//! use dynastore_core::value::Record;
//!
//! let db = DynaStore::open("data", "snapshots").unwrap();
//! db.create_table(TableSchema::new("users", "id")).unwrap();
//!
//! let item: Record = serde_json::from_value(serde_json::json!({
//!     "id": {"S": "alice"},
//!     "age": {"N": "30"}
//! }))
//! .unwrap();
//! db.put_item("users", item, None, &ExpressionParams::default())
//!     .unwrap();
//!
//! let key: Record =
//!     serde_json::from_value(serde_json::json!({"id": {"S": "alice"}})).unwrap();
//! assert!(db.get_item("users", &key).unwrap().is_some());
//! ```

pub mod catalog;
pub mod database;
pub mod error;
pub mod expr;
pub mod index;
pub mod keys;
pub mod store;
pub mod types;
pub mod value;

pub use database::{
    BatchGetResult, DynaStore, QueryRequest, QueryResult, ScanRequest, TransactItem,
};
pub use error::{CancellationReason, Error, Result};
pub use expr::ExpressionParams;
pub use types::{GsiSchema, TableSchema};
pub use value::{AttributeValue, Record};
