//! The operation executor: table lifecycle, item reads and writes, range
//! queries, transactions, and the snapshot lifecycle.
//!
//! A single process-wide readers-writer lock guards the catalog and
//! serializes every write path, so a writer's old-value read, condition
//! evaluation, and batch commit are atomic with respect to all other
//! writers. Readers share the lock and see either the pre- or post-commit
//! state of a batch, never a partial one — the ordered KV commits each
//! batch atomically.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{CancellationReason, Error, Result, StorageError};
use crate::expr::{Condition, ExpressionParams, KeyCondition, UpdateActions};
use crate::index::apply_gsi_diff;
use crate::keys;
use crate::store::{Storage, WriteBatch};
use crate::types::{GsiSchema, TableSchema};
use crate::value::{marshal_record, unmarshal_record, Record};

/// Maximum marshaled item size in bytes (400KB, matching the emulated
/// service).
pub const MAX_ITEM_SIZE: usize = 400 * 1024;

/// Maximum number of items in one TransactWriteItems request.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// Maximum number of keys in one BatchGetItem request.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// A Query request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub key_condition: String,
    pub index_name: Option<String>,
    pub filter: Option<String>,
    pub exclusive_start_key: Option<Record>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
    pub params: ExpressionParams,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>, key_condition: impl Into<String>) -> Self {
        QueryRequest {
            table: table.into(),
            key_condition: key_condition.into(),
            index_name: None,
            filter: None,
            exclusive_start_key: None,
            limit: None,
            scan_forward: true,
            params: ExpressionParams::default(),
        }
    }
}

/// A Scan request.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub index_name: Option<String>,
    pub filter: Option<String>,
    pub exclusive_start_key: Option<Record>,
    pub limit: Option<usize>,
    pub params: ExpressionParams,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>) -> Self {
        ScanRequest {
            table: table.into(),
            index_name: None,
            filter: None,
            exclusive_start_key: None,
            limit: None,
            params: ExpressionParams::default(),
        }
    }
}

/// Result of a Query or Scan.
#[derive(Debug, Default, Clone)]
pub struct QueryResult {
    pub items: Vec<Record>,
    pub count: usize,
    pub scanned_count: usize,
    pub last_evaluated_key: Option<Record>,
}

/// Result of a BatchGetItem.
#[derive(Debug, Default, Clone)]
pub struct BatchGetResult {
    pub responses: BTreeMap<String, Vec<Record>>,
    pub unprocessed: BTreeMap<String, Vec<Record>>,
}

/// One entry of a TransactWriteItems request.
#[derive(Debug, Clone)]
pub enum TransactItem {
    Put {
        table: String,
        item: Record,
        condition: Option<String>,
        params: ExpressionParams,
    },
    Update {
        table: String,
        key: Record,
        update_expression: String,
        condition: Option<String>,
        params: ExpressionParams,
    },
    Delete {
        table: String,
        key: Record,
        condition: Option<String>,
        params: ExpressionParams,
    },
    ConditionCheck {
        table: String,
        key: Record,
        condition: String,
        params: ExpressionParams,
    },
}

impl TransactItem {
    fn table(&self) -> &str {
        match self {
            TransactItem::Put { table, .. }
            | TransactItem::Update { table, .. }
            | TransactItem::Delete { table, .. }
            | TransactItem::ConditionCheck { table, .. } => table,
        }
    }

    /// The record the base key is derived from: the new item for a Put,
    /// the key map otherwise.
    fn key_source(&self) -> &Record {
        match self {
            TransactItem::Put { item, .. } => item,
            TransactItem::Update { key, .. }
            | TransactItem::Delete { key, .. }
            | TransactItem::ConditionCheck { key, .. } => key,
        }
    }

    fn condition(&self) -> Option<&str> {
        match self {
            TransactItem::Put { condition, .. }
            | TransactItem::Update { condition, .. }
            | TransactItem::Delete { condition, .. } => condition.as_deref(),
            TransactItem::ConditionCheck { condition, .. } => Some(condition),
        }
    }

    fn params(&self) -> &ExpressionParams {
        match self {
            TransactItem::Put { params, .. }
            | TransactItem::Update { params, .. }
            | TransactItem::Delete { params, .. }
            | TransactItem::ConditionCheck { params, .. } => params,
        }
    }
}

struct Core {
    /// `None` only transiently while the store is closed for a snapshot
    /// operation that then failed; every access goes through `store()`.
    store: Option<Storage>,
    catalog: Catalog,
}

impl Core {
    fn store(&self) -> Result<&Storage> {
        self.store
            .as_ref()
            .ok_or_else(|| StorageError::Closed.into())
    }
}

struct DatabaseInner {
    core: RwLock<Core>,
    data_dir: PathBuf,
    snapshot_dir: PathBuf,
}

/// The database handle.
///
/// Cheaply clonable (`Arc`-based) and `Send + Sync`; the front-end clones
/// one handle per request task.
#[derive(Clone)]
pub struct DynaStore {
    inner: Arc<DatabaseInner>,
}

impl DynaStore {
    /// Open (or create) the database, loading persisted table schemas.
    pub fn open(data_dir: impl AsRef<Path>, snapshot_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let snapshot_dir = snapshot_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(StorageError::Io)?;
        std::fs::create_dir_all(&snapshot_dir).map_err(StorageError::Io)?;

        let store = Storage::open(&data_dir)?;
        let catalog = Catalog::load(&store)?;
        info!(
            data_dir = %data_dir.display(),
            tables = catalog.len(),
            "database opened"
        );

        Ok(DynaStore {
            inner: Arc::new(DatabaseInner {
                core: RwLock::new(Core {
                    store: Some(store),
                    catalog,
                }),
                data_dir,
                snapshot_dir,
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Table lifecycle
    // -----------------------------------------------------------------------

    /// Create a table. The schema is persisted and active immediately.
    pub fn create_table(&self, schema: TableSchema) -> Result<TableSchema> {
        validate_schema(&schema)?;

        let mut core = self.inner.core.write();
        if core.catalog.contains(&schema.table_name) {
            return Err(Error::ResourceInUse(format!(
                "table already exists: {}",
                schema.table_name
            )));
        }
        // Index names key the GSI byte layout, so they are global.
        for index_name in schema.gsis.keys() {
            if core.catalog.schemas().any(|s| s.gsis.contains_key(index_name)) {
                return Err(Error::validation(format!(
                    "index name already in use: {index_name}"
                )));
            }
        }

        let mut batch = WriteBatch::new();
        Catalog::persist(&schema, &mut batch)?;
        core.store()?.commit(batch)?;
        core.catalog.register(schema.clone());
        info!(table = %schema.table_name, "table created");
        Ok(schema)
    }

    /// Delete a table: its schema entry, every item, and every GSI entry,
    /// in one atomic batch.
    pub fn delete_table(&self, table: &str) -> Result<TableSchema> {
        let mut core = self.inner.core.write();
        let schema = core.catalog.get(table)?.clone();

        let mut batch = WriteBatch::new();
        {
            let store = core.store()?;
            for key in collect_prefix_keys(store, keys::table_prefix(table))? {
                batch.delete(key);
            }
            for gsi in schema.gsis.values() {
                for key in collect_prefix_keys(store, keys::gsi_index_prefix(&gsi.index_name))? {
                    batch.delete(key);
                }
            }
        }
        Catalog::unpersist(table, &mut batch);
        core.store()?.commit(batch)?;
        core.catalog.unregister(table);
        info!(table, "table deleted");
        Ok(schema)
    }

    /// All table names, sorted.
    pub fn list_tables(&self) -> Vec<String> {
        self.inner.core.read().catalog.table_names()
    }

    /// A table's schema.
    pub fn describe_table(&self, table: &str) -> Result<TableSchema> {
        Ok(self.inner.core.read().catalog.get(table)?.clone())
    }

    // -----------------------------------------------------------------------
    // Item operations
    // -----------------------------------------------------------------------

    /// Insert or replace an item. Returns the replaced item, if any.
    pub fn put_item(
        &self,
        table: &str,
        item: Record,
        condition: Option<&str>,
        params: &ExpressionParams,
    ) -> Result<Option<Record>> {
        let core = self.inner.core.write();
        let schema = core.catalog.get(table)?;
        let suffix = key_suffix_from(schema, &item, "Item")?;
        let full_key = keys::item_key(table, &suffix);

        let value = marshal_record(&item)?;
        if value.len() > MAX_ITEM_SIZE {
            return Err(Error::validation(format!(
                "item exceeds maximum size of {MAX_ITEM_SIZE} bytes"
            )));
        }

        let store = core.store()?;
        let old = read_record(store, &full_key)?;
        check_condition(condition, old.as_ref(), params)?;

        let mut batch = WriteBatch::new();
        apply_gsi_diff(&mut batch, schema, old.as_ref(), Some(&item), &suffix)?;
        batch.put(full_key, value);
        store.commit(batch)?;
        Ok(old)
    }

    /// Exact-key lookup. A missing (or expired) item is `None`, not an
    /// error.
    pub fn get_item(&self, table: &str, key: &Record) -> Result<Option<Record>> {
        let core = self.inner.core.read();
        let schema = core.catalog.get(table)?;
        let suffix = key_suffix_from(schema, key, "Key")?;
        let record = read_record(core.store()?, &keys::item_key(table, &suffix))?;
        Ok(record.filter(|r| !is_expired(schema, r, now_epoch())))
    }

    /// Delete an item. Returns the removed item, if any.
    pub fn delete_item(
        &self,
        table: &str,
        key: &Record,
        condition: Option<&str>,
        params: &ExpressionParams,
    ) -> Result<Option<Record>> {
        let core = self.inner.core.write();
        let schema = core.catalog.get(table)?;
        let suffix = key_suffix_from(schema, key, "Key")?;
        let full_key = keys::item_key(table, &suffix);

        let store = core.store()?;
        let old = read_record(store, &full_key)?;
        check_condition(condition, old.as_ref(), params)?;

        if old.is_some() {
            let mut batch = WriteBatch::new();
            apply_gsi_diff(&mut batch, schema, old.as_ref(), None, &suffix)?;
            batch.delete(full_key);
            store.commit(batch)?;
        }
        Ok(old)
    }

    /// Apply an update expression to an item, creating it when absent.
    /// Returns the new record.
    pub fn update_item(
        &self,
        table: &str,
        key: &Record,
        update_expression: &str,
        condition: Option<&str>,
        params: &ExpressionParams,
    ) -> Result<Record> {
        let core = self.inner.core.write();
        let schema = core.catalog.get(table)?;
        let suffix = key_suffix_from(schema, key, "Key")?;
        let full_key = keys::item_key(table, &suffix);

        let store = core.store()?;
        let old = read_record(store, &full_key)?;
        check_condition(condition, old.as_ref(), params)?;

        let actions = UpdateActions::parse(update_expression, params)?;
        reject_key_updates(schema, &actions)?;

        let base = match &old {
            Some(record) => record.clone(),
            None => seed_from_key(schema, key),
        };
        let new_record = actions.apply(&base)?;

        let value = marshal_record(&new_record)?;
        if value.len() > MAX_ITEM_SIZE {
            return Err(Error::validation(format!(
                "item exceeds maximum size of {MAX_ITEM_SIZE} bytes"
            )));
        }

        let mut batch = WriteBatch::new();
        apply_gsi_diff(&mut batch, schema, old.as_ref(), Some(&new_record), &suffix)?;
        batch.put(full_key, value);
        store.commit(batch)?;
        Ok(new_record)
    }

    // -----------------------------------------------------------------------
    // Range reads
    // -----------------------------------------------------------------------

    /// Key-condition query over a partition of the table or of a GSI.
    pub fn query(&self, req: &QueryRequest) -> Result<QueryResult> {
        let core = self.inner.core.read();
        let schema = core.catalog.get(&req.table)?;
        let gsi = resolve_index(schema, req.index_name.as_deref())?;

        let (pk_name, sk_name) = match gsi {
            Some(g) => (g.partition_key.as_str(), g.sort_key.as_deref()),
            None => (schema.partition_key.as_str(), schema.sort_key.as_deref()),
        };

        let kc = KeyCondition::parse(&req.key_condition, pk_name, sk_name, &req.params)?;
        let pk_value = kc
            .partition_value
            .key_string()
            .ok_or_else(|| Error::validation("partition key value must be of type S or N"))?;

        let (start, end) = match gsi {
            Some(g) => {
                let prefix = keys::gsi_partition_prefix(&g.index_name, pk_value);
                let upper = keys::upper_bound(&prefix);
                (prefix, upper)
            }
            None => keys::partition_range(&req.table, pk_value, schema.sort_key.is_some()),
        };
        let after = match &req.exclusive_start_key {
            Some(lek) => Some(start_key_for(schema, gsi, lek)?),
            None => None,
        };

        let filter = match &req.filter {
            Some(expression) => Some(Condition::parse(expression)?),
            None => None,
        };
        let limit = req.limit.filter(|n| *n > 0);
        let store = core.store()?;
        let now = now_epoch();

        let mut result = QueryResult::default();
        for entry in store.scan_window(start, end, after, !req.scan_forward) {
            let (entry_key, entry_value) = entry.map_err(Error::from)?;
            let Some(record) =
                load_entry(store, schema, gsi.is_some(), &entry_key, &entry_value)?
            else {
                continue;
            };
            if is_expired(schema, &record, now) {
                continue;
            }

            if let (Some(sort_cond), Some(sk_attr)) = (&kc.sort, sk_name) {
                match record.get(sk_attr) {
                    Some(value) => {
                        if !sort_cond.matches(value)? {
                            continue;
                        }
                    }
                    None => continue,
                }
            }

            result.scanned_count += 1;
            if let Some(filter) = &filter {
                if !filter.eval(Some(&record), &req.params)? {
                    continue;
                }
            }

            result.items.push(record);
            result.count += 1;
            if limit == Some(result.count) {
                let last = &result.items[result.items.len() - 1];
                result.last_evaluated_key = Some(extract_key(schema, gsi, last));
                break;
            }
        }
        Ok(result)
    }

    /// Full iteration of a table (or GSI), with the same filtering and
    /// pagination behavior as Query but no key condition.
    pub fn scan(&self, req: &ScanRequest) -> Result<QueryResult> {
        let core = self.inner.core.read();
        let schema = core.catalog.get(&req.table)?;
        let gsi = resolve_index(schema, req.index_name.as_deref())?;

        let start = match gsi {
            Some(g) => keys::gsi_index_prefix(&g.index_name),
            None => keys::table_prefix(&req.table),
        };
        let end = keys::upper_bound(&start);
        let after = match &req.exclusive_start_key {
            Some(lek) => Some(start_key_for(schema, gsi, lek)?),
            None => None,
        };

        let filter = match &req.filter {
            Some(expression) => Some(Condition::parse(expression)?),
            None => None,
        };
        let limit = req.limit.filter(|n| *n > 0);
        let store = core.store()?;
        let now = now_epoch();

        let mut result = QueryResult::default();
        for entry in store.scan_window(start, end, after, false) {
            let (entry_key, entry_value) = entry.map_err(Error::from)?;
            let Some(record) =
                load_entry(store, schema, gsi.is_some(), &entry_key, &entry_value)?
            else {
                continue;
            };
            if is_expired(schema, &record, now) {
                continue;
            }

            result.scanned_count += 1;
            if let Some(filter) = &filter {
                if !filter.eval(Some(&record), &req.params)? {
                    continue;
                }
            }

            result.items.push(record);
            result.count += 1;
            if limit == Some(result.count) {
                let last = &result.items[result.items.len() - 1];
                result.last_evaluated_key = Some(extract_key(schema, gsi, last));
                break;
            }
        }
        Ok(result)
    }

    /// Point-read many keys across tables from one consistent view.
    /// Keys that fail to read land in `unprocessed` instead of failing
    /// the request.
    pub fn batch_get_item(
        &self,
        requests: &BTreeMap<String, Vec<Record>>,
    ) -> Result<BatchGetResult> {
        let total: usize = requests.values().map(Vec::len).sum();
        if total == 0 {
            return Err(Error::validation("BatchGetItem requires at least one key"));
        }
        if total > MAX_BATCH_GET_KEYS {
            return Err(Error::validation(format!(
                "BatchGetItem supports at most {MAX_BATCH_GET_KEYS} keys, got {total}"
            )));
        }

        let core = self.inner.core.read();
        let now = now_epoch();
        let mut result = BatchGetResult::default();

        for (table, table_keys) in requests {
            let schema = core.catalog.get(table)?;
            let store = core.store()?;
            let responses = result.responses.entry(table.clone()).or_default();

            for key in table_keys {
                let suffix = key_suffix_from(schema, key, "Key")?;
                match read_record(store, &keys::item_key(table, &suffix)) {
                    Ok(Some(record)) => {
                        if !is_expired(schema, &record, now) {
                            responses.push(record);
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(table = %table, error = %error, "batch get key failed, reporting unprocessed");
                        result
                            .unprocessed
                            .entry(table.clone())
                            .or_default()
                            .push(key.clone());
                    }
                }
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute up to [`MAX_TRANSACT_ITEMS`] writes atomically.
    ///
    /// Phase A reads every referenced key and evaluates every condition
    /// under the exclusive lock; a single failed condition cancels the
    /// whole request with per-item reasons. Phase B assembles one batch,
    /// in request order, and commits it through the ordered KV.
    pub fn transact_write_items(&self, items: &[TransactItem]) -> Result<()> {
        if items.is_empty() {
            return Err(Error::validation(
                "TransactWriteItems requires at least one item",
            ));
        }
        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(Error::validation(format!(
                "TransactWriteItems supports at most {MAX_TRANSACT_ITEMS} items, got {}",
                items.len()
            )));
        }

        let core = self.inner.core.write();
        let store = core.store()?;

        // Phase A: resolve keys, snapshot current state, validate.
        struct Planned {
            schema: TableSchema,
            suffix: String,
            full_key: Vec<u8>,
            old: Option<Record>,
            update: Option<UpdateActions>,
        }

        let mut seen_keys: HashSet<Vec<u8>> = HashSet::new();
        let mut planned: Vec<Planned> = Vec::with_capacity(items.len());
        for item in items {
            let schema = core.catalog.get(item.table())?.clone();
            let suffix = key_suffix_from(&schema, item.key_source(), "TransactItem")?;
            let full_key = keys::item_key(item.table(), &suffix);
            if !seen_keys.insert(full_key.clone()) {
                return Err(Error::validation(
                    "transaction contains two items targeting the same key",
                ));
            }
            let old = read_record(store, &full_key)?;

            let update = match item {
                TransactItem::Update {
                    update_expression,
                    params,
                    ..
                } => {
                    let actions = UpdateActions::parse(update_expression, params)?;
                    reject_key_updates(&schema, &actions)?;
                    Some(actions)
                }
                _ => None,
            };

            planned.push(Planned {
                schema,
                suffix,
                full_key,
                old,
                update,
            });
        }

        let mut reasons = vec![CancellationReason::None; items.len()];
        let mut canceled = false;
        for (idx, item) in items.iter().enumerate() {
            if let Some(expression) = item.condition() {
                let condition = Condition::parse(expression)?;
                if !condition.eval(planned[idx].old.as_ref(), item.params())? {
                    reasons[idx] = CancellationReason::ConditionalCheckFailed;
                    canceled = true;
                }
            }
        }
        if canceled {
            debug!(items = items.len(), "transaction canceled by condition");
            return Err(Error::TransactionCanceled { reasons });
        }

        // Phase B: one batch, request order, committed atomically.
        let mut batch = WriteBatch::new();
        for (item, plan) in items.iter().zip(&planned) {
            match item {
                TransactItem::Put { item: new_item, .. } => {
                    apply_gsi_diff(
                        &mut batch,
                        &plan.schema,
                        plan.old.as_ref(),
                        Some(new_item),
                        &plan.suffix,
                    )?;
                    batch.put(plan.full_key.clone(), marshal_record(new_item)?);
                }
                TransactItem::Update { key, .. } => {
                    // Parsed in phase A for every Update item.
                    let Some(actions) = &plan.update else {
                        continue;
                    };
                    let base = match &plan.old {
                        Some(record) => record.clone(),
                        None => seed_from_key(&plan.schema, key),
                    };
                    let new_record = actions.apply(&base)?;
                    apply_gsi_diff(
                        &mut batch,
                        &plan.schema,
                        plan.old.as_ref(),
                        Some(&new_record),
                        &plan.suffix,
                    )?;
                    batch.put(plan.full_key.clone(), marshal_record(&new_record)?);
                }
                TransactItem::Delete { .. } => {
                    apply_gsi_diff(&mut batch, &plan.schema, plan.old.as_ref(), None, &plan.suffix)?;
                    batch.delete(plan.full_key.clone());
                }
                TransactItem::ConditionCheck { .. } => {}
            }
        }
        store.commit(batch)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Snapshots and bulk erase
    // -----------------------------------------------------------------------

    /// Byte-copy the store directory into the named snapshot.
    ///
    /// The store is persisted and closed for the duration of the copy so
    /// the snapshot is a consistent image, then reopened.
    pub fn create_snapshot(&self, name: &str) -> Result<()> {
        validate_snapshot_name(name)?;
        let destination = self.inner.snapshot_dir.join(name);

        let mut core = self.inner.core.write();
        let store = core.store.take().ok_or(StorageError::Closed)?;
        let copied = store.close().map_err(Error::from).and_then(|_| {
            if destination.exists() {
                std::fs::remove_dir_all(&destination).map_err(StorageError::Io)?;
            }
            copy_dir(&self.inner.data_dir, &destination).map_err(|e| StorageError::Io(e).into())
        });

        // Reopen regardless of how the copy went; a failed reopen leaves
        // the handle closed and every later call reports it.
        let reopened = Storage::open(&self.inner.data_dir);
        match reopened {
            Ok(store) => core.store = Some(store),
            Err(error) => {
                copied?;
                return Err(error.into());
            }
        }
        copied?;
        info!(snapshot = name, "snapshot created");
        Ok(())
    }

    /// Replace the store directory with the named snapshot's contents and
    /// reload the catalog from it.
    pub fn load_snapshot(&self, name: &str) -> Result<()> {
        validate_snapshot_name(name)?;
        let source = self.inner.snapshot_dir.join(name);
        if !source.is_dir() {
            return Err(Error::ResourceNotFound(format!(
                "snapshot not found: {name}"
            )));
        }

        let mut core = self.inner.core.write();
        let store = core.store.take().ok_or(StorageError::Closed)?;
        store.close()?;
        std::fs::remove_dir_all(&self.inner.data_dir).map_err(StorageError::Io)?;
        std::fs::create_dir_all(&self.inner.data_dir).map_err(StorageError::Io)?;
        copy_dir(&source, &self.inner.data_dir).map_err(StorageError::Io)?;

        let store = Storage::open(&self.inner.data_dir)?;
        core.catalog = Catalog::load(&store)?;
        core.store = Some(store);
        info!(snapshot = name, tables = core.catalog.len(), "snapshot loaded");
        Ok(())
    }

    /// Destroy every item, schema, and index entry and start empty.
    pub fn delete_all_data(&self) -> Result<()> {
        let mut core = self.inner.core.write();
        let store = core.store.take().ok_or(StorageError::Closed)?;
        store.close()?;
        std::fs::remove_dir_all(&self.inner.data_dir).map_err(StorageError::Io)?;
        std::fs::create_dir_all(&self.inner.data_dir).map_err(StorageError::Io)?;

        core.store = Some(Storage::open(&self.inner.data_dir)?);
        core.catalog.clear();
        info!("all data deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_schema(schema: &TableSchema) -> Result<()> {
    validate_name("table name", &schema.table_name)?;
    if schema.table_name.starts_with("__") {
        return Err(Error::validation(
            "table names starting with '__' are reserved",
        ));
    }
    validate_name("partition key", &schema.partition_key)?;
    if let Some(sk) = &schema.sort_key {
        validate_name("sort key", sk)?;
    }
    for (name, gsi) in &schema.gsis {
        validate_name("index name", &gsi.index_name)?;
        if name != &gsi.index_name {
            return Err(Error::validation(format!(
                "index map key '{name}' does not match index name '{}'",
                gsi.index_name
            )));
        }
        validate_name("index partition key", &gsi.partition_key)?;
        if let Some(sk) = &gsi.sort_key {
            validate_name("index sort key", sk)?;
        }
    }
    Ok(())
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation(format!("{what} must not be empty")));
    }
    if keys::contains_separator(name) {
        return Err(Error::validation(format!(
            "{what} must not contain reserved separator characters"
        )));
    }
    Ok(())
}

fn validate_snapshot_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("snapshot name must not be empty"));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid || name.starts_with('.') {
        return Err(Error::validation(format!(
            "invalid snapshot name: {name}"
        )));
    }
    Ok(())
}

/// Extract and validate an item's key suffix (`pk` or `pk#sk`).
fn key_suffix_from(schema: &TableSchema, source: &Record, what: &str) -> Result<String> {
    let pk = key_attr(source, &schema.partition_key, what)?;
    let sk = match &schema.sort_key {
        Some(name) => Some(key_attr(source, name, what)?),
        None => None,
    };
    Ok(keys::base_suffix(pk, sk))
}

fn key_attr<'a>(source: &'a Record, name: &str, what: &str) -> Result<&'a str> {
    let value = source
        .get(name)
        .ok_or_else(|| Error::validation(format!("key attribute '{name}' missing in {what}")))?;
    let text = value.key_string().ok_or_else(|| {
        Error::validation(format!("key attribute '{name}' must be of type S or N"))
    })?;
    if keys::contains_separator(text) {
        return Err(Error::validation(format!(
            "key attribute '{name}' contains a reserved separator character"
        )));
    }
    Ok(text)
}

fn read_record(store: &Storage, key: &[u8]) -> Result<Option<Record>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(unmarshal_record(&bytes)?)),
        None => Ok(None),
    }
}

fn check_condition(
    condition: Option<&str>,
    record: Option<&Record>,
    params: &ExpressionParams,
) -> Result<()> {
    if let Some(expression) = condition {
        let parsed = Condition::parse(expression)?;
        if !parsed.eval(record, params)? {
            return Err(Error::ConditionCheckFailed);
        }
    }
    Ok(())
}

fn reject_key_updates(schema: &TableSchema, actions: &UpdateActions) -> Result<()> {
    if actions.touches(&schema.partition_key) {
        return Err(Error::validation(format!(
            "cannot update key attribute '{}'",
            schema.partition_key
        )));
    }
    if let Some(sk) = &schema.sort_key {
        if actions.touches(sk) {
            return Err(Error::validation(format!(
                "cannot update key attribute '{sk}'"
            )));
        }
    }
    Ok(())
}

/// Seed an upsert base record with the key attributes from the request.
fn seed_from_key(schema: &TableSchema, key: &Record) -> Record {
    let mut base = Record::new();
    if let Some(value) = key.get(&schema.partition_key) {
        base.insert(schema.partition_key.clone(), value.clone());
    }
    if let Some(sk) = &schema.sort_key {
        if let Some(value) = key.get(sk) {
            base.insert(sk.clone(), value.clone());
        }
    }
    base
}

/// Rebuild the byte key an `ExclusiveStartKey` record points at, for the
/// base table or for a GSI.
fn start_key_for(
    schema: &TableSchema,
    gsi: Option<&GsiSchema>,
    lek: &Record,
) -> Result<Vec<u8>> {
    let base_suffix = key_suffix_from(schema, lek, "ExclusiveStartKey")?;
    match gsi {
        None => Ok(keys::item_key(&schema.table_name, &base_suffix)),
        Some(g) => {
            let gpk = key_attr(lek, &g.partition_key, "ExclusiveStartKey")?;
            let gsk = match &g.sort_key {
                Some(name) => key_attr(lek, name, "ExclusiveStartKey")?,
                None => "",
            };
            Ok(keys::gsi_key(&g.index_name, gpk, gsk, &base_suffix))
        }
    }
}

fn resolve_index<'a>(
    schema: &'a TableSchema,
    index_name: Option<&str>,
) -> Result<Option<&'a GsiSchema>> {
    match index_name {
        Some(name) if !name.is_empty() => {
            let gsi = schema.gsis.get(name).ok_or_else(|| {
                Error::ResourceNotFound(format!(
                    "index not found: {name} on table {}",
                    schema.table_name
                ))
            })?;
            Ok(Some(gsi))
        }
        _ => Ok(None),
    }
}

/// Materialize one scan entry: the record itself for base scans, the
/// dereferenced base item for GSI scans. A GSI entry whose base item is
/// gone (tombstone race) is skipped silently.
fn load_entry(
    store: &Storage,
    schema: &TableSchema,
    via_gsi: bool,
    entry_key: &[u8],
    entry_value: &[u8],
) -> Result<Option<Record>> {
    if !via_gsi {
        return Ok(Some(unmarshal_record(entry_value)?));
    }
    let Some(base_key) = keys::base_key_from_gsi(&schema.table_name, entry_key) else {
        return Ok(None);
    };
    match store.get(&base_key)? {
        Some(bytes) => Ok(Some(unmarshal_record(&bytes)?)),
        None => Ok(None),
    }
}

/// The primary key of a result item, plus the GSI key attributes when the
/// page came from an index — exactly what `ExclusiveStartKey` must carry
/// to resume.
fn extract_key(schema: &TableSchema, gsi: Option<&GsiSchema>, record: &Record) -> Record {
    let mut key = Record::new();
    let mut copy = |name: &str| {
        if let Some(value) = record.get(name) {
            key.insert(name.to_string(), value.clone());
        }
    };
    copy(&schema.partition_key);
    if let Some(sk) = &schema.sort_key {
        copy(sk);
    }
    if let Some(g) = gsi {
        copy(&g.partition_key);
        if let Some(sk) = &g.sort_key {
            copy(sk);
        }
    }
    key
}

fn collect_prefix_keys(store: &Storage, prefix: Vec<u8>) -> Result<Vec<Vec<u8>>> {
    let upper = keys::upper_bound(&prefix);
    let mut collected = Vec::new();
    for entry in store.scan_window(prefix, upper, None, false) {
        let (key, _) = entry.map_err(Error::from)?;
        collected.push(key);
    }
    Ok(collected)
}

fn is_expired(schema: &TableSchema, record: &Record, now: f64) -> bool {
    let Some(attr) = &schema.ttl_attribute else {
        return false;
    };
    match record.get(attr) {
        Some(crate::value::AttributeValue::N(text)) => match text.trim().parse::<f64>() {
            // Zero and unparsable values never expire.
            Ok(epoch) => epoch != 0.0 && epoch <= now,
            Err(_) => false,
        },
        _ => false,
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn copy_dir(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(destination)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}



#[cfg(test)]
mod gsi_tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn values(pairs: serde_json::Value) -> ExpressionParams {
        ExpressionParams {
            names: Default::default(),
            values: serde_json::from_value(pairs).unwrap(),
        }
    }

    fn db_with_index() -> (DynaStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DynaStore::open(dir.path().join("data"), dir.path().join("snapshots")).unwrap();
        db.create_table(
            TableSchema::new("U", "id").with_gsi(GsiSchema::new("byEmail", "email")),
        )
        .unwrap();
        (db, dir)
    }

    fn query_by_email(db: &DynaStore, email: &str) -> QueryResult {
        let mut q = QueryRequest::new("U", "email = :v");
        q.index_name = Some("byEmail".into());
        q.params = values(json!({":v": {"S": email}}));
        db.query(&q).unwrap()
    }

    #[test]
    fn test_gsi_follows_item_through_lifecycle() {
        let (db, _dir) = db_with_index();

        db.put_item(
            "U",
            rec(json!({"id": {"S": "u1"}, "email": {"S": "a@x"}})),
            None,
            &ExpressionParams::default(),
        )
        .unwrap();
        let result = query_by_email(&db, "a@x");
        assert_eq!(result.count, 1);
        assert_eq!(result.items[0], rec(json!({"id": {"S": "u1"}, "email": {"S": "a@x"}})));

        // Update moves the item between index partitions.
        db.update_item(
            "U",
            &rec(json!({"id": {"S": "u1"}})),
            "SET email = :e",
            None,
            &values(json!({":e": {"S": "b@x"}})),
        )
        .unwrap();
        assert_eq!(query_by_email(&db, "a@x").count, 0);
        assert_eq!(query_by_email(&db, "b@x").count, 1);

        // Delete removes the entry.
        db.delete_item("U", &rec(json!({"id": {"S": "u1"}})), None, &ExpressionParams::default())
            .unwrap();
        assert_eq!(query_by_email(&db, "a@x").count, 0);
        assert_eq!(query_by_email(&db, "b@x").count, 0);
    }

    #[test]
    fn test_gsi_item_without_indexed_attribute() {
        let (db, _dir) = db_with_index();
        db.put_item("U", rec(json!({"id": {"S": "u1"}})), None, &ExpressionParams::default())
            .unwrap();
        // No entry, and adding the attribute later creates one.
        assert_eq!(query_by_email(&db, "a@x").count, 0);

        db.update_item(
            "U",
            &rec(json!({"id": {"S": "u1"}})),
            "SET email = :e",
            None,
            &values(json!({":e": {"S": "a@x"}})),
        )
        .unwrap();
        assert_eq!(query_by_email(&db, "a@x").count, 1);
    }

    #[test]
    fn test_gsi_returns_full_base_item() {
        let (db, _dir) = db_with_index();
        db.put_item(
            "U",
            rec(json!({"id": {"S": "u1"}, "email": {"S": "a@x"}, "extra": {"N": "42"}})),
            None,
            &ExpressionParams::default(),
        )
        .unwrap();
        let result = query_by_email(&db, "a@x");
        assert!(result.items[0].contains_key("extra"), "GSI reads fetch the base item");
    }

    #[test]
    fn test_gsi_query_with_base_sort_key_table() {
        let dir = tempdir().unwrap();
        let db = DynaStore::open(dir.path().join("data"), dir.path().join("snapshots")).unwrap();
        db.create_table(
            TableSchema::new("orders", "cust")
                .with_sort_key("order_id")
                .with_gsi(GsiSchema::new("byStatus", "status")),
        )
        .unwrap();
        for (order, status) in [("o1", "open"), ("o2", "open"), ("o3", "closed")] {
            db.put_item(
                "orders",
                rec(json!({
                    "cust": {"S": "c1"},
                    "order_id": {"S": order},
                    "status": {"S": status}
                })),
                None,
                &ExpressionParams::default(),
            )
            .unwrap();
        }

        let mut q = QueryRequest::new("orders", "status = :s");
        q.index_name = Some("byStatus".into());
        q.params = values(json!({":s": {"S": "open"}}));
        let result = db.query(&q).unwrap();
        assert_eq!(result.count, 2, "base items with sort keys resolve through the index");
    }

    #[test]
    fn test_gsi_with_sort_key_ordering() {
        let dir = tempdir().unwrap();
        let db = DynaStore::open(dir.path().join("data"), dir.path().join("snapshots")).unwrap();
        db.create_table(
            TableSchema::new("staff", "id")
                .with_gsi(GsiSchema::new("byDept", "dept").with_sort_key("badge")),
        )
        .unwrap();
        for (id, badge) in [("a", "3"), ("b", "1"), ("c", "2")] {
            db.put_item(
                "staff",
                rec(json!({"id": {"S": id}, "dept": {"S": "eng"}, "badge": {"S": badge}})),
                None,
                &ExpressionParams::default(),
            )
            .unwrap();
        }

        let mut q = QueryRequest::new("staff", "dept = :d");
        q.index_name = Some("byDept".into());
        q.params = values(json!({":d": {"S": "eng"}}));
        let result = db.query(&q).unwrap();
        let badges: Vec<&str> = result
            .items
            .iter()
            .map(|r| match r.get("badge") {
                Some(crate::value::AttributeValue::S(s)) => s.as_str(),
                _ => panic!("missing badge"),
            })
            .collect();
        assert_eq!(badges, vec!["1", "2", "3"], "index partition is in index sort order");
    }

    #[test]
    fn test_gsi_pagination_chains() {
        let (db, _dir) = db_with_index();
        for i in 0..5 {
            db.put_item(
                "U",
                rec(json!({"id": {"S": format!("u{i}")}, "email": {"S": "same@x"}})),
                None,
                &ExpressionParams::default(),
            )
            .unwrap();
        }

        let mut q = QueryRequest::new("U", "email = :v");
        q.index_name = Some("byEmail".into());
        q.params = values(json!({":v": {"S": "same@x"}}));
        q.limit = Some(2);
        let first = db.query(&q).unwrap();
        assert_eq!(first.count, 2);
        let lek = first.last_evaluated_key.clone().unwrap();
        assert!(lek.contains_key("id"));
        assert!(lek.contains_key("email"));

        let mut q2 = QueryRequest::new("U", "email = :v");
        q2.index_name = Some("byEmail".into());
        q2.params = values(json!({":v": {"S": "same@x"}}));
        q2.exclusive_start_key = Some(lek);
        let rest = db.query(&q2).unwrap();
        assert_eq!(rest.count, 3);
    }

    #[test]
    fn test_scan_over_index() {
        let (db, _dir) = db_with_index();
        for i in 0..3 {
            db.put_item(
                "U",
                rec(json!({"id": {"S": format!("u{i}")}, "email": {"S": format!("e{i}@x")}})),
                None,
                &ExpressionParams::default(),
            )
            .unwrap();
        }
        // One item without the indexed attribute stays out of the index scan.
        db.put_item("U", rec(json!({"id": {"S": "plain"}})), None, &ExpressionParams::default())
            .unwrap();

        let mut req = ScanRequest::new("U");
        req.index_name = Some("byEmail".into());
        let result = db.scan(&req).unwrap();
        assert_eq!(result.count, 3);

        let all = db.scan(&ScanRequest::new("U")).unwrap();
        assert_eq!(all.count, 4);
    }

    #[test]
    fn test_duplicate_index_name_across_tables_rejected() {
        let (db, _dir) = db_with_index();
        let result = db.create_table(
            TableSchema::new("V", "id").with_gsi(GsiSchema::new("byEmail", "mail")),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}

#[cfg(test)]
mod transact_tests {
    use super::*;
    use crate::value::AttributeValue;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn values(pairs: serde_json::Value) -> ExpressionParams {
        ExpressionParams {
            names: Default::default(),
            values: serde_json::from_value(pairs).unwrap(),
        }
    }

    fn create_test_db() -> (DynaStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DynaStore::open(dir.path().join("data"), dir.path().join("snapshots")).unwrap();
        db.create_table(TableSchema::new("T", "id")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_transaction_commits_all_items() {
        let (db, _dir) = create_test_db();
        db.transact_write_items(&[
            TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": "a"}, "v": {"N": "1"}})),
                condition: None,
                params: ExpressionParams::default(),
            },
            TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": "b"}, "v": {"N": "2"}})),
                condition: None,
                params: ExpressionParams::default(),
            },
        ])
        .unwrap();

        assert!(db.get_item("T", &rec(json!({"id": {"S": "a"}}))).unwrap().is_some());
        assert!(db.get_item("T", &rec(json!({"id": {"S": "b"}}))).unwrap().is_some());
    }

    #[test]
    fn test_failed_condition_cancels_whole_transaction() {
        let (db, _dir) = create_test_db();
        let result = db.transact_write_items(&[
            TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": "a"}})),
                condition: None,
                params: ExpressionParams::default(),
            },
            TransactItem::ConditionCheck {
                table: "T".into(),
                key: rec(json!({"id": {"S": "b"}})),
                condition: "attribute_exists(id)".into(),
                params: ExpressionParams::default(),
            },
        ]);

        match result {
            Err(Error::TransactionCanceled { reasons }) => {
                assert_eq!(
                    reasons,
                    vec![
                        CancellationReason::None,
                        CancellationReason::ConditionalCheckFailed
                    ]
                );
            }
            other => panic!("expected TransactionCanceled, got {other:?}"),
        }

        // No partial effect.
        assert!(db.get_item("T", &rec(json!({"id": {"S": "a"}}))).unwrap().is_none());
    }

    #[test]
    fn test_transaction_update_and_delete() {
        let (db, _dir) = create_test_db();
        db.put_item("T", rec(json!({"id": {"S": "a"}, "c": {"N": "1"}})), None, &ExpressionParams::default())
            .unwrap();
        db.put_item("T", rec(json!({"id": {"S": "b"}})), None, &ExpressionParams::default())
            .unwrap();

        db.transact_write_items(&[
            TransactItem::Update {
                table: "T".into(),
                key: rec(json!({"id": {"S": "a"}})),
                update_expression: "SET c = c + :one".into(),
                condition: None,
                params: values(json!({":one": {"N": "1"}})),
            },
            TransactItem::Delete {
                table: "T".into(),
                key: rec(json!({"id": {"S": "b"}})),
                condition: None,
                params: ExpressionParams::default(),
            },
        ])
        .unwrap();

        let a = db.get_item("T", &rec(json!({"id": {"S": "a"}}))).unwrap().unwrap();
        assert_eq!(a.get("c"), Some(&AttributeValue::N("2".into())));
        assert!(db.get_item("T", &rec(json!({"id": {"S": "b"}}))).unwrap().is_none());
    }

    #[test]
    fn test_transaction_same_key_twice_rejected() {
        let (db, _dir) = create_test_db();
        let result = db.transact_write_items(&[
            TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": "a"}})),
                condition: None,
                params: ExpressionParams::default(),
            },
            TransactItem::Delete {
                table: "T".into(),
                key: rec(json!({"id": {"S": "a"}})),
                condition: None,
                params: ExpressionParams::default(),
            },
        ]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_transaction_empty_and_oversized_rejected() {
        let (db, _dir) = create_test_db();
        assert!(matches!(
            db.transact_write_items(&[]),
            Err(Error::Validation(_))
        ));

        let too_many: Vec<TransactItem> = (0..101)
            .map(|i| TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": format!("k{i}")}})),
                condition: None,
                params: ExpressionParams::default(),
            })
            .collect();
        assert!(matches!(
            db.transact_write_items(&too_many),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_transaction_supports_100_items() {
        let (db, _dir) = create_test_db();
        let items: Vec<TransactItem> = (0..100)
            .map(|i| TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": format!("k{i:03}")}})),
                condition: None,
                params: ExpressionParams::default(),
            })
            .collect();
        db.transact_write_items(&items).unwrap();
        assert_eq!(db.scan(&ScanRequest::new("T")).unwrap().count, 100);
    }

    #[test]
    fn test_transaction_conditions_see_pre_transaction_snapshot() {
        let (db, _dir) = create_test_db();
        db.put_item("T", rec(json!({"id": {"S": "a"}, "v": {"N": "1"}})), None, &ExpressionParams::default())
            .unwrap();

        // The put rewrites "a"; the condition on "a" still evaluates
        // against the snapshot taken before any effect.
        db.transact_write_items(&[
            TransactItem::Put {
                table: "T".into(),
                item: rec(json!({"id": {"S": "a"}, "v": {"N": "2"}})),
                condition: Some("v = :old".into()),
                params: values(json!({":old": {"N": "1"}})),
            },
        ])
        .unwrap();

        let a = db.get_item("T", &rec(json!({"id": {"S": "a"}}))).unwrap().unwrap();
        assert_eq!(a.get("v"), Some(&AttributeValue::N("2".into())));
    }

    #[test]
    fn test_transaction_maintains_gsis() {
        let dir = tempdir().unwrap();
        let db = DynaStore::open(dir.path().join("data"), dir.path().join("snapshots")).unwrap();
        db.create_table(
            TableSchema::new("U", "id").with_gsi(GsiSchema::new("byEmail", "email")),
        )
        .unwrap();

        db.transact_write_items(&[TransactItem::Put {
            table: "U".into(),
            item: rec(json!({"id": {"S": "u1"}, "email": {"S": "a@x"}})),
            condition: None,
            params: ExpressionParams::default(),
        }])
        .unwrap();

        let mut q = QueryRequest::new("U", "email = :v");
        q.index_name = Some("byEmail".into());
        q.params = values(json!({":v": {"S": "a@x"}}));
        assert_eq!(db.query(&q).unwrap().count, 1);
    }

    #[test]
    fn test_transaction_update_validation_rejects_before_cancel() {
        let (db, _dir) = create_test_db();
        // A malformed update expression is a validation error for the
        // whole request, not a cancellation.
        let result = db.transact_write_items(&[
            TransactItem::ConditionCheck {
                table: "T".into(),
                key: rec(json!({"id": {"S": "missing"}})),
                condition: "attribute_exists(id)".into(),
                params: ExpressionParams::default(),
            },
            TransactItem::Update {
                table: "T".into(),
                key: rec(json!({"id": {"S": "a"}})),
                update_expression: "SET id = :v".into(),
                condition: None,
                params: values(json!({":v": {"S": "x"}})),
            },
        ]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
