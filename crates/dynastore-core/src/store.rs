//! Thin facade over the embedded ordered KV store.
//!
//! Wraps a `fjall` keyspace with a single `items` partition and exposes
//! exactly the primitives the executor relies on: point reads, directional
//! range scans with an optional exclusive start bound, and atomic
//! multi-key batch commits. The handle can be closed and reopened, which
//! the snapshot lifecycle requires.

use std::ops::Bound;
use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::error::StorageError;

/// A single pending mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered list of mutations committed atomically.
///
/// Built up by the executor and the index maintainer, then handed to
/// [`Storage::commit`] in one piece — readers observe either none or all
/// of the contained operations.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Handle to the on-disk ordered KV store.
pub struct Storage {
    keyspace: Keyspace,
    items: PartitionHandle,
}

impl Storage {
    /// Open (or create) the store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let keyspace = Config::new(dir).open()?;
        let items = keyspace.open_partition("items", PartitionCreateOptions::default())?;
        Ok(Storage { keyspace, items })
    }

    /// Exact-key lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.items.get(key)?.map(|slice| slice.to_vec()))
    }

    /// Commit a batch atomically. An empty batch is a no-op.
    pub fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut inner = self.keyspace.batch();
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => inner.insert(&self.items, key, value),
                BatchOp::Delete { key } => inner.remove(&self.items, key),
            }
        }
        inner.commit()?;
        Ok(())
    }

    /// Scan `[lower, upper)` in key order, descending when `reverse`.
    ///
    /// The iterator snapshots the store at call time; it stays valid while
    /// later writes land.
    pub fn scan(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        reverse: bool,
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>), StorageError>> + 'static {
        let range = self.items.range((lower, upper));
        let iter: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>>> = if reverse {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };
        iter.map(|entry| {
            entry
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(StorageError::from)
        })
    }

    /// Scan a `[start, end)` partition window with an optional exclusive
    /// start position inside it.
    ///
    /// Forward scans begin strictly after `after` when given; reverse
    /// scans begin strictly before it. When `after` no longer names a live
    /// key the scan still starts at the nearest neighbor in scan
    /// direction, which is what strict pagination exclusion needs.
    pub fn scan_window(
        &self,
        start: Vec<u8>,
        end: Vec<u8>,
        after: Option<Vec<u8>>,
        reverse: bool,
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>), StorageError>> + 'static {
        let end_bound = |end: Vec<u8>| {
            if end.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(end)
            }
        };
        // Clamp `after` to the window so a stray start key can neither
        // widen it nor invert the range.
        let (lower, upper) = match after {
            Some(key) if reverse => {
                let upper = if key <= start {
                    Bound::Excluded(start.clone())
                } else if end.is_empty() || key < end {
                    Bound::Excluded(key)
                } else {
                    end_bound(end)
                };
                (Bound::Included(start), upper)
            }
            Some(key) => {
                let lower = if key < start {
                    Bound::Included(start)
                } else if !end.is_empty() && key >= end {
                    Bound::Included(end.clone())
                } else {
                    Bound::Excluded(key)
                };
                (lower, end_bound(end))
            }
            None => (Bound::Included(start), end_bound(end)),
        };
        self.scan(lower, upper, reverse)
    }

    /// Flush and fsync everything to disk.
    pub fn persist(&self) -> Result<(), StorageError> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// Persist and release the on-disk handle. After this the directory
    /// can be byte-copied or replaced.
    pub fn close(self) -> Result<(), StorageError> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
