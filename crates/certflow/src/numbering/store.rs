use crate::error::{ErrorCategory, OperationError};
use chrono::{DateTime, Utc};
use core::future::Future;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// The counter a sequence belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceKey {
    pub entity_id: String,
    pub year: i32,
}

impl SequenceKey {
    pub fn new(entity_id: impl Into<String>, year: i32) -> Self {
        Self {
            entity_id: entity_id.into(),
            year,
        }
    }
}

/// One issued certificate number, as persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceRecord {
    pub entity_id: String,
    pub year: i32,
    pub sequence: u64,
    pub certificate_number: String,
    pub issued_at: DateTime<Utc>,
    pub issued_by: String,
}

/// Failures reported by a [`SequenceStore`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Another writer committed for the same key after this transaction read.
    #[error("write conflict on {entity_id}/{year}")]
    Conflict { entity_id: String, year: i32 },

    /// The `(entity, year, sequence)` uniqueness constraint rejected the write.
    #[error("sequence {sequence} already issued for {entity_id}/{year}")]
    DuplicateSequence {
        entity_id: String,
        year: i32,
        sequence: u64,
    },

    /// The store could not be reached or aborted for another reason.
    #[error("sequence store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    /// Conflicts are resolved by re-reading and trying again.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::DuplicateSequence { .. })
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        Self::categorized(ErrorCategory::Database, err)
    }
}

/// A transactional record store for issued certificate numbers.
///
/// Implementations must guarantee that two concurrent transactions on the
/// same key cannot both commit the same sequence: either by serializing them
/// (blocking in [`begin`](Self::begin)) or by failing the later commit with
/// [`StoreError::Conflict`].
pub trait SequenceStore: Send + Sync {
    type Transaction: SequenceTransaction;

    fn begin(
        &self,
        key: &SequenceKey,
    ) -> impl Future<Output = Result<Self::Transaction, StoreError>> + Send;
}

/// An open transaction on one [`SequenceKey`]. Dropping it without committing
/// rolls it back.
pub trait SequenceTransaction: Send {
    /// The highest sequence committed for the key, counting only records
    /// issued for the key's year.
    fn last_sequence(&mut self) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;

    fn commit(self, record: SequenceRecord) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// How [`MemorySequenceStore`] isolates concurrent transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Isolation {
    /// Transactions on one key run one at a time.
    #[default]
    Serializable,
    /// Transactions run concurrently; a commit fails with
    /// [`StoreError::Conflict`] if the key changed since it was read.
    Optimistic,
}

#[derive(Debug, Default)]
struct Ledger {
    version: u64,
    records: Vec<SequenceRecord>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    isolation: Isolation,
    ledgers: Mutex<HashMap<SequenceKey, Ledger>>,
    key_locks: Mutex<HashMap<SequenceKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// An in-process [`SequenceStore`] with a dedicated counter table per key and
/// a unique `(entity, year, sequence)` constraint.
///
/// Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct MemorySequenceStore {
    inner: Arc<MemoryInner>,
}

impl MemorySequenceStore {
    pub fn new(isolation: Isolation) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                isolation,
                ..MemoryInner::default()
            }),
        }
    }

    /// All committed records for `key`, in commit order.
    pub fn records(&self, key: &SequenceKey) -> Vec<SequenceRecord> {
        self.inner
            .ledgers
            .lock()
            .get(key)
            .map(|l| l.records.clone())
            .unwrap_or_default()
    }
}

impl SequenceStore for MemorySequenceStore {
    type Transaction = MemoryTransaction;

    fn begin(
        &self,
        key: &SequenceKey,
    ) -> impl Future<Output = Result<Self::Transaction, StoreError>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        async move {
            let guard = match inner.isolation {
                Isolation::Serializable => {
                    let lock = Arc::clone(inner.key_locks.lock().entry(key.clone()).or_default());
                    Some(lock.lock_owned().await)
                }
                Isolation::Optimistic => None,
            };
            Ok(MemoryTransaction {
                inner,
                key,
                read_version: None,
                _guard: guard,
            })
        }
    }
}

/// Transaction handle of [`MemorySequenceStore`].
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<MemoryInner>,
    key: SequenceKey,
    read_version: Option<u64>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl SequenceTransaction for MemoryTransaction {
    fn last_sequence(&mut self) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send {
        let ledgers = self.inner.ledgers.lock();
        let (version, last) = ledgers.get(&self.key).map_or((0, None), |ledger| {
            let last = ledger
                .records
                .iter()
                .filter(|r| r.year == self.key.year)
                .map(|r| r.sequence)
                .max();
            (ledger.version, last)
        });
        drop(ledgers);
        self.read_version = Some(version);
        core::future::ready(Ok(last))
    }

    fn commit(self, record: SequenceRecord) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = (|| {
            let mut ledgers = self.inner.ledgers.lock();
            let ledger = ledgers.entry(self.key.clone()).or_default();

            if self.read_version.is_some_and(|v| v != ledger.version) {
                return Err(StoreError::Conflict {
                    entity_id: self.key.entity_id.clone(),
                    year: self.key.year,
                });
            }
            if ledger.records.iter().any(|r| r.sequence == record.sequence) {
                return Err(StoreError::DuplicateSequence {
                    entity_id: self.key.entity_id.clone(),
                    year: self.key.year,
                    sequence: record.sequence,
                });
            }

            ledger.records.push(record);
            ledger.version += 1;
            Ok(())
        })();
        core::future::ready(result)
    }
}
