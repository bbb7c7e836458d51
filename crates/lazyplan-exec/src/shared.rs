//! Write-once, read-many storage for node results.
//!
//! Each entry is published exactly once with the number of consumers that
//! will read it, and removed when the last one has taken it. The bytes stay
//! reserved from the memory budget until every handed-out [`SharedResult`]
//! has been dropped too.

use std::collections::HashMap;
use std::sync::Arc;

use lazyplan_core::hash::Hash256;
use lazyplan_core::id::NodeId;
use lazyplan_core::types::RowBatch;
use lazyplan_core::Error;
use lazyplan_mem::guard::{BudgetGuardImpl, MemoryBudgetImpl};
use parking_lot::Mutex;

use crate::error::ExecError;

/// A read handle on a published result.
#[derive(Debug, Clone)]
pub struct SharedResult {
    pub batch: Arc<RowBatch>,
    pub fingerprint: Hash256,
    guard: Arc<BudgetGuardImpl>,
}

impl SharedResult {
    /// Keep the reservation alive for as long as the returned handle.
    pub fn guard(&self) -> Arc<BudgetGuardImpl> {
        Arc::clone(&self.guard)
    }

    /// Owned copy of the rows; avoids the copy when this is the last handle.
    pub fn into_batch(self) -> RowBatch {
        let SharedResult { batch, guard, .. } = self;
        let out = Arc::try_unwrap(batch).unwrap_or_else(|shared| (*shared).clone());
        drop(guard);
        out
    }
}

#[derive(Debug)]
struct Entry {
    result: SharedResult,
    remaining: usize,
}

#[derive(Debug)]
pub struct SharedResultStore {
    budget: MemoryBudgetImpl,
    entries: Mutex<HashMap<NodeId, Entry>>,
}

impl SharedResultStore {
    pub fn new(budget: MemoryBudgetImpl) -> Self {
        Self {
            budget,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store `batch` for `consumers` readers. A result nobody reads is dropped.
    pub fn publish(
        &self,
        node: NodeId,
        fingerprint: Hash256,
        batch: RowBatch,
        consumers: usize,
    ) -> Result<(), ExecError> {
        if consumers == 0 {
            return Ok(());
        }
        let mut entries = self.entries.lock();
        if entries.contains_key(&node) {
            return Err(Error::Invariant(format!("{node} published twice")).into());
        }
        let guard = self
            .budget
            .reserve(batch.approx_bytes(), "shared_result")
            .map_err(|e| match e {
                lazyplan_mem::Error::BudgetExceeded {
                    requested,
                    capacity,
                    used,
                    ..
                } => ExecError::ResourceExhausted {
                    node,
                    requested,
                    capacity,
                    used,
                },
            })?;
        entries.insert(
            node,
            Entry {
                result: SharedResult {
                    batch: Arc::new(batch),
                    fingerprint,
                    guard: Arc::new(guard),
                },
                remaining: consumers,
            },
        );
        Ok(())
    }

    /// Consume one read of `node`'s result.
    pub fn take(&self, node: NodeId) -> Result<SharedResult, ExecError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&node)
            .ok_or_else(|| Error::Invariant(format!("{node} read before it was published")))?;
        entry.remaining -= 1;
        let result = entry.result.clone();
        if entry.remaining == 0 {
            entries.remove(&node);
        }
        Ok(result)
    }

    /// Look at a result without consuming a read.
    pub fn get(&self, node: NodeId) -> Option<SharedResult> {
        self.entries.lock().get(&node).map(|e| e.result.clone())
    }

    /// Reads still expected for `node`.
    pub fn pending(&self, node: NodeId) -> Option<usize> {
        self.entries.lock().get(&node).map(|e| e.remaining)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.lock().contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry, e.g. after a failure or cancellation.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.entries.lock());
        if !dropped.is_empty() {
            tracing::debug!(entries = dropped.len(), "cleared shared results");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyplan_core::hash::hash_str;
    use lazyplan_core::types::{Column, Scalar};

    fn batch(n: i64) -> RowBatch {
        RowBatch::new(vec![Column::new("x", (0..n).map(Scalar::I64).collect())])
    }

    #[test]
    fn entries_are_released_after_the_last_read() {
        let budget = MemoryBudgetImpl::new(1 << 20);
        let store = SharedResultStore::new(budget.clone());
        let node = NodeId::from_index(0);
        store.publish(node, hash_str("a"), batch(10), 2).unwrap();
        assert!(budget.used_bytes() > 0);
        assert_eq!(store.pending(node), Some(2));

        let first = store.take(node).unwrap();
        assert_eq!(store.pending(node), Some(1));
        let second = store.take(node).unwrap();
        assert!(store.is_empty());
        assert!(Arc::ptr_eq(&first.batch, &second.batch));

        // Still held by the readers.
        assert!(budget.used_bytes() > 0);
        drop(first);
        assert_eq!(second.into_batch().num_rows(), 10);
        assert_eq!(budget.used_bytes(), 0);
        assert!(store.take(node).is_err());
    }

    #[test]
    fn publishing_is_write_once_and_budgeted() {
        let budget = MemoryBudgetImpl::new(64);
        let store = SharedResultStore::new(budget.clone());
        let node = NodeId::from_index(1);
        store.publish(node, hash_str("a"), batch(1), 1).unwrap();
        let held = budget.used_bytes();
        assert!(matches!(
            store.publish(node, hash_str("a"), batch(1), 1),
            Err(ExecError::Build(Error::Invariant(_)))
        ));
        // A repeat is rejected before reserving, even when it would not fit.
        assert!(matches!(
            store.publish(node, hash_str("a"), batch(100), 1),
            Err(ExecError::Build(Error::Invariant(_)))
        ));
        assert_eq!(budget.used_bytes(), held);
        assert!(matches!(
            store.publish(NodeId::from_index(2), hash_str("b"), batch(100), 1),
            Err(ExecError::ResourceExhausted { capacity: 64, .. })
        ));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(budget.used_bytes(), 0);
    }
}
