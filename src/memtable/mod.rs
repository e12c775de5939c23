use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};

use crate::db::{Op, OpKind};
use crate::internal_key::{InternalKey, KeyKind};
use crate::range_tombstone::RangeTombstone;

mod iter;

pub use iter::MemTableLevelIter;

/// In-memory table of internal keys.
///
/// Range tombstones live in the same map as point records: kind
/// `RangeDel`, user key = start, value = end key. Readers that want the
/// tombstones as intervals use [`MemTable::range_tombstones`].
#[derive(Debug)]
pub struct MemTable {
    map: SkipMap<InternalKey, Bytes>,
    approximate_bytes: AtomicU64,
    range_tombstone_count: AtomicU64,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            approximate_bytes: AtomicU64::new(0),
            range_tombstone_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn map(&self) -> &SkipMap<InternalKey, Bytes> {
        &self.map
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approximate_bytes(&self) -> u64 {
        self.approximate_bytes.load(AtomicOrdering::Relaxed)
    }

    pub fn has_range_tombstones(&self) -> bool {
        self.range_tombstone_count.load(AtomicOrdering::Relaxed) > 0
    }

    fn apply(&self, seqno_base: u64, ops: &[Op]) {
        for (idx, op) in ops.iter().enumerate() {
            let seqno = seqno_base + idx as u64;
            let (kind, value) = match op.kind {
                OpKind::Put => (KeyKind::Put, op.value.clone()),
                OpKind::Merge => (KeyKind::Merge, op.value.clone()),
                OpKind::Del => (KeyKind::Del, Bytes::new()),
                OpKind::RangeDel => (KeyKind::RangeDel, op.value.clone()),
            };
            if kind == KeyKind::RangeDel {
                self.range_tombstone_count
                    .fetch_add(1, AtomicOrdering::Relaxed);
            }
            let key = InternalKey::new(op.key.clone(), seqno, kind);
            let bytes = key.user_key.len() as u64 + value.len() as u64 + 16;
            self.map.insert(key, value);
            self.approximate_bytes
                .fetch_add(bytes, AtomicOrdering::Relaxed);
        }
    }

    /// Raw (unfragmented) range tombstones in this table.
    pub fn range_tombstones(&self) -> Vec<RangeTombstone> {
        if !self.has_range_tombstones() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for entry in self.map.iter() {
            let ikey = entry.key();
            if ikey.kind != KeyKind::RangeDel {
                continue;
            }
            out.push(RangeTombstone::new(
                ikey.user_key.clone(),
                entry.value().clone(),
                ikey.seqno,
            ));
        }
        out
    }

    /// All entries in internal-key order, for flushing to an SST.
    pub(crate) fn sorted_entries(&self) -> Vec<(InternalKey, Bytes)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One mutable memtable plus the newest-first queue of immutable tables.
#[derive(Debug)]
pub struct MemTableManager {
    mutable: RwLock<Arc<MemTable>>,
    immutables: Mutex<VecDeque<Arc<MemTable>>>,
}

impl MemTableManager {
    pub fn new() -> Self {
        Self {
            mutable: RwLock::new(Arc::new(MemTable::new())),
            immutables: Mutex::new(VecDeque::new()),
        }
    }

    pub fn mutable(&self) -> Arc<MemTable> {
        self.mutable.read().clone()
    }

    /// Immutable memtables, newest first.
    pub fn immutables(&self) -> Vec<Arc<MemTable>> {
        self.immutables.lock().iter().cloned().collect()
    }

    pub fn apply_batch(&self, seqno_base: u64, ops: &[Op]) {
        if ops.is_empty() {
            return;
        }
        let table = self.mutable.read().clone();
        table.apply(seqno_base, ops);
    }

    /// Swaps in a fresh mutable table; the old one joins the immutable
    /// queue. No-op when the mutable table is empty.
    pub fn rotate(&self) -> Option<Arc<MemTable>> {
        let mut guard = self.mutable.write();
        if guard.is_empty() {
            return None;
        }
        let old = std::mem::replace(&mut *guard, Arc::new(MemTable::new()));
        self.immutables.lock().push_front(old.clone());
        Some(old)
    }

    pub fn oldest_immutable(&self) -> Option<Arc<MemTable>> {
        self.immutables.lock().back().cloned()
    }

    pub fn pop_oldest_immutable(&self) -> Option<Arc<MemTable>> {
        self.immutables.lock().pop_back()
    }
}

impl Default for MemTableManager {
    fn default() -> Self {
        Self::new()
    }
}
