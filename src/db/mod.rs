mod options;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::comparator::{BytewiseComparator, KeyComparator};
use crate::memtable::{MemTable, MemTableManager};
use crate::sst::{SstBuilder, SstReader};
use crate::version::{SstFile, Version, VersionSet};

pub use options::{DbOptions, ReadOptions};

pub type Value = Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Put,
    Del,
    Merge,
    /// Range deletion tombstone.
    RangeDel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub kind: OpKind,
    pub key: Bytes,
    pub value: Bytes,
}

impl Op {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::Del,
            key: key.into(),
            value: Bytes::new(),
        }
    }

    pub fn merge(key: impl Into<Bytes>, operand: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::Merge,
            key: key.into(),
            value: operand.into(),
        }
    }

    /// Delete all keys in `[start, end)`.
    pub fn delete_range(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            kind: OpKind::RangeDel,
            key: start.into(),
            value: end.into(),
        }
    }
}

/// Reference-counted snapshot of everything a query reads: the mutable
/// memtable, the immutable memtables (newest first), and the current
/// version's files. Holding one pins all of it.
pub struct SuperVersion {
    pub(crate) mem: Arc<MemTable>,
    pub(crate) imms: Vec<Arc<MemTable>>,
    pub(crate) version: Arc<Version>,
}

/// Database handle.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    dir: PathBuf,
    options: DbOptions,
    comparator: Arc<dyn KeyComparator>,
    memtables: MemTableManager,
    versions: VersionSet,
    /// Next sequence number to assign.
    next_seqno: AtomicU64,
    /// Serializes writers so sequence numbers match application order.
    write_mutex: Mutex<()>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>, options: DbOptions) -> anyhow::Result<Self> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).with_context(|| format!("create dir {dir:?}"))?;

        Ok(Self {
            inner: Arc::new(DbInner {
                versions: VersionSet::new(&dir),
                dir,
                options,
                comparator: Arc::new(BytewiseComparator),
                memtables: MemTableManager::new(),
                next_seqno: AtomicU64::new(1),
                write_mutex: Mutex::new(()),
            }),
        })
    }

    pub fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> anyhow::Result<()> {
        self.write_batch(vec![Op::put(key, value)])
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> anyhow::Result<()> {
        self.write_batch(vec![Op::delete(key)])
    }

    pub fn merge(
        &self,
        key: impl Into<Bytes>,
        operand: impl Into<Bytes>,
    ) -> anyhow::Result<()> {
        self.write_batch(vec![Op::merge(key, operand)])
    }

    pub fn delete_range(
        &self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
    ) -> anyhow::Result<()> {
        self.write_batch(vec![Op::delete_range(start, end)])
    }

    pub fn write_batch(&self, ops: Vec<Op>) -> anyhow::Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        for op in &ops {
            if op.kind == OpKind::RangeDel {
                anyhow::ensure!(
                    self.inner.comparator.compare(op.key.as_ref(), op.value.as_ref())
                        == std::cmp::Ordering::Less,
                    "delete_range requires start < end"
                );
            }
        }

        let _write_guard = self.inner.write_mutex.lock();
        let seqno_base = self
            .inner
            .next_seqno
            .fetch_add(ops.len() as u64, Ordering::Relaxed);
        self.inner.memtables.apply_batch(seqno_base, &ops);

        if self.inner.memtables.mutable().approximate_bytes() >= self.inner.options.memtable_bytes
        {
            self.inner.memtables.rotate();
        }
        Ok(())
    }

    /// Highest sequence number assigned so far.
    pub fn latest_seqno(&self) -> u64 {
        self.inner.next_seqno.load(Ordering::Relaxed).saturating_sub(1)
    }

    /// Rotates the mutable memtable into the immutable queue without
    /// writing it out. A later [`Db::flush`] drains the queue.
    pub fn freeze_memtable(&self) {
        let _write_guard = self.inner.write_mutex.lock();
        self.inner.memtables.rotate();
    }

    /// Rotates the mutable memtable and writes every immutable memtable
    /// (oldest first) to its own level-0 file. Returns how many files
    /// were written.
    pub fn flush(&self) -> anyhow::Result<usize> {
        let _write_guard = self.inner.write_mutex.lock();
        self.inner.memtables.rotate();

        let mut flushed = 0;
        while let Some(mem) = self.inner.memtables.oldest_immutable() {
            let file_id = self.inner.versions.allocate_file_id();
            self.write_l0_file(&mem, file_id)
                .with_context(|| format!("flush memtable to sst {file_id}"))?;
            self.inner.memtables.pop_oldest_immutable();
            flushed += 1;
            debug!(file_id, "flushed memtable to level-0");
        }
        Ok(flushed)
    }

    fn write_l0_file(&self, mem: &Arc<MemTable>, file_id: u64) -> anyhow::Result<()> {
        let mut builder = SstBuilder::create(
            &self.inner.dir,
            file_id,
            self.inner.options.sst_block_bytes,
        )?;
        for (key, value) in mem.sorted_entries() {
            builder.add(&key, value.as_ref())?;
        }
        let (_, path) = builder.finish()?;

        let reader = SstReader::open(&path)?;
        self.inner.versions.install_l0(SstFile {
            file_id,
            reader: Arc::new(reader),
        });
        Ok(())
    }

    /// Registers an externally built SST at the given level (0 for L0).
    /// The engine's sequence counter advances past the file's newest
    /// record so later writes shadow it.
    pub fn ingest_sst(&self, path: impl AsRef<Path>, level: usize) -> anyhow::Result<()> {
        let _write_guard = self.inner.write_mutex.lock();
        let max_seqno = self
            .inner
            .versions
            .ingest(path.as_ref(), level)
            .with_context(|| format!("ingest sst {}", path.as_ref().display()))?;

        self.inner
            .next_seqno
            .fetch_max(max_seqno.saturating_add(1), Ordering::Relaxed);
        debug!(level, max_seqno, "ingested sst");
        Ok(())
    }

    /// Smallest live user key in the database, if any.
    pub fn get_smallest(&self, opts: ReadOptions) -> anyhow::Result<Option<Bytes>> {
        self.get_smallest_at_or_after(Bytes::new(), opts)
    }

    /// Smallest live user key at or after `target`. An empty target means
    /// "smallest overall".
    pub fn get_smallest_at_or_after(
        &self,
        target: impl AsRef<[u8]>,
        opts: ReadOptions,
    ) -> anyhow::Result<Option<Bytes>> {
        anyhow::ensure!(
            opts.snapshot.is_none(),
            "get-smallest reads the latest visible state; snapshot reads are not supported"
        );

        let sv = self.superversion();
        crate::smallest::get_smallest_at_or_after(
            &sv,
            self.inner.comparator.clone(),
            target.as_ref(),
            self.inner.options.validate_smallest_progress,
        )
    }

    /// Pins the current state for one query.
    ///
    /// Order matters: the mutable table is read before the immutable
    /// list, and memtables before the version. A concurrent rotate or
    /// flush can then only make data show up twice (memtable and L0),
    /// never vanish; duplicate records are harmless to readers.
    pub(crate) fn superversion(&self) -> SuperVersion {
        let mem = self.inner.memtables.mutable();
        let imms = self.inner.memtables.immutables();
        let version = self.inner.versions.current();
        SuperVersion { mem, imms, version }
    }
}
