//! Get-smallest read path.
//!
//! Finds the smallest live user key at or after a target by sweeping the
//! level hierarchy newest to oldest. Two pieces of state thread through
//! the sweep:
//!
//! - the **candidate smallest key** (CSK): best key found so far; an
//!   exclusive upper bound for every level processed after it, only ever
//!   tightening downward;
//! - the **global del-list**: ordered, disjoint, coalesced set of point
//!   and range deletions from newer levels, trimmed to `[target, CSK)`.
//!
//! Invariant tying them together: every key in `[target, CSK)` present at
//! an already-visited level is either covered by the del-list or is the
//! CSK itself.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tracing::debug;

use crate::comparator::KeyComparator;
use crate::db::SuperVersion;
use crate::memtable::{MemTable, MemTableLevelIter};
use crate::range_tombstone::{fragment_tombstones, RangeTombstone};
use crate::version::{LevelConcatIter, SstFile};

pub mod compare;
pub mod del_list;
pub mod iter;
mod level;

use del_list::GlobalDelList;
use iter::{LevelDataIter, RangeTombstoneIter, ValuesIter};
use level::{process_level, LevelContext};

/// Per-query state shared across all levels.
pub(crate) struct GlobalContext {
    pub cmp: Arc<dyn KeyComparator>,
    pub target: Bytes,
    pub csk: Option<Bytes>,
    pub del_list: GlobalDelList,
    pub validate_progress: bool,
}

impl GlobalContext {
    fn level_context(
        &self,
        inner: Box<dyn LevelDataIter>,
        raw_tombstones: Vec<RangeTombstone>,
    ) -> LevelContext {
        LevelContext::new(
            ValuesIter::new(inner, self.cmp.clone(), self.csk.clone()),
            RangeTombstoneIter::new(
                fragment_tombstones(raw_tombstones),
                self.cmp.clone(),
                self.csk.clone(),
            ),
        )
    }
}

/// Runs the sweep against a pinned superversion. `Ok(None)` means no live
/// key at or after `target` exists.
pub(crate) fn get_smallest_at_or_after(
    sv: &SuperVersion,
    cmp: Arc<dyn KeyComparator>,
    target: &[u8],
    validate_progress: bool,
) -> anyhow::Result<Option<Bytes>> {
    let mut gc = GlobalContext {
        cmp: cmp.clone(),
        target: Bytes::copy_from_slice(target),
        csk: None,
        del_list: GlobalDelList::new(cmp),
        validate_progress,
    };

    debug!(query_target = ?gc.target, "get-smallest: processing mutable memtable");
    process_memtable(&mut gc, &sv.mem).context("mutable memtable")?;

    for (i, mem) in sv.imms.iter().enumerate() {
        debug!(index = i, "get-smallest: processing immutable memtable");
        process_memtable(&mut gc, mem).with_context(|| format!("immutable memtable #{i}"))?;
    }

    // L0 files may overlap; each is its own level, newest first.
    for file in sv.version.l0.iter().rev() {
        debug!(file_id = file.file_id, "get-smallest: processing level-0 file");
        process_l0_file(&mut gc, file)
            .with_context(|| format!("level-0 file {}", file.file_id))?;
    }

    for (idx, files) in sv.version.levels.iter().enumerate() {
        let level = idx + 1;
        if files.is_empty() {
            continue;
        }
        debug!(level, files = files.len(), "get-smallest: processing level");
        process_deep_level(&mut gc, files).with_context(|| format!("level {level}"))?;
    }

    if let Some(csk) = &gc.csk {
        debug_assert!(
            gc.target.is_empty()
                || gc.cmp.compare(gc.target.as_ref(), csk.as_ref()) != std::cmp::Ordering::Greater,
            "result key precedes the target"
        );
    }
    debug!(csk = ?gc.csk, "get-smallest finished");
    Ok(gc.csk)
}

fn process_memtable(gc: &mut GlobalContext, mem: &Arc<MemTable>) -> anyhow::Result<()> {
    let mut lc = gc.level_context(
        Box::new(MemTableLevelIter::new(mem.clone())),
        mem.range_tombstones(),
    );
    process_level(gc, &mut lc)
}

fn process_l0_file(gc: &mut GlobalContext, file: &Arc<SstFile>) -> anyhow::Result<()> {
    let mut lc = gc.level_context(
        Box::new(crate::sst::SstLevelIter::new(file.reader.clone())),
        file.range_tombstones().to_vec(),
    );
    process_level(gc, &mut lc)
}

fn process_deep_level(gc: &mut GlobalContext, files: &[Arc<SstFile>]) -> anyhow::Result<()> {
    let raw_tombstones = files
        .iter()
        .flat_map(|f| f.range_tombstones().iter().cloned())
        .collect();
    let mut lc = gc.level_context(
        Box::new(LevelConcatIter::new(files.to_vec())),
        raw_tombstones,
    );
    process_level(gc, &mut lc)
}
