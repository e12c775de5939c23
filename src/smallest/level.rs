//! Per-level processing for the get-smallest sweep.
//!
//! One level runs until it either produces a new candidate smallest key
//! (which terminates the level — deeper levels can only do better below
//! it) or exhausts both of its iterators, leaving its deletions folded
//! into the global del-list for the levels below.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::internal_key::ValueCategory;
use crate::range_tombstone::RangeTombstone;

use super::compare::{
    compare_del_elem_to_range_ts, compare_del_elem_to_user_key, compare_range_ts_to_user_key,
    DelElemVsRangeTs, RelativePos,
};
use super::del_list::DelElement;
use super::iter::{RangeTombstoneIter, ValuesIter};
use super::GlobalContext;

pub struct LevelContext {
    pub values: ValuesIter,
    pub tombstones: RangeTombstoneIter,
    pub new_csk_found: bool,
}

impl LevelContext {
    pub fn new(values: ValuesIter, tombstones: RangeTombstoneIter) -> Self {
        Self {
            values,
            tombstones,
            new_csk_found: false,
        }
    }
}

pub fn process_level(gc: &mut GlobalContext, lc: &mut LevelContext) -> anyhow::Result<()> {
    if gc.target.is_empty() {
        gc.del_list.seek_to_first();
        lc.values.seek_to_first()?;
        lc.tombstones.seek_to_first();
    } else {
        let target = gc.target.clone();
        gc.del_list.seek(&target);
        lc.values.seek(&target)?;
        lc.tombstones.seek(&target);
    }

    let mut progress = ProgressValidator::new(gc.validate_progress);

    while !lc.new_csk_found && (lc.values.valid() || lc.tombstones.valid()) {
        progress.observe(gc, lc)?;

        if !lc.values.valid() {
            // Only tombstones remain; fold them into the del-list.
            let ts = lc.tombstones.tombstone();
            process_range_ts_vs_del_list(gc, lc, &ts);
            continue;
        }

        let (user_key, seqno, category) = {
            let key = lc.values.key();
            (key.user_key.clone(), key.seqno, key.kind.value_category())
        };
        if category == ValueCategory::Other {
            lc.values.next()?;
            continue;
        }

        if !lc.tombstones.valid() {
            process_values_vs_del_list(gc, lc, &user_key, category)?;
            continue;
        }

        let ts = lc.tombstones.tombstone();
        match compare_range_ts_to_user_key(&ts, user_key.as_ref(), &*gc.cmp) {
            RelativePos::Before => process_range_ts_vs_del_list(gc, lc, &ts),

            RelativePos::After => {
                process_values_vs_del_list(gc, lc, &user_key, category)?;
            }

            RelativePos::Overlap => {
                if category == ValueCategory::DelKey {
                    // The tombstone already covers this span; the point
                    // delete is redundant in the del-list.
                    lc.values.next()?;
                    continue;
                }

                if ts.seqno < seqno {
                    // Tombstone is older than the value. The value may be
                    // the new candidate; if it is, the tombstone must
                    // still be folded in before the level terminates, so
                    // deeper levels see it. Re-read it after the update:
                    // the new candidate tightened the clip bound, and the
                    // del-list must stay inside [target, csk).
                    let found = process_values_vs_del_list(gc, lc, &user_key, category)?;
                    if found && lc.tombstones.valid() {
                        let clipped = lc.tombstones.tombstone();
                        process_range_ts_vs_del_list(gc, lc, &clipped);
                    }
                } else {
                    // Tombstone shadows the value.
                    lc.values.next()?;
                }
            }
        }
    }

    debug!(
        new_csk_found = lc.new_csk_found,
        csk = ?gc.csk,
        "level processing ended"
    );
    Ok(())
}

/// Weighs the current values-iterator key against the del-list head.
/// Returns whether a new candidate smallest key was installed.
fn process_values_vs_del_list(
    gc: &mut GlobalContext,
    lc: &mut LevelContext,
    user_key: &Bytes,
    category: ValueCategory,
) -> anyhow::Result<bool> {
    let rel = if gc.del_list.cursor_valid() {
        compare_del_elem_to_user_key(gc.del_list.current(), user_key.as_ref(), &*gc.cmp)
    } else {
        RelativePos::After
    };

    match rel {
        RelativePos::Before => {
            gc.del_list.seek_forward(user_key.as_ref());
        }

        RelativePos::After => match category {
            ValueCategory::Value | ValueCategory::MergeValue => {
                update_csk(gc, lc, user_key.clone());
            }
            ValueCategory::DelKey => {
                gc.del_list
                    .insert_before_cursor_on_inserted(DelElement::key(user_key.clone()));
                lc.values.next()?;
            }
            ValueCategory::Other => unreachable!("other-category records are skipped earlier"),
        },

        RelativePos::Overlap => {
            // The key is already deleted; hop the values iterator past
            // the covered region.
            match gc.del_list.current() {
                DelElement::Range { end, .. } => {
                    let end = end.clone();
                    lc.values.seek(end.as_ref())?;
                }
                DelElement::Key(_) => lc.values.next()?,
            }
        }
    }

    Ok(lc.new_csk_found)
}

/// Folds the current (clipped) range tombstone into the del-list.
fn process_range_ts_vs_del_list(gc: &mut GlobalContext, lc: &mut LevelContext, ts: &RangeTombstone) {
    if !gc.del_list.cursor_valid() {
        // Del-list exhausted: the tombstone extends it.
        gc.del_list.insert_before_cursor(DelElement::range(
            ts.start_key.clone(),
            ts.end_key.clone(),
        ));
        lc.tombstones.next();
        return;
    }

    match compare_del_elem_to_range_ts(gc.del_list.current(), ts, &*gc.cmp) {
        DelElemVsRangeTs::Before => {
            gc.del_list.seek_forward(ts.start_key.as_ref());
        }

        DelElemVsRangeTs::After => {
            gc.del_list.insert_before_cursor(DelElement::range(
                ts.start_key.clone(),
                ts.end_key.clone(),
            ));
            lc.tombstones.next();
        }

        DelElemVsRangeTs::Overlap { start_rel, end_rel } => {
            let elem_starts_at_or_before_ts =
                matches!(start_rel, RelativePos::Before | RelativePos::Overlap);
            let elem_ends_before_ts = end_rel == RelativePos::Before;

            match (elem_starts_at_or_before_ts, elem_ends_before_ts) {
                (true, true) => {
                    // Extend the element rightward to the tombstone's end.
                    let start = gc.del_list.current().start().clone();
                    gc.del_list
                        .replace_current(DelElement::range(start, ts.end_key.clone()));
                    gc.del_list.seek_forward(ts.end_key.as_ref());
                }
                (true, false) => {
                    // The element already contains the whole tombstone;
                    // nothing to record. Skipping the fragment keeps the
                    // loop moving.
                    lc.tombstones.next();
                }
                (false, true) => {
                    // The tombstone strictly contains the element.
                    gc.del_list.replace_current(DelElement::range(
                        ts.start_key.clone(),
                        ts.end_key.clone(),
                    ));
                    gc.del_list.seek_forward(ts.end_key.as_ref());
                }
                (false, false) => {
                    // Partial overlap, element extends beyond the
                    // tombstone: widen leftward, then resume tombstones
                    // past the element.
                    let end = match gc.del_list.current() {
                        DelElement::Range { end, .. } => end.clone(),
                        DelElement::Key(key) => key.clone(),
                    };
                    gc.del_list
                        .replace_current(DelElement::range(ts.start_key.clone(), end.clone()));
                    lc.tombstones.seek(end.as_ref());
                }
            }
        }
    }
}

fn update_csk(gc: &mut GlobalContext, lc: &mut LevelContext, new_csk: Bytes) {
    debug!(old = ?gc.csk, new = ?new_csk, "updating candidate smallest key");
    // The candidate only tightens: the values iterator is bounded
    // exclusively by the previous candidate.
    debug_assert!(gc.csk.as_ref().map_or(true, |old| {
        gc.cmp.compare(new_csk.as_ref(), old.as_ref()) == std::cmp::Ordering::Less
    }));

    gc.del_list.trim(new_csk.as_ref());
    lc.tombstones.set_upper_bound(new_csk.clone());
    // The values iterator is parked exactly on the new candidate; its
    // bound is left alone because the level terminates here.
    gc.csk = Some(new_csk);
    lc.new_csk_found = true;
}

/// Optional per-iteration progress check: every loop turn must move the
/// values iterator, the tombstone iterator, or the del-list cursor.
struct ProgressValidator {
    enabled: bool,
    first: bool,
    values_key: Option<crate::internal_key::InternalKey>,
    tombstone: Option<RangeTombstone>,
    del_elem: Option<DelElement>,
}

impl ProgressValidator {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            first: true,
            values_key: None,
            tombstone: None,
            del_elem: None,
        }
    }

    fn observe(&mut self, gc: &GlobalContext, lc: &LevelContext) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let values_key = lc.values.valid().then(|| lc.values.key().clone());
        let tombstone = lc.tombstones.valid().then(|| lc.tombstones.tombstone());
        let del_elem = gc
            .del_list
            .cursor_valid()
            .then(|| gc.del_list.current().clone());

        if !self.first
            && self.values_key == values_key
            && self.tombstone == tombstone
            && self.del_elem == del_elem
        {
            anyhow::bail!(
                "get-smallest level loop made no progress (values={:?}, tombstone={:?}, del={:?})",
                values_key,
                tombstone,
                del_elem
            );
        }
        trace!(?values_key, ?tombstone, ?del_elem, "level loop iteration");

        self.first = false;
        self.values_key = values_key;
        self.tombstone = tombstone;
        self.del_elem = del_elem;
        Ok(())
    }
}
