//! Iterator adapters for the get-smallest read path.
//!
//! A level source exposes point data through [`LevelDataIter`]; the
//! adapters layer the exclusive upper bound (the current candidate
//! smallest key) on top, recomputing validity after every move, so the
//! level processor never sees a position at or past the bound.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::comparator::KeyComparator;
use crate::internal_key::InternalKey;
use crate::range_tombstone::RangeTombstone;

/// Forward cursor over one level's internal keys.
///
/// `seek` positions at the first internal key whose user key is at or
/// after the target, newest record first. There is no reverse traversal.
pub trait LevelDataIter {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self) -> anyhow::Result<()>;
    fn seek(&mut self, user_key: &[u8]) -> anyhow::Result<()>;
    fn next(&mut self) -> anyhow::Result<()>;
    /// Current internal key. Panics if the cursor is invalid.
    fn key(&self) -> &InternalKey;
}

/// Value-iterator adapter: a level cursor bounded above (exclusively) by
/// the candidate smallest key.
pub struct ValuesIter {
    inner: Box<dyn LevelDataIter>,
    cmp: Arc<dyn KeyComparator>,
    upper_bound: Option<Bytes>,
    valid: bool,
}

impl ValuesIter {
    pub fn new(
        inner: Box<dyn LevelDataIter>,
        cmp: Arc<dyn KeyComparator>,
        upper_bound: Option<Bytes>,
    ) -> Self {
        Self {
            inner,
            cmp,
            upper_bound,
            valid: false,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &InternalKey {
        debug_assert!(self.valid);
        self.inner.key()
    }

    pub fn seek_to_first(&mut self) -> anyhow::Result<()> {
        self.inner.seek_to_first()?;
        self.refresh_validity();
        self.trace_move("seek_to_first");
        Ok(())
    }

    pub fn seek(&mut self, user_key: &[u8]) -> anyhow::Result<()> {
        self.inner.seek(user_key)?;
        self.refresh_validity();
        self.trace_move("seek");
        Ok(())
    }

    pub fn next(&mut self) -> anyhow::Result<()> {
        debug_assert!(self.valid, "next on invalid values iterator");
        self.inner.next()?;
        self.refresh_validity();
        self.trace_move("next");
        Ok(())
    }

    pub fn set_upper_bound(&mut self, upper_bound: Bytes) {
        self.upper_bound = Some(upper_bound);
        self.refresh_validity();
    }

    pub fn upper_bound(&self) -> Option<&Bytes> {
        self.upper_bound.as_ref()
    }

    fn refresh_validity(&mut self) {
        self.valid = self.inner.valid()
            && match &self.upper_bound {
                // The bound is the candidate smallest key itself, so it is
                // excluded from iteration.
                Some(bound) => {
                    self.cmp
                        .compare(self.inner.key().user_key.as_ref(), bound)
                        == Ordering::Less
                }
                None => true,
            };
    }

    fn trace_move(&self, action: &str) {
        if self.valid {
            trace!(
                action,
                user_key = ?self.inner.key().user_key,
                seqno = self.inner.key().seqno,
                "values iterator moved"
            );
        } else {
            trace!(action, "values iterator moved to invalid");
        }
    }
}

/// Range-tombstone adapter over a level's *fragmented* tombstones.
///
/// Fragments are sorted by start and pairwise disjoint. A level without
/// tombstones gets an adapter that is permanently invalid. `tombstone()`
/// clips the current fragment at the upper bound.
pub struct RangeTombstoneIter {
    fragments: Vec<RangeTombstone>,
    pos: usize,
    cmp: Arc<dyn KeyComparator>,
    upper_bound: Option<Bytes>,
    valid: bool,
}

impl RangeTombstoneIter {
    pub fn new(
        fragments: Vec<RangeTombstone>,
        cmp: Arc<dyn KeyComparator>,
        upper_bound: Option<Bytes>,
    ) -> Self {
        Self {
            fragments,
            pos: 0,
            cmp,
            upper_bound,
            valid: false,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn seek_to_first(&mut self) {
        self.pos = 0;
        self.refresh_validity();
        self.trace_move("seek_to_first");
    }

    /// Positions at the first fragment whose end is past `user_key`: the
    /// fragment covering the key, or the nearest one after it.
    pub fn seek(&mut self, user_key: &[u8]) {
        let cmp = &*self.cmp;
        self.pos = self
            .fragments
            .partition_point(|ts| cmp.compare(ts.end_key.as_ref(), user_key) != Ordering::Greater);
        self.refresh_validity();
        self.trace_move("seek");
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid, "next on invalid range-tombstone iterator");
        self.pos += 1;
        self.refresh_validity();
        self.trace_move("next");
    }

    /// Current fragment, clipped at the upper bound.
    pub fn tombstone(&self) -> RangeTombstone {
        debug_assert!(self.valid);
        let ts = &self.fragments[self.pos];
        match &self.upper_bound {
            Some(bound)
                if self.cmp.compare(ts.end_key.as_ref(), bound) == Ordering::Greater =>
            {
                RangeTombstone::new(ts.start_key.clone(), bound.clone(), ts.seqno)
            }
            _ => ts.clone(),
        }
    }

    pub fn set_upper_bound(&mut self, upper_bound: Bytes) {
        self.upper_bound = Some(upper_bound);
        self.refresh_validity();
    }

    fn refresh_validity(&mut self) {
        self.valid = match self.fragments.get(self.pos) {
            None => false,
            Some(ts) => match &self.upper_bound {
                // A fragment starting at the bound is entirely excluded.
                Some(bound) => {
                    self.cmp.compare(ts.start_key.as_ref(), bound) == Ordering::Less
                }
                None => true,
            },
        };
    }

    fn trace_move(&self, action: &str) {
        if self.valid {
            let ts = self.tombstone();
            trace!(
                action,
                start = ?ts.start_key,
                end = ?ts.end_key,
                seqno = ts.seqno,
                "range-tombstone iterator moved"
            );
        } else {
            trace!(action, "range-tombstone iterator moved to invalid");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::internal_key::KeyKind;

    struct VecIter {
        keys: Vec<InternalKey>,
        pos: usize,
    }

    impl VecIter {
        fn new(keys: Vec<InternalKey>) -> Self {
            Self { keys, pos: 0 }
        }
    }

    impl LevelDataIter for VecIter {
        fn valid(&self) -> bool {
            self.pos < self.keys.len()
        }

        fn seek_to_first(&mut self) -> anyhow::Result<()> {
            self.pos = 0;
            Ok(())
        }

        fn seek(&mut self, user_key: &[u8]) -> anyhow::Result<()> {
            self.pos = self
                .keys
                .partition_point(|k| k.user_key.as_ref() < user_key);
            Ok(())
        }

        fn next(&mut self) -> anyhow::Result<()> {
            self.pos += 1;
            Ok(())
        }

        fn key(&self) -> &InternalKey {
            &self.keys[self.pos]
        }
    }

    fn cmp() -> Arc<dyn KeyComparator> {
        Arc::new(BytewiseComparator)
    }

    fn keys(users: &[&'static [u8]]) -> Vec<InternalKey> {
        users
            .iter()
            .enumerate()
            .map(|(i, u)| InternalKey::new(Bytes::from_static(u), i as u64, KeyKind::Put))
            .collect()
    }

    fn ts(start: &'static [u8], end: &'static [u8], seqno: u64) -> RangeTombstone {
        RangeTombstone::new(Bytes::from_static(start), Bytes::from_static(end), seqno)
    }

    #[test]
    fn values_iter_enforces_exclusive_upper_bound() {
        let inner = Box::new(VecIter::new(keys(&[b"a", b"c", b"e"])));
        let mut iter = ValuesIter::new(inner, cmp(), Some(Bytes::from_static(b"e")));

        iter.seek_to_first().unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key().user_key.as_ref(), b"a");

        iter.next().unwrap();
        assert_eq!(iter.key().user_key.as_ref(), b"c");

        // "e" equals the bound and is excluded.
        iter.next().unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn values_iter_tightening_bound_invalidates_in_place() {
        let inner = Box::new(VecIter::new(keys(&[b"c"])));
        let mut iter = ValuesIter::new(inner, cmp(), None);
        iter.seek_to_first().unwrap();
        assert!(iter.valid());

        iter.set_upper_bound(Bytes::from_static(b"c"));
        assert!(!iter.valid());
    }

    #[test]
    fn values_iter_unbounded_when_no_csk() {
        let inner = Box::new(VecIter::new(keys(&[b"z"])));
        let mut iter = ValuesIter::new(inner, cmp(), None);
        iter.seek(b"y").unwrap();
        assert!(iter.valid());
    }

    #[test]
    fn tombstone_iter_seeks_to_covering_fragment() {
        let mut iter = RangeTombstoneIter::new(
            vec![ts(b"a", b"c", 5), ts(b"f", b"j", 7)],
            cmp(),
            None,
        );

        iter.seek(b"b");
        assert_eq!(iter.tombstone(), ts(b"a", b"c", 5));

        // Past the first fragment's end: lands on the next fragment.
        iter.seek(b"c");
        assert_eq!(iter.tombstone(), ts(b"f", b"j", 7));

        iter.seek(b"j");
        assert!(!iter.valid());
    }

    #[test]
    fn tombstone_iter_clips_at_upper_bound() {
        let mut iter = RangeTombstoneIter::new(
            vec![ts(b"b", b"m", 9)],
            cmp(),
            Some(Bytes::from_static(b"f")),
        );
        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(iter.tombstone(), ts(b"b", b"f", 9));
    }

    #[test]
    fn tombstone_iter_invalid_when_fragment_starts_at_bound() {
        let mut iter = RangeTombstoneIter::new(
            vec![ts(b"f", b"m", 9)],
            cmp(),
            Some(Bytes::from_static(b"f")),
        );
        iter.seek_to_first();
        assert!(!iter.valid());
    }

    #[test]
    fn absent_tombstones_are_permanently_invalid() {
        let mut iter = RangeTombstoneIter::new(Vec::new(), cmp(), None);
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek(b"a");
        assert!(!iter.valid());
    }
}
