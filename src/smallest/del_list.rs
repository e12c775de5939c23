//! Global deletion list.
//!
//! Accumulates the shadow of newer levels while the get-smallest sweep
//! descends: point deletes and range-tombstone spans, as an ordered,
//! pairwise-disjoint, coalesced interval list trimmed to stay below the
//! candidate smallest key.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::comparator::KeyComparator;

/// A point key or half-open `[start, end)` range known to be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelElement {
    Key(Bytes),
    Range { start: Bytes, end: Bytes },
}

impl DelElement {
    pub fn key(key: Bytes) -> Self {
        Self::Key(key)
    }

    pub fn range(start: Bytes, end: Bytes) -> Self {
        Self::Range { start, end }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    pub fn start(&self) -> &Bytes {
        match self {
            Self::Key(key) => key,
            Self::Range { start, .. } => start,
        }
    }

    pub fn contains(&self, user_key: &[u8], cmp: &dyn KeyComparator) -> bool {
        match self {
            Self::Key(key) => cmp.compare(key, user_key) == Ordering::Equal,
            Self::Range { start, end } => {
                cmp.compare(start, user_key) != Ordering::Greater
                    && cmp.compare(user_key, end) == Ordering::Less
            }
        }
    }

    /// Merges with an element that starts at or after this one. `None`
    /// when they neither overlap nor touch. A point at a range's
    /// exclusive end is *not* mergeable: a half-open range cannot absorb
    /// it.
    fn try_merge(&self, other: &DelElement, cmp: &dyn KeyComparator) -> Option<DelElement> {
        match (self, other) {
            (Self::Range { start, end }, Self::Range { start: s2, end: e2 }) => {
                if cmp.compare(end, s2) == Ordering::Less {
                    return None;
                }
                let merged_end = if cmp.compare(end, e2) == Ordering::Less {
                    e2.clone()
                } else {
                    end.clone()
                };
                Some(Self::Range {
                    start: start.clone(),
                    end: merged_end,
                })
            }
            (Self::Range { end, .. }, Self::Key(point)) => {
                if cmp.compare(point, end) == Ordering::Less {
                    Some(self.clone())
                } else {
                    None
                }
            }
            (Self::Key(point), Self::Range { start, .. }) => {
                if cmp.compare(point, start) == Ordering::Equal {
                    Some(other.clone())
                } else {
                    None
                }
            }
            (Self::Key(a), Self::Key(b)) => {
                if cmp.compare(a, b) == Ordering::Equal {
                    Some(self.clone())
                } else {
                    None
                }
            }
        }
    }
}

fn entirely_before(elem: &DelElement, key: &[u8], cmp: &dyn KeyComparator) -> bool {
    match elem {
        DelElement::Key(point) => cmp.compare(point, key) == Ordering::Less,
        DelElement::Range { end, .. } => cmp.compare(end, key) != Ordering::Greater,
    }
}

/// The deletion list plus its single cursor.
///
/// One get-smallest query owns exactly one cursor, so the cursor lives in
/// the list itself as an index. Insert positions are trusted to be
/// in-order (callers insert only elements that precede the cursor's
/// element); coalescing keeps the invariants after every operation.
pub struct GlobalDelList {
    cmp: Arc<dyn KeyComparator>,
    elems: Vec<DelElement>,
    pos: usize,
    upper_bound: Option<Bytes>,
}

impl GlobalDelList {
    pub fn new(cmp: Arc<dyn KeyComparator>) -> Self {
        Self {
            cmp,
            elems: Vec::new(),
            pos: 0,
            upper_bound: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn elements(&self) -> &[DelElement] {
        &self.elems
    }

    pub fn cursor_valid(&self) -> bool {
        self.pos < self.elems.len()
    }

    pub fn current(&self) -> &DelElement {
        self.elems.get(self.pos).expect("del-list cursor is invalid")
    }

    pub fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    pub fn seek(&mut self, target: &[u8]) {
        self.pos = self.elems.len();
        self.seek_forward(target);
    }

    /// Moves the cursor forward to the first element that contains or is
    /// after `key`. The caller promises `key` is at or past the current
    /// element's start. A short linear scan usually finds the element in
    /// the immediate neighborhood; otherwise binary search takes over.
    pub fn seek_forward(&mut self, key: &[u8]) {
        let mut i = if self.cursor_valid() { self.pos } else { 0 };
        let mut scanned = 0;
        while scanned < 2 && i < self.elems.len() {
            if !entirely_before(&self.elems[i], key, &*self.cmp) {
                self.pos = i;
                return;
            }
            i += 1;
            scanned += 1;
        }
        let cmp = &*self.cmp;
        let off = self.elems[i..].partition_point(|elem| entirely_before(elem, key, cmp));
        self.pos = i + off;
    }

    pub fn advance(&mut self) {
        debug_assert!(self.cursor_valid(), "advance on invalid del-list cursor");
        self.pos += 1;
    }

    /// Inserts immediately before the cursor, coalescing with neighbors.
    /// The cursor stays on the element it pointed to (which the insertion
    /// may have been merged into).
    pub fn insert_before_cursor(&mut self, elem: DelElement) {
        self.insert_impl(elem, false);
    }

    /// Same as [`Self::insert_before_cursor`], leaving the cursor on the
    /// inserted (possibly coalesced) element.
    pub fn insert_before_cursor_on_inserted(&mut self, elem: DelElement) {
        self.insert_impl(elem, true);
    }

    fn insert_impl(&mut self, elem: DelElement, cursor_on_inserted: bool) {
        let cursor_was_valid = self.cursor_valid();
        let at = self.pos.min(self.elems.len());
        self.elems.insert(at, elem);
        let (idx, merged_right) = self.coalesce_at(at);

        self.pos = if cursor_on_inserted {
            idx
        } else if !cursor_was_valid {
            self.elems.len()
        } else if merged_right > 0 {
            // The old cursor element was merged into the inserted one.
            idx
        } else {
            idx + 1
        };
        self.debug_check();
    }

    /// Replaces the cursor element, coalescing outward; the cursor ends on
    /// the (possibly widened) replacement.
    pub fn replace_current(&mut self, elem: DelElement) {
        debug_assert!(self.cursor_valid(), "replace on invalid del-list cursor");
        if !self.cursor_valid() {
            return;
        }
        self.elems[self.pos] = elem;
        let (idx, _) = self.coalesce_at(self.pos);
        self.pos = idx;
        self.debug_check();
    }

    /// Drops everything at or beyond `upper_bound`; a range straddling the
    /// bound is clipped to `[start, upper_bound)`.
    pub fn trim(&mut self, upper_bound: &[u8]) {
        let cmp = &*self.cmp;
        let cut = self
            .elems
            .partition_point(|elem| entirely_before(elem, upper_bound, cmp));

        if cut < self.elems.len() {
            let clip = match &self.elems[cut] {
                DelElement::Range { start, .. }
                    if self.cmp.compare(start, upper_bound) == Ordering::Less =>
                {
                    Some(DelElement::range(
                        start.clone(),
                        Bytes::copy_from_slice(upper_bound),
                    ))
                }
                _ => None,
            };
            match clip {
                Some(clipped) => {
                    self.elems[cut] = clipped;
                    self.elems.truncate(cut + 1);
                }
                None => self.elems.truncate(cut),
            }
        }

        self.upper_bound = Some(Bytes::copy_from_slice(upper_bound));
        self.pos = self.pos.min(self.elems.len());
        self.debug_check();
    }

    /// Coalesces around `idx`; returns the merged element's index and how
    /// many right-hand neighbors were absorbed.
    fn coalesce_at(&mut self, mut idx: usize) -> (usize, usize) {
        if idx > 0 {
            if let Some(merged) = self.elems[idx - 1].try_merge(&self.elems[idx], &*self.cmp) {
                self.elems[idx - 1] = merged;
                self.elems.remove(idx);
                idx -= 1;
            }
        }
        let mut merged_right = 0;
        while idx + 1 < self.elems.len() {
            match self.elems[idx].try_merge(&self.elems[idx + 1], &*self.cmp) {
                Some(merged) => {
                    self.elems[idx] = merged;
                    self.elems.remove(idx + 1);
                    merged_right += 1;
                }
                None => break,
            }
        }
        (idx, merged_right)
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        self.assert_invariants();
    }

    /// Order, disjointness, coalescing, and upper-bound containment.
    pub fn assert_invariants(&self) {
        let cmp = &*self.cmp;
        for elem in &self.elems {
            if let DelElement::Range { start, end } = elem {
                assert!(
                    cmp.compare(start, end) == Ordering::Less,
                    "empty del-list range"
                );
            }
        }
        for pair in self.elems.windows(2) {
            assert!(
                cmp.compare(pair[0].start(), pair[1].start()) == Ordering::Less,
                "del-list not strictly ordered by start"
            );
            assert!(
                entirely_before(&pair[0], pair[1].start(), cmp),
                "del-list elements overlap"
            );
            assert!(
                pair[0].try_merge(&pair[1], cmp).is_none(),
                "del-list neighbors should have been coalesced"
            );
        }
        if let Some(bound) = &self.upper_bound {
            for elem in &self.elems {
                assert!(
                    entirely_before(elem, bound, cmp),
                    "del-list element reaches past the upper bound"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn list() -> GlobalDelList {
        GlobalDelList::new(Arc::new(BytewiseComparator))
    }

    fn range(start: &'static [u8], end: &'static [u8]) -> DelElement {
        DelElement::range(Bytes::from_static(start), Bytes::from_static(end))
    }

    fn point(key: &'static [u8]) -> DelElement {
        DelElement::key(Bytes::from_static(key))
    }

    #[test]
    fn inserts_append_in_order() {
        let mut dl = list();
        dl.seek_to_first();
        dl.insert_before_cursor(range(b"a", b"c"));
        dl.insert_before_cursor(range(b"f", b"h"));
        assert_eq!(dl.elements(), &[range(b"a", b"c"), range(b"f", b"h")]);
        assert!(!dl.cursor_valid());
    }

    #[test]
    fn touching_ranges_coalesce() {
        let mut dl = list();
        dl.insert_before_cursor(range(b"c", b"e"));
        dl.seek_to_first();
        dl.insert_before_cursor(range(b"a", b"c"));
        assert_eq!(dl.elements(), &[range(b"a", b"e")]);
        // Cursor stays on the element it pointed to, now the merged one.
        assert!(dl.cursor_valid());
        assert_eq!(dl.current(), &range(b"a", b"e"));
    }

    #[test]
    fn point_covered_by_range_is_absorbed() {
        let mut dl = list();
        dl.insert_before_cursor(range(b"b", b"f"));
        dl.seek_to_first();
        dl.insert_before_cursor_on_inserted(point(b"b"));
        assert_eq!(dl.elements(), &[range(b"b", b"f")]);
        assert_eq!(dl.current(), &range(b"b", b"f"));
    }

    #[test]
    fn point_at_range_end_stays_separate() {
        let mut dl = list();
        dl.insert_before_cursor(point(b"f"));
        dl.seek_to_first();
        dl.insert_before_cursor(range(b"b", b"f"));
        assert_eq!(dl.elements(), &[range(b"b", b"f"), point(b"f")]);
    }

    #[test]
    fn insert_on_inserted_sets_cursor() {
        let mut dl = list();
        dl.insert_before_cursor(range(b"m", b"p"));
        dl.seek_to_first();
        dl.insert_before_cursor_on_inserted(point(b"c"));
        assert!(dl.cursor_valid());
        assert_eq!(dl.current(), &point(b"c"));
        assert_eq!(dl.elements(), &[point(b"c"), range(b"m", b"p")]);
    }

    #[test]
    fn replace_coalesces_forward_across_multiple() {
        let mut dl = list();
        dl.insert_before_cursor(range(b"a", b"b"));
        dl.insert_before_cursor(range(b"c", b"d"));
        dl.insert_before_cursor(range(b"e", b"f"));
        dl.insert_before_cursor(point(b"x"));
        dl.seek_to_first();
        // Widen the first element far enough to swallow the next two.
        dl.replace_current(range(b"a", b"g"));
        assert_eq!(dl.elements(), &[range(b"a", b"g"), point(b"x")]);
        assert_eq!(dl.current(), &range(b"a", b"g"));
    }

    #[test]
    fn seek_forward_stops_on_containing_element() {
        let mut dl = list();
        dl.insert_before_cursor(range(b"a", b"c"));
        dl.insert_before_cursor(range(b"e", b"h"));
        dl.insert_before_cursor(point(b"k"));
        dl.insert_before_cursor(range(b"m", b"q"));

        dl.seek(b"f");
        assert_eq!(dl.current(), &range(b"e", b"h"));

        // Monotonic continuation from the current position.
        dl.seek_forward(b"h");
        assert_eq!(dl.current(), &point(b"k"));

        dl.seek_forward(b"k");
        assert_eq!(dl.current(), &point(b"k"));

        dl.seek_forward(b"z");
        assert!(!dl.cursor_valid());
    }

    #[test]
    fn seek_uses_binary_search_beyond_scan_window() {
        let mut dl = list();
        let spans: &[(&'static [u8], &'static [u8])] = &[
            (b"a", b"b"),
            (b"c", b"d"),
            (b"e", b"f"),
            (b"g", b"h"),
            (b"i", b"j"),
            (b"k", b"l"),
        ];
        for (start, end) in spans {
            dl.insert_before_cursor(range(start, end));
        }
        dl.seek(b"i");
        assert_eq!(dl.current(), &range(b"i", b"j"));
    }

    #[test]
    fn trim_clips_straddling_range() {
        let mut dl = list();
        dl.insert_before_cursor(range(b"a", b"c"));
        dl.insert_before_cursor(range(b"d", b"i"));
        dl.insert_before_cursor(point(b"j"));

        dl.trim(b"f");
        assert_eq!(dl.elements(), &[range(b"a", b"c"), range(b"d", b"f")]);

        // A range ending exactly at the bound survives untouched.
        dl.trim(b"f");
        assert_eq!(dl.elements(), &[range(b"a", b"c"), range(b"d", b"f")]);

        dl.trim(b"a");
        assert!(dl.is_empty());
    }

    #[test]
    fn trim_drops_point_at_bound() {
        let mut dl = list();
        dl.insert_before_cursor(point(b"c"));
        dl.insert_before_cursor(point(b"e"));
        dl.trim(b"e");
        assert_eq!(dl.elements(), &[point(b"c")]);
    }

    #[test]
    fn contains_semantics() {
        let cmp = BytewiseComparator;
        assert!(range(b"b", b"d").contains(b"b", &cmp));
        assert!(range(b"b", b"d").contains(b"c", &cmp));
        assert!(!range(b"b", b"d").contains(b"d", &cmp));
        assert!(point(b"b").contains(b"b", &cmp));
        assert!(!point(b"b").contains(b"c", &cmp));
    }
}
