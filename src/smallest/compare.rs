//! Relative-position classifiers for the get-smallest read path.
//!
//! All range endpoints are half-open `[start, end)`; a point del-element
//! is the singleton set of its key.

use crate::comparator::KeyComparator;
use crate::range_tombstone::RangeTombstone;
use std::cmp::Ordering;

use super::del_list::DelElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePos {
    Before,
    Overlap,
    After,
}

fn pos_of(ord: Ordering) -> RelativePos {
    match ord {
        Ordering::Less => RelativePos::Before,
        Ordering::Equal => RelativePos::Overlap,
        Ordering::Greater => RelativePos::After,
    }
}

/// Where a del-element sits relative to a user key.
pub fn compare_del_elem_to_user_key(
    elem: &DelElement,
    key: &[u8],
    cmp: &dyn KeyComparator,
) -> RelativePos {
    match elem {
        DelElement::Key(point) => pos_of(cmp.compare(point, key)),
        DelElement::Range { start, end } => {
            if cmp.compare(end, key) != Ordering::Greater {
                RelativePos::Before
            } else if cmp.compare(start, key) == Ordering::Greater {
                RelativePos::After
            } else {
                RelativePos::Overlap
            }
        }
    }
}

/// Where a range tombstone sits relative to a user key.
pub fn compare_range_ts_to_user_key(
    ts: &RangeTombstone,
    key: &[u8],
    cmp: &dyn KeyComparator,
) -> RelativePos {
    if cmp.compare(ts.end_key.as_ref(), key) != Ordering::Greater {
        RelativePos::Before
    } else if cmp.compare(ts.start_key.as_ref(), key) == Ordering::Greater {
        RelativePos::After
    } else {
        RelativePos::Overlap
    }
}

/// Where a del-element sits relative to a range tombstone. The overlap
/// case also reports how the element's endpoints relate to the
/// tombstone's (`start` vs `start`, `end` vs `end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelElemVsRangeTs {
    Before,
    After,
    Overlap {
        start_rel: RelativePos,
        end_rel: RelativePos,
    },
}

pub fn compare_del_elem_to_range_ts(
    elem: &DelElement,
    ts: &RangeTombstone,
    cmp: &dyn KeyComparator,
) -> DelElemVsRangeTs {
    let (start, end) = match elem {
        DelElement::Key(point) => (point, point),
        DelElement::Range { start, end } => (start, end),
    };

    let entirely_before = match elem {
        // A point at the tombstone's start is inside it.
        DelElement::Key(point) => cmp.compare(point, ts.start_key.as_ref()) == Ordering::Less,
        DelElement::Range { end, .. } => {
            cmp.compare(end, ts.start_key.as_ref()) != Ordering::Greater
        }
    };
    if entirely_before {
        return DelElemVsRangeTs::Before;
    }
    if cmp.compare(start, ts.end_key.as_ref()) != Ordering::Less {
        return DelElemVsRangeTs::After;
    }

    DelElemVsRangeTs::Overlap {
        start_rel: pos_of(cmp.compare(start, ts.start_key.as_ref())),
        end_rel: pos_of(cmp.compare(end, ts.end_key.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use bytes::Bytes;

    const CMP: BytewiseComparator = BytewiseComparator;

    fn range(start: &'static [u8], end: &'static [u8]) -> DelElement {
        DelElement::range(Bytes::from_static(start), Bytes::from_static(end))
    }

    fn point(key: &'static [u8]) -> DelElement {
        DelElement::key(Bytes::from_static(key))
    }

    fn ts(start: &'static [u8], end: &'static [u8]) -> RangeTombstone {
        RangeTombstone::new(Bytes::from_static(start), Bytes::from_static(end), 1)
    }

    #[test]
    fn del_elem_vs_user_key() {
        // Range end is exclusive: [b, d) is entirely before "d".
        assert_eq!(
            compare_del_elem_to_user_key(&range(b"b", b"d"), b"d", &CMP),
            RelativePos::Before
        );
        assert_eq!(
            compare_del_elem_to_user_key(&range(b"b", b"d"), b"a", &CMP),
            RelativePos::After
        );
        assert_eq!(
            compare_del_elem_to_user_key(&range(b"b", b"d"), b"b", &CMP),
            RelativePos::Overlap
        );
        assert_eq!(
            compare_del_elem_to_user_key(&range(b"b", b"d"), b"c", &CMP),
            RelativePos::Overlap
        );

        assert_eq!(
            compare_del_elem_to_user_key(&point(b"c"), b"d", &CMP),
            RelativePos::Before
        );
        assert_eq!(
            compare_del_elem_to_user_key(&point(b"c"), b"c", &CMP),
            RelativePos::Overlap
        );
        assert_eq!(
            compare_del_elem_to_user_key(&point(b"c"), b"b", &CMP),
            RelativePos::After
        );
    }

    #[test]
    fn range_ts_vs_user_key() {
        assert_eq!(
            compare_range_ts_to_user_key(&ts(b"b", b"d"), b"d", &CMP),
            RelativePos::Before
        );
        assert_eq!(
            compare_range_ts_to_user_key(&ts(b"b", b"d"), b"a", &CMP),
            RelativePos::After
        );
        assert_eq!(
            compare_range_ts_to_user_key(&ts(b"b", b"d"), b"b", &CMP),
            RelativePos::Overlap
        );
    }

    #[test]
    fn del_elem_vs_range_ts_disjoint() {
        // Touching at the boundary counts as before/after (half-open).
        assert_eq!(
            compare_del_elem_to_range_ts(&range(b"a", b"c"), &ts(b"c", b"f"), &CMP),
            DelElemVsRangeTs::Before
        );
        assert_eq!(
            compare_del_elem_to_range_ts(&range(b"f", b"h"), &ts(b"c", b"f"), &CMP),
            DelElemVsRangeTs::After
        );
        // A point at the tombstone start is covered, not before.
        assert_eq!(
            compare_del_elem_to_range_ts(&point(b"c"), &ts(b"c", b"f"), &CMP),
            DelElemVsRangeTs::Overlap {
                start_rel: RelativePos::Overlap,
                end_rel: RelativePos::Before,
            }
        );
        // A point at the tombstone's exclusive end is after it.
        assert_eq!(
            compare_del_elem_to_range_ts(&point(b"f"), &ts(b"c", b"f"), &CMP),
            DelElemVsRangeTs::After
        );
    }

    #[test]
    fn del_elem_vs_range_ts_overlap_endpoints() {
        assert_eq!(
            compare_del_elem_to_range_ts(&range(b"a", b"d"), &ts(b"b", b"f"), &CMP),
            DelElemVsRangeTs::Overlap {
                start_rel: RelativePos::Before,
                end_rel: RelativePos::Before,
            }
        );
        assert_eq!(
            compare_del_elem_to_range_ts(&range(b"b", b"f"), &ts(b"b", b"f"), &CMP),
            DelElemVsRangeTs::Overlap {
                start_rel: RelativePos::Overlap,
                end_rel: RelativePos::Overlap,
            }
        );
        assert_eq!(
            compare_del_elem_to_range_ts(&range(b"c", b"z"), &ts(b"b", b"f"), &CMP),
            DelElemVsRangeTs::Overlap {
                start_rel: RelativePos::After,
                end_rel: RelativePos::After,
            }
        );
    }
}
