//! Range tombstones and fragmentation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Deletes every key in `[start_key, end_key)` whose write seqno is below
/// `seqno`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTombstone {
    pub start_key: Bytes,
    pub end_key: Bytes,
    pub seqno: u64,
}

impl RangeTombstone {
    pub fn new(start_key: Bytes, end_key: Bytes, seqno: u64) -> Self {
        Self {
            start_key,
            end_key,
            seqno,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start_key.as_ref() < self.end_key.as_ref()
    }
}

/// Fragments one level's raw tombstones into a sorted, disjoint sequence.
///
/// Raw tombstones from a single source may overlap each other. The read
/// path wants the *top-level* view: at every point of key space, the
/// maximum seqno of any tombstone covering it. The input is split at every
/// start/end boundary, each fragment takes the max covering seqno, and
/// contiguous fragments with equal seqno are re-coalesced.
///
/// Key space is bytewise-ordered here, matching the engine's persisted
/// order.
pub fn fragment_tombstones(mut raw: Vec<RangeTombstone>) -> Vec<RangeTombstone> {
    raw.retain(RangeTombstone::is_valid);
    if raw.is_empty() {
        return Vec::new();
    }

    let mut bounds: Vec<Bytes> = Vec::with_capacity(raw.len() * 2);
    for ts in &raw {
        bounds.push(ts.start_key.clone());
        bounds.push(ts.end_key.clone());
    }
    bounds.sort();
    bounds.dedup();

    let mut fragments: Vec<RangeTombstone> = Vec::new();
    for pair in bounds.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let max_seqno = raw
            .iter()
            .filter(|ts| ts.start_key <= *lo && *hi <= ts.end_key)
            .map(|ts| ts.seqno)
            .max();
        let Some(seqno) = max_seqno else {
            continue;
        };

        match fragments.last_mut() {
            Some(prev) if prev.seqno == seqno && prev.end_key == *lo => {
                prev.end_key = hi.clone();
            }
            _ => fragments.push(RangeTombstone::new(lo.clone(), hi.clone(), seqno)),
        }
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(start: &'static [u8], end: &'static [u8], seqno: u64) -> RangeTombstone {
        RangeTombstone::new(Bytes::from_static(start), Bytes::from_static(end), seqno)
    }

    #[test]
    fn disjoint_input_passes_through() {
        let frags = fragment_tombstones(vec![ts(b"a", b"c", 4), ts(b"e", b"g", 7)]);
        assert_eq!(frags, vec![ts(b"a", b"c", 4), ts(b"e", b"g", 7)]);
    }

    #[test]
    fn overlap_splits_at_boundaries_with_max_seqno() {
        let frags = fragment_tombstones(vec![ts(b"a", b"e", 3), ts(b"c", b"g", 8)]);
        assert_eq!(
            frags,
            vec![ts(b"a", b"c", 3), ts(b"c", b"g", 8)],
        );
    }

    #[test]
    fn nested_tombstone_splits_both_sides() {
        let frags = fragment_tombstones(vec![ts(b"a", b"z", 2), ts(b"f", b"m", 9)]);
        assert_eq!(
            frags,
            vec![ts(b"a", b"f", 2), ts(b"f", b"m", 9), ts(b"m", b"z", 2)],
        );
    }

    #[test]
    fn equal_seqno_fragments_coalesce() {
        let frags = fragment_tombstones(vec![ts(b"a", b"c", 5), ts(b"c", b"f", 5)]);
        assert_eq!(frags, vec![ts(b"a", b"f", 5)]);
    }

    #[test]
    fn empty_and_inverted_inputs_drop() {
        assert!(fragment_tombstones(vec![]).is_empty());
        assert!(fragment_tombstones(vec![ts(b"c", b"c", 5), ts(b"d", b"a", 5)]).is_empty());
    }

    #[test]
    fn gap_between_tombstones_stays_uncovered() {
        let frags = fragment_tombstones(vec![ts(b"a", b"b", 1), ts(b"x", b"z", 2)]);
        assert_eq!(frags, vec![ts(b"a", b"b", 1), ts(b"x", b"z", 2)]);
    }
}
