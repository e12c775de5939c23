use std::ops::Bound;
use std::sync::Arc;

use crate::internal_key::InternalKey;
use crate::smallest::iter::LevelDataIter;

use super::MemTable;

/// Internal-key cursor over one memtable.
///
/// The skip map's entries borrow the map, so holding a live map iterator
/// inside a long-lived cursor would tie the cursor's lifetime to a borrow.
/// Instead each move re-probes with `lower_bound`, which is O(log n) and
/// keeps the cursor self-contained; the memtable is pinned by `Arc`.
pub struct MemTableLevelIter {
    mem: Arc<MemTable>,
    current: Option<InternalKey>,
}

impl MemTableLevelIter {
    pub fn new(mem: Arc<MemTable>) -> Self {
        Self { mem, current: None }
    }
}

impl LevelDataIter for MemTableLevelIter {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> anyhow::Result<()> {
        self.current = self.mem.map().front().map(|entry| entry.key().clone());
        Ok(())
    }

    fn seek(&mut self, user_key: &[u8]) -> anyhow::Result<()> {
        let target = InternalKey::seek_sentinel(user_key);
        self.current = self
            .mem
            .map()
            .lower_bound(Bound::Included(&target))
            .map(|entry| entry.key().clone());
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<()> {
        let Some(current) = self.current.take() else {
            debug_assert!(false, "next on invalid memtable cursor");
            return Ok(());
        };
        self.current = self
            .mem
            .map()
            .lower_bound(Bound::Excluded(&current))
            .map(|entry| entry.key().clone());
        Ok(())
    }

    fn key(&self) -> &InternalKey {
        self.current.as_ref().expect("memtable cursor is invalid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Op;
    use crate::internal_key::KeyKind;

    fn table() -> Arc<MemTable> {
        let mem = MemTable::new();
        // seqnos 1..=4
        mem.apply(
            1,
            &[
                Op::put("b", "1"),
                Op::put("d", "2"),
                Op::delete("b"),
                Op::put("f", "3"),
            ],
        );
        Arc::new(mem)
    }

    #[test]
    fn seek_lands_on_newest_record_of_key() {
        let mut iter = MemTableLevelIter::new(table());
        iter.seek(b"b").unwrap();
        assert!(iter.valid());
        // The delete at seqno 3 is newer than the put at seqno 1.
        assert_eq!(iter.key().user_key.as_ref(), b"b");
        assert_eq!(iter.key().seqno, 3);
        assert_eq!(iter.key().kind, KeyKind::Del);
    }

    #[test]
    fn seek_between_keys_lands_on_next() {
        let mut iter = MemTableLevelIter::new(table());
        iter.seek(b"c").unwrap();
        assert_eq!(iter.key().user_key.as_ref(), b"d");
    }

    #[test]
    fn next_walks_all_records_in_order() {
        let mut iter = MemTableLevelIter::new(table());
        iter.seek_to_first().unwrap();
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().user_key.clone(), iter.key().seqno));
            iter.next().unwrap();
        }
        assert_eq!(
            seen,
            vec![
                (bytes::Bytes::from_static(b"b"), 3),
                (bytes::Bytes::from_static(b"b"), 1),
                (bytes::Bytes::from_static(b"d"), 2),
                (bytes::Bytes::from_static(b"f"), 4),
            ],
        );
    }

    #[test]
    fn seek_past_end_is_invalid() {
        let mut iter = MemTableLevelIter::new(table());
        iter.seek(b"z").unwrap();
        assert!(!iter.valid());
    }
}
