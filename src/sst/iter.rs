use std::sync::Arc;

use bytes::Bytes;

use crate::internal_key::InternalKey;
use crate::smallest::iter::LevelDataIter;

use super::{SstError, SstReader};

/// Internal-key cursor over one SST file, streaming block by block.
///
/// The cursor owns its reader by `Arc` so a level context can hold it
/// without borrowing from the version it came from.
pub struct SstLevelIter {
    reader: Arc<SstReader>,
    /// Next block to load when the current entries are exhausted.
    block_pos: usize,
    entries: Vec<(InternalKey, Bytes)>,
    entry_pos: usize,
    pending_seek: Option<InternalKey>,
}

impl SstLevelIter {
    pub fn new(reader: Arc<SstReader>) -> Self {
        Self {
            reader,
            block_pos: 0,
            entries: Vec::new(),
            entry_pos: 0,
            pending_seek: None,
        }
    }

    fn reposition(&mut self, block: usize, pending: Option<InternalKey>) -> Result<(), SstError> {
        self.block_pos = block;
        self.entries.clear();
        self.entry_pos = 0;
        self.pending_seek = pending;
        self.fill()
    }

    /// Loads blocks until positioned on an entry or the file is exhausted.
    fn fill(&mut self) -> Result<(), SstError> {
        while self.entry_pos >= self.entries.len() {
            if self.block_pos >= self.reader.block_count() {
                return Ok(());
            }
            self.entries = self.reader.read_block_at(self.block_pos)?;
            self.block_pos += 1;
            self.entry_pos = match self.pending_seek.take() {
                Some(target) => self.entries.partition_point(|(key, _)| *key < target),
                None => 0,
            };
        }
        Ok(())
    }
}

impl LevelDataIter for SstLevelIter {
    fn valid(&self) -> bool {
        self.entry_pos < self.entries.len()
    }

    fn seek_to_first(&mut self) -> anyhow::Result<()> {
        self.reposition(0, None)?;
        Ok(())
    }

    fn seek(&mut self, user_key: &[u8]) -> anyhow::Result<()> {
        let target = InternalKey::seek_sentinel(user_key);
        let block = self.reader.locate_block(&target);
        self.reposition(block, Some(target))?;
        Ok(())
    }

    fn next(&mut self) -> anyhow::Result<()> {
        debug_assert!(self.valid(), "next on invalid sst cursor");
        self.entry_pos += 1;
        self.fill()?;
        Ok(())
    }

    fn key(&self) -> &InternalKey {
        &self.entries[self.entry_pos].0
    }
}
