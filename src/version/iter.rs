use std::sync::Arc;

use crate::internal_key::InternalKey;
use crate::smallest::iter::LevelDataIter;
use crate::sst::SstLevelIter;

use super::SstFile;

/// One level `>= 1` as a single monotone internal-key stream.
///
/// The level's files are sorted by smallest key and pairwise disjoint, so
/// concatenating their cursors in file order preserves internal-key order.
pub struct LevelConcatIter {
    files: Vec<Arc<SstFile>>,
    file_pos: usize,
    inner: Option<SstLevelIter>,
}

impl LevelConcatIter {
    pub fn new(files: Vec<Arc<SstFile>>) -> Self {
        Self {
            files,
            file_pos: 0,
            inner: None,
        }
    }

    fn open_file(&mut self, file_pos: usize) -> Option<&mut SstLevelIter> {
        self.file_pos = file_pos;
        match self.files.get(file_pos) {
            Some(file) => {
                self.inner = Some(SstLevelIter::new(file.reader.clone()));
                self.inner.as_mut()
            }
            None => {
                self.inner = None;
                None
            }
        }
    }

    /// Moves forward through files until the current cursor is valid or
    /// the level is exhausted.
    fn skip_exhausted_files(&mut self) -> anyhow::Result<()> {
        loop {
            match &self.inner {
                None => return Ok(()),
                Some(iter) if iter.valid() => return Ok(()),
                Some(_) => {
                    let next = self.file_pos + 1;
                    if let Some(iter) = self.open_file(next) {
                        iter.seek_to_first()?;
                    } else {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl LevelDataIter for LevelConcatIter {
    fn valid(&self) -> bool {
        self.inner.as_ref().is_some_and(|iter| iter.valid())
    }

    fn seek_to_first(&mut self) -> anyhow::Result<()> {
        if let Some(iter) = self.open_file(0) {
            iter.seek_to_first()?;
        }
        self.skip_exhausted_files()
    }

    fn seek(&mut self, user_key: &[u8]) -> anyhow::Result<()> {
        // First file whose largest key reaches the target.
        let file_pos = self
            .files
            .partition_point(|f| f.largest_user_key().as_ref() < user_key);
        if let Some(iter) = self.open_file(file_pos) {
            iter.seek(user_key)?;
        }
        self.skip_exhausted_files()
    }

    fn next(&mut self) -> anyhow::Result<()> {
        if let Some(iter) = self.inner.as_mut() {
            iter.next()?;
        } else {
            debug_assert!(false, "next on invalid level cursor");
        }
        self.skip_exhausted_files()
    }

    fn key(&self) -> &InternalKey {
        self.inner
            .as_ref()
            .expect("level cursor is invalid")
            .key()
    }
}
