//! Version set: which SST files exist at which level.
//!
//! A [`Version`] is an immutable snapshot of the file layout; mutations
//! build a new `Version` and swap it in under a lock. Readers pin the
//! version they started with by `Arc`, so files never disappear under a
//! running query.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::range_tombstone::RangeTombstone;
use crate::sst::{sst_file_name, SstError, SstReader};

mod iter;

pub use iter::LevelConcatIter;

/// One SST file registered in a version.
#[derive(Clone)]
pub struct SstFile {
    pub file_id: u64,
    pub reader: Arc<SstReader>,
}

impl SstFile {
    pub fn smallest_user_key(&self) -> &Bytes {
        &self.reader.properties().smallest_user_key
    }

    pub fn largest_user_key(&self) -> &Bytes {
        &self.reader.properties().largest_user_key
    }

    pub fn max_seqno(&self) -> u64 {
        self.reader.properties().max_seqno
    }

    pub fn range_tombstones(&self) -> &[RangeTombstone] {
        &self.reader.properties().range_tombstones
    }
}

/// Immutable snapshot of the file layout.
#[derive(Clone, Default)]
pub struct Version {
    /// L0 may overlap and is searched newest-first. Stored in ascending
    /// file-id order; file ids are assigned in flush order, so reverse
    /// iteration is recency order.
    pub l0: Vec<Arc<SstFile>>,
    /// `levels[i]` is level `i + 1`: sorted by smallest key, files
    /// pairwise non-overlapping.
    pub levels: Vec<Vec<Arc<SstFile>>>,
}

impl Version {
    pub fn is_empty(&self) -> bool {
        self.l0.is_empty() && self.levels.iter().all(Vec::is_empty)
    }
}

pub struct VersionSet {
    dir: PathBuf,
    current: RwLock<Arc<Version>>,
    next_file_id: AtomicU64,
}

impl VersionSet {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            current: RwLock::new(Arc::new(Version::default())),
            next_file_id: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> Arc<Version> {
        self.current.read().clone()
    }

    pub fn allocate_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn sst_path(&self, file_id: u64) -> PathBuf {
        self.dir.join(sst_file_name(file_id))
    }

    /// Adds a freshly flushed file to L0.
    pub fn install_l0(&self, file: SstFile) {
        let mut guard = self.current.write();
        let mut version = Version::clone(&guard);
        version.l0.push(Arc::new(file));
        version.l0.sort_by_key(|f| f.file_id);
        *guard = Arc::new(version);
    }

    /// Registers a file at `level >= 1`, keeping the level sorted and
    /// rejecting key-range overlap with its existing files.
    pub fn install_at_level(&self, file: SstFile, level: usize) -> anyhow::Result<()> {
        anyhow::ensure!(level >= 1, "install_at_level requires level >= 1");
        anyhow::ensure!(
            file.smallest_user_key() <= file.largest_user_key(),
            "file {} has inverted key bounds",
            file.file_id
        );

        let mut guard = self.current.write();
        let mut version = Version::clone(&guard);
        if version.levels.len() < level {
            version.levels.resize_with(level, Vec::new);
        }

        let run = &mut version.levels[level - 1];
        for existing in run.iter() {
            let disjoint = file.largest_user_key() < existing.smallest_user_key()
                || existing.largest_user_key() < file.smallest_user_key();
            anyhow::ensure!(
                disjoint,
                "file {} overlaps file {} at level {}",
                file.file_id,
                existing.file_id,
                level
            );
        }
        run.push(Arc::new(file));
        run.sort_by(|a, b| a.smallest_user_key().cmp(b.smallest_user_key()));

        *guard = Arc::new(version);
        Ok(())
    }

    /// Copies an externally built SST into the database directory under a
    /// fresh file id and registers it. Returns the file's max seqno so the
    /// caller can advance the engine sequence number past it.
    pub fn ingest(&self, source: impl AsRef<Path>, level: usize) -> anyhow::Result<u64> {
        let source = source.as_ref();
        let file_id = self.allocate_file_id();
        let dest = self.sst_path(file_id);
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create db dir {}", self.dir.display()))?;
        std::fs::copy(source, &dest)
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    SstError::NotFound
                } else {
                    SstError::Io(err)
                }
            })
            .with_context(|| format!("copy sst {} into db", source.display()))?;

        let reader =
            SstReader::open(&dest).with_context(|| format!("open sst {}", dest.display()))?;
        let file = SstFile {
            file_id,
            reader: Arc::new(reader),
        };
        let max_seqno = file.max_seqno();

        if level == 0 {
            self.install_l0(file);
        } else {
            self.install_at_level(file, level)?;
        }
        Ok(max_seqno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_key::{InternalKey, KeyKind};
    use crate::sst::SstBuilder;

    fn build_sst(dir: &Path, file_id: u64, users: &[&'static [u8]]) -> SstFile {
        let mut builder = SstBuilder::create(dir, file_id, 4096).unwrap();
        for (i, user) in users.iter().enumerate() {
            let key = InternalKey::new(Bytes::from_static(user), (i + 1) as u64, KeyKind::Put);
            builder.add(&key, b"v").unwrap();
        }
        let (_, path) = builder.finish().unwrap();
        SstFile {
            file_id,
            reader: Arc::new(SstReader::open(path).unwrap()),
        }
    }

    #[test]
    fn l0_kept_in_file_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let set = VersionSet::new(dir.path());
        set.install_l0(build_sst(dir.path(), 2, &[b"x"]));
        set.install_l0(build_sst(dir.path(), 1, &[b"a"]));

        let version = set.current();
        let ids: Vec<u64> = version.l0.iter().map(|f| f.file_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn level_run_sorted_and_overlap_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let set = VersionSet::new(dir.path());
        set.install_at_level(build_sst(dir.path(), 1, &[b"m", b"p"]), 1)
            .unwrap();
        set.install_at_level(build_sst(dir.path(), 2, &[b"a", b"c"]), 1)
            .unwrap();

        let version = set.current();
        let smallest: Vec<&[u8]> = version.levels[0]
            .iter()
            .map(|f| f.smallest_user_key().as_ref())
            .collect();
        assert_eq!(smallest, vec![b"a".as_ref(), b"m".as_ref()]);

        let overlapping = build_sst(dir.path(), 3, &[b"b", b"n"]);
        assert!(set.install_at_level(overlapping, 1).is_err());
    }

    #[test]
    fn ingest_of_missing_source_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let set = VersionSet::new(dir.path());
        let err = set.ingest(dir.path().join("absent.sst"), 0).unwrap_err();
        assert!(err
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<SstError>(), Some(SstError::NotFound))));
    }

    #[test]
    fn versions_are_pinned_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let set = VersionSet::new(dir.path());
        let before = set.current();
        set.install_l0(build_sst(dir.path(), 1, &[b"a"]));

        assert!(before.is_empty());
        assert_eq!(set.current().l0.len(), 1);
    }
}
