//! SSTable (Sorted String Table) format.
//!
//! File layout:
//! ```text
//! [data blocks...]
//! [index block]
//! [properties block]
//! [footer][magic]
//! ```
//!
//! Data block format:
//! ```text
//! [count u32]
//! repeated count times:
//!   [internal_key]
//!   [val_len u32][val bytes]
//! [trailer: crc32c u32, blake3 32B over the payload]
//! ```
//!
//! Index entries map `last_internal_key_in_block -> {offset, len}`. The
//! properties block records key bounds, seqno bounds, and the file's raw
//! range tombstones, so readers get a level's tombstones without scanning
//! data blocks.

use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::internal_key::{InternalKey, KeyKind};
use crate::range_tombstone::RangeTombstone;

mod iter;

pub use iter::SstLevelIter;

#[derive(Debug, thiserror::Error)]
pub enum SstError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] crate::internal_key::DecodeError),

    #[error("sst corrupt: {0}")]
    Corrupt(&'static str),

    #[error("sst not found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SstProperties {
    pub smallest_user_key: Bytes,
    pub largest_user_key: Bytes,
    pub max_seqno: u64,
    pub entries: u64,
    /// Raw (unfragmented) range tombstones stored in this file.
    pub range_tombstones: Vec<RangeTombstone>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BlockHandle {
    offset: u64,
    len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    last_key: InternalKey,
    handle: BlockHandle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Footer {
    index_offset: u64,
    index_len: u32,
    props_offset: u64,
    props_len: u32,
}

const MAGIC: &[u8; 8] = b"MINKVSST";
const FOOTER_SIZE: usize = 8 + 4 + 8 + 4;
const BLOCK_TRAILER_SIZE: usize = 4 + 32;

pub fn sst_file_name(file_id: u64) -> String {
    format!("sst_{file_id:016x}.sst")
}

/// Writes one SST. Entries must arrive in internal-key order; the file is
/// built under a `.tmp` name and renamed into place on `finish`.
pub struct SstBuilder {
    block_size: usize,
    file: std::fs::File,
    path_tmp: PathBuf,
    path_final: PathBuf,
    buf: Vec<u8>,
    entries_in_block: u32,
    last_key: Option<InternalKey>,
    index: Vec<IndexEntry>,
    smallest_user_key: Option<Bytes>,
    largest_user_key: Option<Bytes>,
    max_seqno: u64,
    entries: u64,
    range_tombstones: Vec<RangeTombstone>,
}

impl SstBuilder {
    pub fn create(dir: &Path, file_id: u64, block_size: usize) -> Result<Self, SstError> {
        std::fs::create_dir_all(dir)?;
        let path_final = dir.join(sst_file_name(file_id));
        let path_tmp = path_final.with_extension("tmp");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .read(true)
            .open(&path_tmp)?;
        Ok(Self {
            block_size,
            file,
            path_tmp,
            path_final,
            buf: Vec::with_capacity(block_size + 256),
            entries_in_block: 0,
            last_key: None,
            index: Vec::new(),
            smallest_user_key: None,
            largest_user_key: None,
            max_seqno: 0,
            entries: 0,
            range_tombstones: Vec::new(),
        })
    }

    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<(), SstError> {
        if let Some(last) = &self.last_key {
            if key < last {
                return Err(SstError::Corrupt(
                    "internal keys must be added in sorted order",
                ));
            }
        }

        if self.smallest_user_key.is_none() {
            self.smallest_user_key = Some(key.user_key.clone());
        }
        self.largest_user_key = Some(key.user_key.clone());
        self.last_key = Some(key.clone());
        self.max_seqno = self.max_seqno.max(key.seqno);
        self.entries += 1;

        if key.kind == KeyKind::RangeDel {
            self.range_tombstones.push(RangeTombstone::new(
                key.user_key.clone(),
                Bytes::copy_from_slice(value),
                key.seqno,
            ));
        }

        if self.entries_in_block == 0 {
            self.buf.extend_from_slice(&0u32.to_le_bytes());
        }
        key.encode_into(&mut self.buf);
        let val_len: u32 = value
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("value too large"))?;
        self.buf.extend_from_slice(&val_len.to_le_bytes());
        self.buf.extend_from_slice(value);
        self.entries_in_block += 1;
        self.buf[0..4].copy_from_slice(&self.entries_in_block.to_le_bytes());

        if self.buf.len() >= self.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    pub fn finish(mut self) -> Result<(SstProperties, PathBuf), SstError> {
        if self.entries_in_block > 0 {
            self.flush_block()?;
        }

        let index_offset = self.file.stream_position()?;
        let index_bytes =
            bincode::serialize(&self.index).map_err(|_| SstError::Corrupt("index serialize"))?;
        self.file.write_all(&index_bytes)?;
        let index_len: u32 = index_bytes
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("index too large"))?;

        let props = SstProperties {
            smallest_user_key: self.smallest_user_key.clone().unwrap_or_else(Bytes::new),
            largest_user_key: self.largest_user_key.clone().unwrap_or_else(Bytes::new),
            max_seqno: self.max_seqno,
            entries: self.entries,
            range_tombstones: std::mem::take(&mut self.range_tombstones),
        };
        let props_offset = self.file.stream_position()?;
        let props_bytes =
            bincode::serialize(&props).map_err(|_| SstError::Corrupt("props serialize"))?;
        let props_len: u32 = props_bytes
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("props too large"))?;
        self.file.write_all(&props_bytes)?;

        let footer = Footer {
            index_offset,
            index_len,
            props_offset,
            props_len,
        };
        self.file.write_all(&encode_footer(&footer))?;
        self.file.write_all(MAGIC)?;
        self.file.sync_data()?;
        drop(self.file);

        std::fs::rename(&self.path_tmp, &self.path_final)?;
        fsync_parent_dir(&self.path_final)?;
        Ok((props, self.path_final))
    }

    fn flush_block(&mut self) -> Result<(), SstError> {
        let crc = crc32c::crc32c(&self.buf);
        let hash = blake3::hash(&self.buf);
        self.buf.extend_from_slice(&crc.to_le_bytes());
        self.buf.extend_from_slice(hash.as_bytes());

        let offset = self.file.stream_position()?;
        self.file.write_all(&self.buf)?;
        let len: u32 = self
            .buf
            .len()
            .try_into()
            .map_err(|_| SstError::Corrupt("block too large"))?;

        let last_key = self
            .last_key
            .clone()
            .ok_or(SstError::Corrupt("missing last key"))?;
        self.index.push(IndexEntry {
            last_key,
            handle: BlockHandle { offset, len },
        });

        self.buf.clear();
        self.entries_in_block = 0;
        Ok(())
    }
}

/// Memory-mapped SST reader.
#[derive(Debug)]
pub struct SstReader {
    mmap: Mmap,
    index: Vec<IndexEntry>,
    props: SstProperties,
}

impl SstReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SstError> {
        let file = std::fs::File::open(path.as_ref()).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SstError::NotFound
            } else {
                SstError::Io(err)
            }
        })?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < MAGIC.len() + FOOTER_SIZE {
            return Err(SstError::Corrupt("file too small"));
        }
        if &mmap[(mmap.len() - MAGIC.len())..] != MAGIC {
            return Err(SstError::Corrupt("bad magic"));
        }

        let footer_offset = mmap.len() - (MAGIC.len() + FOOTER_SIZE);
        let footer = decode_footer(&mmap[footer_offset..(footer_offset + FOOTER_SIZE)])?;

        let index_start = footer.index_offset as usize;
        let index_end = index_start.saturating_add(footer.index_len as usize);
        let props_start = footer.props_offset as usize;
        let props_end = props_start.saturating_add(footer.props_len as usize);
        if index_end > mmap.len() || props_end > mmap.len() {
            return Err(SstError::Corrupt("bad footer offsets"));
        }

        let index: Vec<IndexEntry> = bincode::deserialize(&mmap[index_start..index_end])
            .map_err(|_| SstError::Corrupt("index decode"))?;
        let props: SstProperties = bincode::deserialize(&mmap[props_start..props_end])
            .map_err(|_| SstError::Corrupt("props decode"))?;

        Ok(Self { mmap, index, props })
    }

    pub fn properties(&self) -> &SstProperties {
        &self.props
    }

    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// First block whose last key is `>= target`; `block_count()` when the
    /// target is past the end of the file.
    pub(crate) fn locate_block(&self, target: &InternalKey) -> usize {
        self.index.partition_point(|entry| entry.last_key < *target)
    }

    pub(crate) fn read_block_at(&self, block: usize) -> Result<Vec<(InternalKey, Bytes)>, SstError> {
        let handle = self
            .index
            .get(block)
            .ok_or(SstError::Corrupt("block index out of range"))?
            .handle;
        self.read_block(handle)
    }

    fn read_block(&self, handle: BlockHandle) -> Result<Vec<(InternalKey, Bytes)>, SstError> {
        let start = handle.offset as usize;
        let end = start.saturating_add(handle.len as usize);
        if end > self.mmap.len() {
            return Err(SstError::Corrupt("block handle out of bounds"));
        }
        if handle.len as usize <= BLOCK_TRAILER_SIZE {
            return Err(SstError::Corrupt("block too small"));
        }

        let payload_end = end - BLOCK_TRAILER_SIZE;
        let payload = &self.mmap[start..payload_end];
        let crc_expected = u32::from_le_bytes(
            self.mmap[payload_end..(payload_end + 4)]
                .try_into()
                .unwrap(),
        );
        let hash_expected: [u8; 32] = self.mmap[(payload_end + 4)..end].try_into().unwrap();

        if crc32c::crc32c(payload) != crc_expected {
            return Err(SstError::Corrupt("block crc mismatch"));
        }
        if blake3::hash(payload).as_bytes() != &hash_expected {
            return Err(SstError::Corrupt("block hash mismatch"));
        }

        if payload.len() < 4 {
            return Err(SstError::Corrupt("block payload too small"));
        }
        let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
        let mut offset = 4usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let (ikey, used) = InternalKey::decode(&payload[offset..])?;
            offset += used;
            if offset + 4 > payload.len() {
                return Err(SstError::Corrupt("truncated value length"));
            }
            let val_len =
                u32::from_le_bytes(payload[offset..(offset + 4)].try_into().unwrap()) as usize;
            offset += 4;
            if offset + val_len > payload.len() {
                return Err(SstError::Corrupt("truncated value bytes"));
            }
            let value = Bytes::copy_from_slice(&payload[offset..(offset + val_len)]);
            offset += val_len;
            out.push((ikey, value));
        }
        Ok(out)
    }
}

fn encode_footer(footer: &Footer) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FOOTER_SIZE);
    buf.extend_from_slice(&footer.index_offset.to_le_bytes());
    buf.extend_from_slice(&footer.index_len.to_le_bytes());
    buf.extend_from_slice(&footer.props_offset.to_le_bytes());
    buf.extend_from_slice(&footer.props_len.to_le_bytes());
    debug_assert_eq!(buf.len(), FOOTER_SIZE);
    buf
}

fn decode_footer(input: &[u8]) -> Result<Footer, SstError> {
    if input.len() != FOOTER_SIZE {
        return Err(SstError::Corrupt("bad footer size"));
    }
    Ok(Footer {
        index_offset: u64::from_le_bytes(input[0..8].try_into().unwrap()),
        index_len: u32::from_le_bytes(input[8..12].try_into().unwrap()),
        props_offset: u64::from_le_bytes(input[12..20].try_into().unwrap()),
        props_len: u32::from_le_bytes(input[20..24].try_into().unwrap()),
    })
}

fn fsync_parent_dir(path: &Path) -> Result<(), SstError> {
    let parent = path
        .parent()
        .ok_or(SstError::Corrupt("missing parent dir"))?;
    std::fs::File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ikey(user: &'static [u8], seqno: u64, kind: KeyKind) -> InternalKey {
        InternalKey::new(Bytes::from_static(user), seqno, kind)
    }

    fn build_file(dir: &Path, block_size: usize) -> (SstProperties, PathBuf) {
        let mut builder = SstBuilder::create(dir, 7, block_size).unwrap();
        builder.add(&ikey(b"a", 4, KeyKind::Put), b"v-a").unwrap();
        builder
            .add(&ikey(b"b", 6, KeyKind::RangeDel), b"e")
            .unwrap();
        builder.add(&ikey(b"c", 2, KeyKind::Put), b"v-c").unwrap();
        builder.add(&ikey(b"d", 5, KeyKind::Del), b"").unwrap();
        builder.add(&ikey(b"f", 3, KeyKind::Merge), b"+1").unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn roundtrip_properties_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (props, path) = build_file(dir.path(), 64);
        assert_eq!(props.smallest_user_key.as_ref(), b"a");
        assert_eq!(props.largest_user_key.as_ref(), b"f");
        assert_eq!(props.max_seqno, 6);
        assert_eq!(props.entries, 5);
        assert_eq!(props.range_tombstones.len(), 1);
        assert_eq!(props.range_tombstones[0].end_key.as_ref(), b"e");

        let reader = SstReader::open(&path).unwrap();
        assert!(reader.block_count() >= 1);
        let mut all = Vec::new();
        for block in 0..reader.block_count() {
            all.extend(reader.read_block_at(block).unwrap());
        }
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(all[0].1.as_ref(), b"v-a");
    }

    #[test]
    fn unsorted_add_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = SstBuilder::create(dir.path(), 1, 1024).unwrap();
        builder.add(&ikey(b"m", 2, KeyKind::Put), b"x").unwrap();
        let err = builder.add(&ikey(b"a", 9, KeyKind::Put), b"y").unwrap_err();
        assert!(matches!(err, SstError::Corrupt(_)));
    }

    #[test]
    fn corrupt_block_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = build_file(dir.path(), 4096);

        let mut raw = std::fs::read(&path).unwrap();
        raw[6] ^= 0xff; // inside the first (only) data block payload
        std::fs::write(&path, &raw).unwrap();

        let reader = SstReader::open(&path).unwrap();
        let err = reader.read_block_at(0).unwrap_err();
        assert!(matches!(err, SstError::Corrupt(_)));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SstReader::open(dir.path().join("sst_absent.sst")).unwrap_err();
        assert!(matches!(err, SstError::NotFound));
    }

    #[test]
    fn bad_magic_rejected_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = build_file(dir.path(), 4096);

        let mut raw = std::fs::read(&path).unwrap();
        let n = raw.len();
        raw[n - 1] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        assert!(matches!(
            SstReader::open(&path),
            Err(SstError::Corrupt("bad magic"))
        ));
    }
}
