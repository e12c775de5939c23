#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Mutable memtable rotates to the immutable queue past this size.
    pub memtable_bytes: u64,
    /// Target data-block size for flushed and ingested SSTs.
    pub sst_block_bytes: usize,
    /// Fail a get-smallest query whose level loop stops making progress
    /// instead of looping. Costs a position snapshot per iteration.
    pub validate_smallest_progress: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            memtable_bytes: 8 * 1024 * 1024,
            sst_block_bytes: 16 * 1024,
            validate_smallest_progress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Pin the read at a sequence number. The get-smallest path reads the
    /// latest visible state only and rejects a pinned snapshot.
    pub snapshot: Option<u64>,
}
