//! `minkv` is a log-structured merge-tree (LSM) key-value engine whose read
//! path is a single operator: *get-smallest* — find the smallest live user
//! key at or after a target, across the whole level hierarchy.
//!
//! Layout of the hierarchy, newest to oldest:
//! - the mutable memtable,
//! - immutable memtables awaiting flush,
//! - level-0 SST files (may overlap each other),
//! - levels 1..N, each a sorted run of non-overlapping files.
//!
//! Correctness rules the engine is opinionated about:
//! - Internal keys are ordered by `(user_key ASC, seqno DESC, kind DESC)`.
//! - Point deletes are tombstones; range deletes are half-open `[start, end)`
//!   tombstones that delete older writes in their span.
//! - A query pins the exact state it reads by taking a superversion
//!   (memtables + current version, all reference-counted).

pub mod comparator;
pub mod db;
pub mod internal_key;
pub mod memtable;
pub mod range_tombstone;
pub mod smallest;
pub mod sst;
pub mod version;

pub use db::{Db, DbOptions, Op, OpKind, ReadOptions, Value};
pub use internal_key::{InternalKey, KeyKind};
pub use range_tombstone::RangeTombstone;
pub use sst::{SstBuilder, SstError, SstReader};
