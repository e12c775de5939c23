//! Internal key format and ordering.
//!
//! Every record in the engine is keyed by `(user_key, seqno, kind)`. The
//! tuple orders by `user_key ASC, seqno DESC, kind DESC`, so a forward scan
//! over one user key sees the newest record first.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated input")]
    Truncated,

    #[error("unknown key kind: {0}")]
    UnknownKind(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyKind {
    /// Point tombstone.
    Del = 0,
    /// Point key/value.
    Put = 1,
    /// Merge operand.
    Merge = 2,
    /// Range tombstone: `user_key` is the start, the value is the end key.
    RangeDel = 3,
    /// Internal metadata / seek sentinel.
    Meta = 4,
}

impl KeyKind {
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Del),
            1 => Ok(Self::Put),
            2 => Ok(Self::Merge),
            3 => Ok(Self::RangeDel),
            4 => Ok(Self::Meta),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }

    pub fn is_tombstone(self) -> bool {
        matches!(self, Self::Del | Self::RangeDel)
    }

    /// How the get-smallest read path treats a record of this kind.
    pub fn value_category(self) -> ValueCategory {
        match self {
            Self::Put => ValueCategory::Value,
            Self::Merge => ValueCategory::MergeValue,
            Self::Del => ValueCategory::DelKey,
            Self::RangeDel | Self::Meta => ValueCategory::Other,
        }
    }
}

/// Read-path classification of a record.
///
/// `Value` and `MergeValue` make a key live; `DelKey` shadows older records
/// of the same key; `Other` records carry no point data and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCategory {
    Value,
    MergeValue,
    DelKey,
    Other,
}

/// Internal key `(user_key, seqno, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalKey {
    pub user_key: Bytes,
    pub seqno: u64,
    pub kind: KeyKind,
}

impl InternalKey {
    pub fn new(user_key: Bytes, seqno: u64, kind: KeyKind) -> Self {
        Self {
            user_key,
            seqno,
            kind,
        }
    }

    /// Seek sentinel: the smallest internal key for `user_key`, so a
    /// lower-bound probe lands on the newest record at or after it.
    pub fn seek_sentinel(user_key: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(user_key), u64::MAX, KeyKind::Meta)
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.user_key.len() + 8 + 1
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let user_key_len: u32 = self
            .user_key
            .len()
            .try_into()
            .expect("user_key too large to encode");
        buf.extend_from_slice(&user_key_len.to_le_bytes());
        buf.extend_from_slice(self.user_key.as_ref());
        buf.extend_from_slice(&self.seqno.to_le_bytes());
        buf.push(self.kind as u8);
    }

    pub fn decode(input: &[u8]) -> Result<(Self, usize), DecodeError> {
        if input.len() < 4 {
            return Err(DecodeError::Truncated);
        }
        let user_key_len = u32::from_le_bytes(input[0..4].try_into().unwrap()) as usize;
        let needed = 4 + user_key_len + 8 + 1;
        if input.len() < needed {
            return Err(DecodeError::Truncated);
        }

        let user_key = Bytes::copy_from_slice(&input[4..(4 + user_key_len)]);
        let seqno_offset = 4 + user_key_len;
        let seqno = u64::from_le_bytes(input[seqno_offset..(seqno_offset + 8)].try_into().unwrap());
        let kind = KeyKind::from_u8(input[seqno_offset + 8])?;

        Ok((
            Self {
                user_key,
                seqno,
                kind,
            },
            needed,
        ))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.user_key.cmp(&other.user_key) {
            Ordering::Equal => match other.seqno.cmp(&self.seqno) {
                Ordering::Equal => (other.kind as u8).cmp(&(self.kind as u8)),
                other => other,
            },
            other => other,
        }
    }
}
