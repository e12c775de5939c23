//! User-key comparators.
//!
//! The storage layer (memtables, SST files) always orders user keys
//! bytewise. The get-smallest operator is parameterized over a
//! [`KeyComparator`] so its interval arithmetic has a single, explicit
//! ordering seam; the engine passes [`BytewiseComparator`].

use std::cmp::Ordering;
use std::sync::Arc;

use crate::internal_key::InternalKey;

/// Total order on user keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    fn name(&self) -> &'static str;
}

/// Lexicographic byte order. The engine's persisted order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "minkv.bytewise"
    }
}

/// Orders internal keys by `(user_key ASC, seqno DESC, kind DESC)` using a
/// caller-supplied user-key comparator.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn KeyComparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn KeyComparator>) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.user
    }

    pub fn compare(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        match self.user.compare(a.user_key.as_ref(), b.user_key.as_ref()) {
            Ordering::Equal => match b.seqno.cmp(&a.seqno) {
                Ordering::Equal => (b.kind as u8).cmp(&(a.kind as u8)),
                other => other,
            },
            other => other,
        }
    }
}
