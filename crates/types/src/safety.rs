//! Per-finalizer safety information.

use crate::{BlockRef, BlockTimestamp};

/// What a local finalizer must remember to vote safely across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FinalizerSafetyInformation {
    /// Start of the timestamp range covered by the last vote: the timestamp
    /// of the block whose QC the voted-on block claimed.
    pub last_vote_range_start: BlockTimestamp,
    /// Last block voted on.
    pub last_vote: BlockRef,
    /// Block this finalizer is locked on.
    pub lock: BlockRef,
}

impl FinalizerSafetyInformation {
    /// Size of one encoded record.
    pub const ENCODED_LEN: usize = 4 + 2 * (32 + 4);

    /// A finalizer that never voted.
    pub const fn unset() -> Self {
        Self {
            last_vote_range_start: BlockTimestamp(0),
            last_vote: BlockRef::EMPTY,
            lock: BlockRef::EMPTY,
        }
    }

    /// True when neither a vote nor a lock is recorded.
    pub fn is_unset(&self) -> bool {
        self.last_vote.is_empty() && self.lock.is_empty()
    }
}
