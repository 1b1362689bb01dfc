//! Vote intake outcomes.

use std::fmt;

/// Result of processing one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteStatus {
    /// Vote aggregated into the block's accumulator.
    Success,
    /// Finalizer already voted on this block.
    Duplicate,
    /// Key is not in any policy of the block.
    UnknownPublicKey,
    /// Signature does not verify.
    InvalidSignature,
    /// Block is not available (or is not a Savanna block).
    UnknownBlock,
    /// Sender exceeded its buffered-vote quota.
    MaxExceeded,
}

impl VoteStatus {
    /// True for outcomes that indicate a misbehaving peer.
    pub fn is_misbehavior(&self) -> bool {
        matches!(self, VoteStatus::InvalidSignature | VoteStatus::MaxExceeded)
    }

    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteStatus::Success => "success",
            VoteStatus::Duplicate => "duplicate",
            VoteStatus::UnknownPublicKey => "unknown_public_key",
            VoteStatus::InvalidSignature => "invalid_signature",
            VoteStatus::UnknownBlock => "unknown_block",
            VoteStatus::MaxExceeded => "max_exceeded",
        }
    }
}

impl fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a finalizer has voted on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HasVoted {
    /// Vote recorded.
    Voted,
    /// In a policy but no vote recorded yet.
    NotVoted,
    /// Not in any policy of the block.
    IrrelevantFinalizer,
}
