//! Finalizer vote gossip message.

use savanna_types::{BlockId, BlockNum, BlsPublicKey, BlsSignature};

/// A finalizer's vote on a block.
///
/// `signature` covers the block's finality digest for strong votes and the
/// weak digest for weak votes. Messages are immutable once built and hash by
/// value, so identical copies from different peers collapse in sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteMessage {
    /// Block being voted on.
    pub block_id: BlockId,
    /// Strong or weak vote.
    pub strong: bool,
    /// Key of the voting finalizer.
    pub finalizer_key: BlsPublicKey,
    /// Signature over the (strong or weak) finality digest.
    pub signature: BlsSignature,
}

impl VoteMessage {
    /// Create a new vote message.
    pub fn new(
        block_id: BlockId,
        strong: bool,
        finalizer_key: BlsPublicKey,
        signature: BlsSignature,
    ) -> Self {
        Self {
            block_id,
            strong,
            finalizer_key,
            signature,
        }
    }

    /// Block number taken from the block id.
    pub fn block_num(&self) -> BlockNum {
        self.block_id.block_num()
    }

    /// Message type identifier used for topic routing.
    pub fn message_type_id() -> &'static str {
        "finality.vote"
    }
}
