//! Per-block consensus state.
//!
//! A [`BlockState`] is a Savanna block as the QC engine sees it: its
//! identity, finality core, the digest finalizers sign, the policies in
//! effect and the vote accumulators. Blocks produced before Savanna
//! activation carry none of this and are represented by
//! [`LegacyBlockState`]; [`BlockHandle`] holds either.

use crate::aggregating_qc::{AggregateVoteResult, AggregatingQc, MissingVote};
use savanna_core::HasVoted;
use savanna_messages::VoteMessage;
use savanna_types::{
    weak_digest, BlockId, BlockNum, BlockQuorumCertificate, BlockRef, BlockTimestamp,
    BlsPublicKey, ConnectionId, Digest, FinalityCore, FinalizerPolicy, QcError,
};
use std::fmt;
use std::sync::Arc;

/// A Savanna block with its vote accumulators.
pub struct BlockState {
    block_id: BlockId,
    previous: BlockId,
    timestamp: BlockTimestamp,
    core: FinalityCore,
    strong_digest: Digest,
    weak_digest: Vec<u8>,
    active_policy: Arc<FinalizerPolicy>,
    pending_policy: Option<Arc<FinalizerPolicy>>,
    aggregating_qc: AggregatingQc,
}

impl BlockState {
    /// Create the state for a block.
    ///
    /// `core` must be the block's own finality core, i.e. its current block
    /// number is the block's number.
    pub fn new(
        block_id: BlockId,
        previous: BlockId,
        timestamp: BlockTimestamp,
        core: FinalityCore,
        strong_digest: Digest,
        active_policy: Arc<FinalizerPolicy>,
        pending_policy: Option<Arc<FinalizerPolicy>>,
    ) -> Self {
        debug_assert_eq!(core.current_block_num(), block_id.block_num());
        let aggregating_qc = AggregatingQc::new(Arc::clone(&active_policy), pending_policy.clone());
        Self {
            block_id,
            previous,
            timestamp,
            core,
            weak_digest: weak_digest(&strong_digest),
            strong_digest,
            active_policy,
            pending_policy,
            aggregating_qc,
        }
    }

    pub fn id(&self) -> BlockId {
        self.block_id
    }

    pub fn block_num(&self) -> BlockNum {
        self.block_id.block_num()
    }

    pub fn previous(&self) -> BlockId {
        self.previous
    }

    pub fn timestamp(&self) -> BlockTimestamp {
        self.timestamp
    }

    pub fn core(&self) -> &FinalityCore {
        &self.core
    }

    /// Digest signed by strong votes.
    pub fn strong_digest(&self) -> &Digest {
        &self.strong_digest
    }

    /// Bytes signed by weak votes.
    pub fn weak_digest(&self) -> &[u8] {
        &self.weak_digest
    }

    pub fn active_policy(&self) -> &Arc<FinalizerPolicy> {
        &self.active_policy
    }

    pub fn pending_policy(&self) -> Option<&Arc<FinalizerPolicy>> {
        self.pending_policy.as_ref()
    }

    pub fn aggregating_qc(&self) -> &AggregatingQc {
        &self.aggregating_qc
    }

    /// Reference to this block.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.block_id, self.timestamp)
    }

    /// Aggregate a vote on this block.
    ///
    /// The vote must name this block; the caller routes it here by id.
    pub fn aggregate_vote(
        &self,
        connection_id: ConnectionId,
        vote: &VoteMessage,
    ) -> AggregateVoteResult {
        debug_assert_eq!(vote.block_id, self.block_id);
        let digest: &[u8] = if vote.strong {
            self.strong_digest.as_bytes()
        } else {
            &self.weak_digest
        };
        self.aggregating_qc
            .aggregate_vote(connection_id.0, vote, self.block_num(), digest)
    }

    /// Whether `key` has voted on this block.
    pub fn has_voted(&self, key: &BlsPublicKey) -> HasVoted {
        self.aggregating_qc.has_voted(key)
    }

    /// True when every policy has a local quorum.
    pub fn is_quorum_met(&self) -> bool {
        self.aggregating_qc.is_quorum_met()
    }

    /// Best QC known for this block, local or received.
    pub fn get_best_qc(&self) -> Option<BlockQuorumCertificate> {
        self.aggregating_qc.get_best_qc(self.block_num())
    }

    /// Record a QC received for this block. The QC must already be verified.
    pub fn set_received_qc(&self, qc: &BlockQuorumCertificate) -> bool {
        self.aggregating_qc.set_received_qc(qc)
    }

    pub fn received_qc_is_strong(&self) -> bool {
        self.aggregating_qc.received_qc_is_strong()
    }

    /// Finalizers of this block's policies with no vote in `qc`.
    pub fn missing_votes(&self, qc: &BlockQuorumCertificate) -> Vec<MissingVote> {
        self.aggregating_qc.missing_votes(qc)
    }

    /// Structural checks of a QC claimed on this block.
    pub fn verify_qc_basic(&self, qc: &BlockQuorumCertificate) -> Result<(), QcError> {
        if qc.block_num() != self.block_num() {
            return Err(QcError::BlockMismatch {
                expected: self.block_num(),
                actual: qc.block_num(),
            });
        }
        qc.verify_basic(&self.active_policy, self.pending_policy.as_deref())
    }

    /// Signature checks of a QC claimed on this block.
    pub fn verify_qc_signatures(&self, qc: &BlockQuorumCertificate) -> Result<(), QcError> {
        qc.verify_signatures(
            &self.active_policy,
            self.pending_policy.as_deref(),
            &self.strong_digest,
        )
    }

    /// Full verification of a QC claimed on this block.
    pub fn verify_qc(&self, qc: &BlockQuorumCertificate) -> Result<(), QcError> {
        self.verify_qc_basic(qc)?;
        self.verify_qc_signatures(qc)
    }
}

impl fmt::Debug for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockState")
            .field("block_num", &self.block_num())
            .field("block_id", &self.block_id)
            .field("timestamp", &self.timestamp)
            .field("latest_qc_claim", &self.core.latest_qc_claim())
            .field("last_final", &self.core.last_final_block_num())
            .finish_non_exhaustive()
    }
}

/// A block from before Savanna activation. Votes on it cannot be aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyBlockState {
    pub block_id: BlockId,
    pub previous: BlockId,
    pub timestamp: BlockTimestamp,
}

/// A block of either kind.
#[derive(Debug, Clone)]
pub enum BlockHandle {
    Legacy(Arc<LegacyBlockState>),
    Savanna(Arc<BlockState>),
}

impl BlockHandle {
    pub fn id(&self) -> BlockId {
        match self {
            BlockHandle::Legacy(b) => b.block_id,
            BlockHandle::Savanna(b) => b.id(),
        }
    }

    pub fn block_num(&self) -> BlockNum {
        self.id().block_num()
    }

    pub fn previous(&self) -> BlockId {
        match self {
            BlockHandle::Legacy(b) => b.previous,
            BlockHandle::Savanna(b) => b.previous(),
        }
    }

    pub fn timestamp(&self) -> BlockTimestamp {
        match self {
            BlockHandle::Legacy(b) => b.timestamp,
            BlockHandle::Savanna(b) => b.timestamp(),
        }
    }

    /// The Savanna state, if this is a Savanna block.
    pub fn as_savanna(&self) -> Option<&Arc<BlockState>> {
        match self {
            BlockHandle::Savanna(b) => Some(b),
            BlockHandle::Legacy(_) => None,
        }
    }
}

impl From<Arc<BlockState>> for BlockHandle {
    fn from(block: Arc<BlockState>) -> Self {
        BlockHandle::Savanna(block)
    }
}

impl From<LegacyBlockState> for BlockHandle {
    fn from(block: LegacyBlockState) -> Self {
        BlockHandle::Legacy(Arc::new(block))
    }
}
