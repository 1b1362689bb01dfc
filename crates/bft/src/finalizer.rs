//! Local finalizer vote decisions.
//!
//! A [`Finalizer`] owns one BLS key and its safety information. Before
//! voting on a block it runs three checks:
//!
//! - **Monotony**: the block is newer than the last one voted on.
//! - **Liveness**: the block's latest QC is newer than the lock, or the lock
//!   is already final.
//! - **Safety**: the block descends from the locked block.
//!
//! It votes when monotony holds and either liveness or safety does. The
//! vote is strong unless it could conflict with the previous vote.

use crate::block_state::BlockState;
use savanna_messages::VoteMessage;
use savanna_types::{weak_digest, BlsPrivateKey, BlsPublicKey, Digest, FinalizerSafetyInformation};
use std::fmt;
use tracing::{debug, info, warn};

/// Whether and how to vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoteDecision {
    #[default]
    NoVote,
    StrongVote,
    WeakVote,
}

impl fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoteDecision::NoVote => "no_vote",
            VoteDecision::StrongVote => "strong_vote",
            VoteDecision::WeakVote => "weak_vote",
        };
        f.write_str(name)
    }
}

/// A decision with the checks that led to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteResult {
    pub decision: VoteDecision,
    pub safety_check: bool,
    pub liveness_check: bool,
    pub monotony_check: bool,
}

/// A finalizer key configured on this node, with its safety information.
#[derive(Clone)]
pub struct Finalizer {
    private_key: BlsPrivateKey,
    /// Safety state; persisted before any vote it produced is sent.
    pub fsi: FinalizerSafetyInformation,
}

impl Finalizer {
    pub fn new(private_key: BlsPrivateKey, fsi: FinalizerSafetyInformation) -> Self {
        Self { private_key, fsi }
    }

    /// Decide whether to vote on `block`, updating the safety information
    /// when a vote is decided.
    pub fn decide_vote(&mut self, block: &BlockState) -> VoteResult {
        let mut res = VoteResult {
            monotony_check: self.fsi.last_vote.is_empty()
                || block.timestamp() > self.fsi.last_vote.timestamp,
            ..VoteResult::default()
        };

        if !res.monotony_check {
            // Seeing the block we already voted on is routine.
            if block.id() != self.fsi.last_vote.block_id {
                debug!(
                    block_num = %block.block_num(),
                    block_id = %block.id(),
                    timestamp = %block.timestamp(),
                    last_vote_timestamp = %self.fsi.last_vote.timestamp,
                    last_vote_num = %self.fsi.last_vote.block_num(),
                    "Monotony check failed, cannot vote"
                );
            }
            return res;
        }

        let core = block.core();
        if self.fsi.lock.is_empty() {
            warn!(
                block_num = %block.block_num(),
                block_id = %block.id(),
                "Liveness and safety checks failed, lock is empty"
            );
        } else {
            res.liveness_check = core.latest_qc_block_timestamp() > self.fsi.lock.timestamp
                || core.last_final_block_timestamp() >= self.fsi.lock.timestamp;
            if !res.liveness_check {
                info!(
                    block_num = %block.block_num(),
                    block_id = %block.id(),
                    latest_qc_timestamp = %core.latest_qc_block_timestamp(),
                    lock_timestamp = %self.fsi.lock.timestamp,
                    lock_num = %self.fsi.lock.block_num(),
                    "Liveness check failed"
                );
                res.safety_check = core.extends(&self.fsi.lock.block_id);
                if !res.safety_check {
                    warn!(
                        block_num = %block.block_num(),
                        block_id = %block.id(),
                        lock_num = %self.fsi.lock.block_num(),
                        lock_id = %self.fsi.lock.block_id,
                        "Safety check failed, block does not extend lock"
                    );
                }
            }
        }

        if res.liveness_check || res.safety_check {
            let p_start = core.latest_qc_block_timestamp();
            let p_end = block.timestamp();
            let disjoint = self.fsi.last_vote_range_start >= p_end
                || self.fsi.last_vote.timestamp <= p_start;
            let strong = disjoint
                || (!self.fsi.last_vote.is_empty() && core.extends(&self.fsi.last_vote.block_id));

            self.fsi.last_vote = block.block_ref();
            self.fsi.last_vote_range_start = p_start;

            if strong {
                if let Some(qc_ref) = core.get_block_reference(core.latest_qc_claim().block_num) {
                    if qc_ref.timestamp > self.fsi.lock.timestamp {
                        self.fsi.lock = *qc_ref;
                    }
                }
            }
            res.decision = if strong {
                VoteDecision::StrongVote
            } else {
                VoteDecision::WeakVote
            };
        }

        debug!(
            block_num = %block.block_num(),
            block_id = %block.id(),
            liveness = res.liveness_check,
            safety = res.safety_check,
            monotony = res.monotony_check,
            decision = %res.decision,
            lock_num = %self.fsi.lock.block_num(),
            "Vote decided"
        );
        res
    }

    /// Adopt the lock implied by a strong QC on `block` that this finalizer
    /// took part in, if it is newer than what is stored.
    pub fn maybe_update_fsi(&mut self, block: &BlockState) -> bool {
        let core = block.core();
        let Some(qc_ref) = core.get_block_reference(core.latest_qc_claim().block_num) else {
            return false;
        };
        if qc_ref.timestamp > self.fsi.lock.timestamp
            && block.timestamp() > self.fsi.last_vote.timestamp
        {
            self.fsi.lock = *qc_ref;
            self.fsi.last_vote = block.block_ref();
            self.fsi.last_vote_range_start = core.latest_qc_block_timestamp();
            return true;
        }
        false
    }

    /// Decide and, if voting, sign. `digest` is the block's finality digest;
    /// weak votes sign its weak form.
    pub fn maybe_vote(
        &mut self,
        public_key: &BlsPublicKey,
        block: &BlockState,
        digest: &Digest,
    ) -> Option<VoteMessage> {
        let (strong, signature) = match self.decide_vote(block).decision {
            VoteDecision::NoVote => return None,
            VoteDecision::StrongVote => (true, self.private_key.sign(digest.as_bytes())),
            VoteDecision::WeakVote => (false, self.private_key.sign(&weak_digest(digest))),
        };
        Some(VoteMessage::new(block.id(), strong, *public_key, signature))
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer").field("fsi", &self.fsi).finish_non_exhaustive()
    }
}
