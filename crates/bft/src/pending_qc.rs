//! Per-policy vote accumulator for one block.
//!
//! A [`PendingQuorumCertificate`] collects strong and weak votes from the
//! finalizers of one policy and tracks how close the block is to a QC:
//!
//! ```text
//! Unrestricted ──weak quorum──► WeakAchieved ──strong unreachable──► WeakFinal
//!      │  └──strong unreachable──► Restricted ──weak quorum──────────────┘
//!      └────────────── strong quorum (also from Restricted/WeakAchieved) ──► Strong
//! ```
//!
//! Duplicate votes are rejected without taking the lock via one atomic flag
//! per finalizer and strength. Signatures are verified before the lock is
//! taken, so invalid votes never contend with valid ones.

use parking_lot::Mutex;
use savanna_core::VoteStatus;
use savanna_types::{
    AggregateSignature, BlockNum, BlsPublicKey, BlsSignature, FinalizerPolicy, QuorumCertificate,
    VoteBitset,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Aggregation state of a pending QC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingState {
    /// No quorum yet and a strong quorum is still reachable.
    Unrestricted,
    /// No quorum yet and a strong quorum is no longer reachable.
    Restricted,
    /// Weak quorum met, strong quorum still reachable.
    WeakAchieved,
    /// Weak quorum met, strong quorum no longer reachable.
    WeakFinal,
    /// Strong quorum met.
    Strong,
}

impl PendingState {
    /// True once a QC (weak or strong) can be extracted.
    pub fn is_quorum_met(self) -> bool {
        matches!(
            self,
            PendingState::Strong | PendingState::WeakAchieved | PendingState::WeakFinal
        )
    }
}

impl fmt::Display for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PendingState::Unrestricted => "unrestricted",
            PendingState::Restricted => "restricted",
            PendingState::WeakAchieved => "weak_achieved",
            PendingState::WeakFinal => "weak_final",
            PendingState::Strong => "strong",
        };
        f.write_str(name)
    }
}

/// Votes of one strength.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTally {
    /// Finalizers whose vote is folded into `signature`.
    pub bitset: VoteBitset,
    /// Aggregate of their signatures.
    pub signature: AggregateSignature,
    /// Sum of their weights.
    pub sum: u64,
}

impl VoteTally {
    fn new(num_finalizers: usize) -> Self {
        Self {
            bitset: VoteBitset::new(num_finalizers),
            signature: AggregateSignature::new(),
            sum: 0,
        }
    }

    fn add(&mut self, index: usize, signature: &BlsSignature, weight: u64) -> bool {
        if self.signature.aggregate(signature).is_err() {
            return false;
        }
        self.bitset.set(index);
        self.sum += weight;
        true
    }
}

/// Everything needed to rebuild a pending QC, e.g. after loading a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQcSnapshot {
    /// Strong votes.
    pub strong: VoteTally,
    /// Weak votes.
    pub weak: VoteTally,
    /// Aggregation state.
    pub state: PendingState,
    /// Best QC received from the network.
    pub received_qc: Option<QuorumCertificate>,
}

/// Mutable state, guarded by the accumulator's mutex.
#[derive(Debug)]
struct Accumulator {
    strong: VoteTally,
    weak: VoteTally,
    state: PendingState,
    received_qc: Option<QuorumCertificate>,
}

/// Accumulates one policy's votes on one block.
pub struct PendingQuorumCertificate {
    quorum: u64,
    max_weak_sum_before_weak_final: u64,
    /// Lock-free duplicate check, one flag per finalizer.
    strong_processed: Box<[AtomicBool]>,
    weak_processed: Box<[AtomicBool]>,
    inner: Mutex<Accumulator>,
}

fn processed_flags(bitset: &VoteBitset) -> Box<[AtomicBool]> {
    (0..bitset.len())
        .map(|i| AtomicBool::new(bitset.is_set(i)))
        .collect()
}

impl PendingQuorumCertificate {
    /// Empty accumulator for `num_finalizers` finalizers.
    pub fn new(num_finalizers: usize, quorum: u64, max_weak_sum_before_weak_final: u64) -> Self {
        Self::from_snapshot(
            quorum,
            max_weak_sum_before_weak_final,
            PendingQcSnapshot {
                strong: VoteTally::new(num_finalizers),
                weak: VoteTally::new(num_finalizers),
                state: PendingState::Unrestricted,
                received_qc: None,
            },
        )
    }

    /// Empty accumulator sized and thresholded for `policy`.
    pub fn for_policy(policy: &FinalizerPolicy) -> Self {
        Self::new(
            policy.len(),
            policy.threshold(),
            policy.max_weak_sum_before_weak_final(),
        )
    }

    /// Rebuild an accumulator; the duplicate flags are seeded from the bitsets.
    pub fn from_snapshot(
        quorum: u64,
        max_weak_sum_before_weak_final: u64,
        snapshot: PendingQcSnapshot,
    ) -> Self {
        Self {
            quorum,
            max_weak_sum_before_weak_final,
            strong_processed: processed_flags(&snapshot.strong.bitset),
            weak_processed: processed_flags(&snapshot.weak.bitset),
            inner: Mutex::new(Accumulator {
                strong: snapshot.strong,
                weak: snapshot.weak,
                state: snapshot.state,
                received_qc: snapshot.received_qc,
            }),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> PendingQcSnapshot {
        let inner = self.inner.lock();
        PendingQcSnapshot {
            strong: inner.strong.clone(),
            weak: inner.weak.clone(),
            state: inner.state,
            received_qc: inner.received_qc.clone(),
        }
    }

    /// Weight needed for quorum.
    pub fn quorum(&self) -> u64 {
        self.quorum
    }

    /// Number of finalizers tracked.
    pub fn num_finalizers(&self) -> usize {
        self.strong_processed.len()
    }

    /// Current aggregation state.
    pub fn state(&self) -> PendingState {
        self.inner.lock().state
    }

    /// True once local votes form a QC.
    pub fn is_quorum_met(&self) -> bool {
        self.state().is_quorum_met()
    }

    /// Lock-free check whether finalizer `index` voted at either strength.
    ///
    /// Out-of-range indices read as not voted.
    pub fn has_voted(&self, index: usize) -> bool {
        let voted = |flags: &[AtomicBool]| flags.get(index).is_some_and(|f| f.load(Ordering::Relaxed));
        voted(&self.strong_processed) || voted(&self.weak_processed)
    }

    /// Add a finalizer's vote.
    ///
    /// `finalizer_digest` is the message the vote signed: the finality
    /// digest for strong votes, the weak digest for weak votes.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range for the policy.
    #[allow(clippy::too_many_arguments)]
    pub fn add_vote(
        &self,
        connection_id: u32,
        block_num: BlockNum,
        strong: bool,
        finalizer_digest: &[u8],
        index: usize,
        public_key: &BlsPublicKey,
        signature: &BlsSignature,
        weight: u64,
    ) -> VoteStatus {
        self.add_vote_with(connection_id, block_num, strong, index, signature, weight, || {
            public_key.verify(finalizer_digest, signature)
        })
    }

    /// [`add_vote`](Self::add_vote) with a caller-supplied signature check,
    /// which runs only if the vote is not a duplicate.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_vote_with(
        &self,
        connection_id: u32,
        block_num: BlockNum,
        strong: bool,
        index: usize,
        signature: &BlsSignature,
        weight: u64,
        verify: impl FnOnce() -> bool,
    ) -> VoteStatus {
        assert!(
            index < self.num_finalizers(),
            "vote index {index} out of range for {} finalizers",
            self.num_finalizers()
        );

        if self.has_voted(index) {
            trace!(connection_id, %block_num, index, "Duplicate vote");
            return VoteStatus::Duplicate;
        }

        if !verify() {
            return VoteStatus::InvalidSignature;
        }

        let mut inner = self.inner.lock();
        let pre_state = inner.state;
        let status = if inner.strong.bitset.is_set(index) || inner.weak.bitset.is_set(index) {
            VoteStatus::Duplicate
        } else if strong {
            self.add_strong_vote(&mut inner, index, signature, weight)
        } else {
            self.add_weak_vote(&mut inner, index, signature, weight)
        };
        let post_state = inner.state;
        drop(inner);

        debug!(
            connection_id,
            %block_num,
            index,
            strong,
            status = %status,
            pre_state = %pre_state,
            post_state = %post_state,
            quorum_met = post_state.is_quorum_met(),
            "Vote added"
        );
        status
    }

    fn add_strong_vote(
        &self,
        inner: &mut Accumulator,
        index: usize,
        signature: &BlsSignature,
        weight: u64,
    ) -> VoteStatus {
        if !inner.strong.add(index, signature, weight) {
            return VoteStatus::InvalidSignature;
        }
        self.strong_processed[index].store(true, Ordering::Relaxed);

        let total = inner.strong.sum + inner.weak.sum;
        inner.state = match inner.state {
            PendingState::Unrestricted | PendingState::Restricted
                if inner.strong.sum >= self.quorum =>
            {
                PendingState::Strong
            }
            PendingState::Restricted if total >= self.quorum => PendingState::WeakFinal,
            PendingState::Unrestricted if total >= self.quorum => PendingState::WeakAchieved,
            PendingState::WeakAchieved if inner.strong.sum >= self.quorum => PendingState::Strong,
            state => state,
        };
        VoteStatus::Success
    }

    fn add_weak_vote(
        &self,
        inner: &mut Accumulator,
        index: usize,
        signature: &BlsSignature,
        weight: u64,
    ) -> VoteStatus {
        if !inner.weak.add(index, signature, weight) {
            return VoteStatus::InvalidSignature;
        }
        self.weak_processed[index].store(true, Ordering::Relaxed);

        let weak_sum = inner.weak.sum;
        match inner.state {
            PendingState::Unrestricted | PendingState::Restricted => {
                if weak_sum + inner.strong.sum >= self.quorum {
                    inner.state = PendingState::WeakAchieved;
                }
                if weak_sum > self.max_weak_sum_before_weak_final {
                    inner.state = match inner.state {
                        PendingState::WeakAchieved => PendingState::WeakFinal,
                        PendingState::Unrestricted => PendingState::Restricted,
                        state => state,
                    };
                }
            }
            PendingState::WeakAchieved => {
                if weak_sum >= self.max_weak_sum_before_weak_final {
                    inner.state = PendingState::WeakFinal;
                }
            }
            PendingState::WeakFinal | PendingState::Strong => {}
        }
        VoteStatus::Success
    }

    /// QC from local votes. Requires quorum.
    fn extract_qc(inner: &Accumulator, block_num: BlockNum) -> Option<QuorumCertificate> {
        if inner.state == PendingState::Strong {
            return Some(QuorumCertificate {
                block_num,
                strong_votes: Some(inner.strong.bitset.clone()),
                weak_votes: None,
                signature: inner.strong.signature.signature()?,
            });
        }
        if !inner.state.is_quorum_met() {
            return None;
        }
        let mut signature = inner.strong.signature.clone();
        signature.merge(&inner.weak.signature).ok()?;
        Some(QuorumCertificate {
            block_num,
            strong_votes: Some(inner.strong.bitset.clone()),
            weak_votes: Some(inner.weak.bitset.clone()),
            signature: signature.signature()?,
        })
    }

    /// Best QC known for this block.
    ///
    /// Without a local quorum the received QC (if any) is returned. With both,
    /// the received QC wins unless it is weak and the local one strong.
    pub fn get_best_qc(&self, block_num: BlockNum) -> Option<QuorumCertificate> {
        let inner = self.inner.lock();
        let Some(local) = Self::extract_qc(&inner, block_num) else {
            return inner.received_qc.clone();
        };
        match &inner.received_qc {
            None => Some(local),
            Some(received) if received.is_strong() || local.is_weak() => Some(received.clone()),
            Some(_) => Some(local),
        }
    }

    /// Store a QC received from the network if it improves on the stored one.
    ///
    /// Returns whether it was stored.
    pub fn set_received_qc(&self, qc: &QuorumCertificate) -> bool {
        let mut inner = self.inner.lock();
        let better = match &inner.received_qc {
            None => true,
            Some(current) => current.is_weak() && qc.is_strong(),
        };
        if better {
            inner.received_qc = Some(qc.clone());
        }
        better
    }

    /// True when a strong QC has been received from the network.
    pub fn received_qc_is_strong(&self) -> bool {
        self.inner
            .lock()
            .received_qc
            .as_ref()
            .is_some_and(|qc| qc.is_strong())
    }
}

impl fmt::Debug for PendingQuorumCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PendingQuorumCertificate")
            .field("quorum", &self.quorum)
            .field("state", &inner.state)
            .field("strong_sum", &inner.strong.sum)
            .field("weak_sum", &inner.weak.sum)
            .finish()
    }
}
