//! Vote aggregation across the finalizer policies of one block.
//!
//! While a policy change is in flight a block is certified by both the
//! active and the pending policy, so each vote is offered to both
//! accumulators. A finalizer present in both policies signs once; the
//! signature is verified at most once per vote.

use crate::pending_qc::PendingQuorumCertificate;
use savanna_core::{HasVoted, VoteStatus};
use savanna_messages::VoteMessage;
use savanna_types::{
    BlockNum, BlockQuorumCertificate, BlsPublicKey, FinalizerPolicy, QuorumCertificate,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Outcome of [`AggregatingQc::aggregate_vote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateVoteResult {
    /// Combined status.
    pub status: VoteStatus,
    /// Voter's index in the active policy, if present.
    pub active_index: Option<usize>,
    /// Voter's index in the pending policy, if present.
    pub pending_index: Option<usize>,
}

/// A finalizer whose vote is absent from a QC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MissingVote {
    /// Generation of the policy the finalizer belongs to.
    pub generation: u32,
    /// Finalizer key.
    pub public_key: BlsPublicKey,
}

/// Per-finalizer breakdown of a QC, across both policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QcVoteMetrics {
    pub strong_votes: BTreeSet<BlsPublicKey>,
    pub weak_votes: BTreeSet<BlsPublicKey>,
    pub missing_votes: BTreeSet<BlsPublicKey>,
}

/// Pending QCs for the active and (optional) pending policy of one block.
#[derive(Debug)]
pub struct AggregatingQc {
    active_policy: Arc<FinalizerPolicy>,
    pending_policy: Option<Arc<FinalizerPolicy>>,
    active: PendingQuorumCertificate,
    pending: Option<PendingQuorumCertificate>,
}

impl AggregatingQc {
    pub fn new(
        active_policy: Arc<FinalizerPolicy>,
        pending_policy: Option<Arc<FinalizerPolicy>>,
    ) -> Self {
        let active = PendingQuorumCertificate::for_policy(&active_policy);
        let pending = pending_policy
            .as_deref()
            .map(PendingQuorumCertificate::for_policy);
        Self {
            active_policy,
            pending_policy,
            active,
            pending,
        }
    }

    /// Accumulator of the active policy.
    pub fn active(&self) -> &PendingQuorumCertificate {
        &self.active
    }

    /// Accumulator of the pending policy, if one is pending.
    pub fn pending(&self) -> Option<&PendingQuorumCertificate> {
        self.pending.as_ref()
    }

    /// Offer a vote to every policy the voter belongs to.
    ///
    /// `finalizer_digest` is the message the vote must have signed. The
    /// active policy is tried first; if it rejects the vote for anything
    /// other than an unknown key, the pending policy is not consulted.
    pub fn aggregate_vote(
        &self,
        connection_id: u32,
        vote: &VoteMessage,
        block_num: BlockNum,
        finalizer_digest: &[u8],
    ) -> AggregateVoteResult {
        let mut verified: Option<bool> = None;
        let mut verify = || {
            *verified.get_or_insert_with(|| vote.finalizer_key.verify(finalizer_digest, &vote.signature))
        };

        let active_index = self.active_policy.index_of(&vote.finalizer_key);
        let mut status = Self::add_to(
            &self.active_policy,
            &self.active,
            active_index,
            connection_id,
            vote,
            block_num,
            &mut verify,
        );

        let mut pending_index = None;
        if matches!(status, VoteStatus::Success | VoteStatus::UnknownPublicKey) {
            if let (Some(policy), Some(pending)) = (&self.pending_policy, &self.pending) {
                pending_index = policy.index_of(&vote.finalizer_key);
                let pending_status = Self::add_to(
                    policy,
                    pending,
                    pending_index,
                    connection_id,
                    vote,
                    block_num,
                    &mut verify,
                );
                if pending_status != VoteStatus::UnknownPublicKey {
                    status = pending_status;
                }
            }
        }

        if status == VoteStatus::UnknownPublicKey {
            warn!(
                connection_id,
                %block_num,
                key = %vote.finalizer_key,
                "Vote from finalizer not in any policy of the block"
            );
        }

        AggregateVoteResult {
            status,
            active_index,
            pending_index,
        }
    }

    fn add_to(
        policy: &FinalizerPolicy,
        accumulator: &PendingQuorumCertificate,
        index: Option<usize>,
        connection_id: u32,
        vote: &VoteMessage,
        block_num: BlockNum,
        verify: &mut impl FnMut() -> bool,
    ) -> VoteStatus {
        let Some((index, authority)) = index.and_then(|i| policy.finalizer(i).map(|f| (i, f)))
        else {
            return VoteStatus::UnknownPublicKey;
        };
        accumulator.add_vote_with(
            connection_id,
            block_num,
            vote.strong,
            index,
            &vote.signature,
            authority.weight,
            verify,
        )
    }

    /// Whether `key` has voted, considering both policies.
    pub fn has_voted(&self, key: &BlsPublicKey) -> HasVoted {
        let active = Self::has_voted_in(&self.active_policy, &self.active, key);
        let (Some(policy), Some(pending)) = (&self.pending_policy, &self.pending) else {
            return active;
        };
        if active == HasVoted::NotVoted {
            return active;
        }
        match Self::has_voted_in(policy, pending, key) {
            HasVoted::IrrelevantFinalizer => active,
            pending => pending,
        }
    }

    fn has_voted_in(
        policy: &FinalizerPolicy,
        accumulator: &PendingQuorumCertificate,
        key: &BlsPublicKey,
    ) -> HasVoted {
        match policy.index_of(key) {
            None => HasVoted::IrrelevantFinalizer,
            Some(i) if accumulator.has_voted(i) => HasVoted::Voted,
            Some(_) => HasVoted::NotVoted,
        }
    }

    /// True when every policy has a local quorum.
    pub fn is_quorum_met(&self) -> bool {
        self.active.is_quorum_met() && self.pending.as_ref().is_none_or(|p| p.is_quorum_met())
    }

    /// Best QC for the block; requires one for every policy.
    pub fn get_best_qc(&self, block_num: BlockNum) -> Option<BlockQuorumCertificate> {
        let active = self.active.get_best_qc(block_num)?;
        let pending = match &self.pending {
            Some(pending) => Some(pending.get_best_qc(block_num)?),
            None => None,
        };
        Some(BlockQuorumCertificate { active, pending })
    }

    /// Store a received QC part by part. Returns whether any part was stored.
    pub fn set_received_qc(&self, qc: &BlockQuorumCertificate) -> bool {
        let active_better = self.active.set_received_qc(&qc.active);
        let pending_better = match (&self.pending, &qc.pending) {
            (Some(pending), Some(received)) => pending.set_received_qc(received),
            _ => false,
        };
        active_better || pending_better
    }

    /// True when every policy has received a strong QC.
    pub fn received_qc_is_strong(&self) -> bool {
        self.active.received_qc_is_strong()
            && self
                .pending
                .as_ref()
                .is_none_or(|p| p.received_qc_is_strong())
    }

    /// Finalizers of either policy with no vote in `qc`.
    pub fn missing_votes(&self, qc: &BlockQuorumCertificate) -> Vec<MissingVote> {
        let mut missing = Self::missing_in(&self.active_policy, &qc.active);
        if let (Some(policy), Some(pending)) = (&self.pending_policy, &qc.pending) {
            missing.extend(Self::missing_in(policy, pending));
        }
        missing
    }

    fn missing_in(policy: &FinalizerPolicy, qc: &QuorumCertificate) -> Vec<MissingVote> {
        policy
            .finalizers()
            .iter()
            .enumerate()
            .filter(|(i, _)| !qc.has_vote(*i))
            .map(|(_, f)| MissingVote {
                generation: policy.generation(),
                public_key: f.public_key,
            })
            .collect()
    }

    /// Strong, weak and missing voters of `qc`. A dual finalizer is counted
    /// once.
    pub fn vote_metrics(&self, qc: &BlockQuorumCertificate) -> QcVoteMetrics {
        let mut metrics = QcVoteMetrics::default();
        let mut add = |policy: &FinalizerPolicy, qc: &QuorumCertificate| {
            for (i, fin) in policy.finalizers().iter().enumerate() {
                let strong = qc.strong_votes.as_ref().is_some_and(|v| v.is_set(i));
                let weak = qc.weak_votes.as_ref().is_some_and(|v| v.is_set(i));
                let set = match (strong, weak) {
                    (true, _) => &mut metrics.strong_votes,
                    (_, true) => &mut metrics.weak_votes,
                    _ => &mut metrics.missing_votes,
                };
                set.insert(fin.public_key);
            }
        };
        add(&self.active_policy, &qc.active);
        if let (Some(policy), Some(pending)) = (&self.pending_policy, &qc.pending) {
            add(policy, pending);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending_qc::PendingState;
    use savanna_test_helpers::{equal_weight_policy, sign_vote, test_keys};
    use savanna_types::{BlockId, BlsPrivateKey, Digest};
    use tracing_test::traced_test;

    const BLOCK: BlockNum = BlockNum(7);

    fn digest() -> Digest {
        Digest::from_bytes(b"aggregating")
    }

    fn block_id() -> BlockId {
        BlockId::new(BLOCK, &digest())
    }

    fn vote(key: &BlsPrivateKey, strong: bool) -> VoteMessage {
        sign_vote(key, block_id(), &digest(), strong)
    }

    fn aggregate(qc: &AggregatingQc, vote: &VoteMessage) -> AggregateVoteResult {
        let message = savanna_types::vote_signing_message(&digest(), vote.strong);
        qc.aggregate_vote(1, vote, BLOCK, &message)
    }

    /// Active policy over keys 0..3, pending policy over keys 2..5.
    fn dual() -> (Vec<BlsPrivateKey>, AggregatingQc) {
        let keys = test_keys(5);
        let active = Arc::new(equal_weight_policy(1, &keys[0..3]));
        let pending = Arc::new(equal_weight_policy(2, &keys[2..5]));
        (keys, AggregatingQc::new(active, Some(pending)))
    }

    #[traced_test]
    #[test]
    fn test_active_only_quorum() {
        let keys = test_keys(3);
        let qc = AggregatingQc::new(Arc::new(equal_weight_policy(1, &keys)), None);

        let first = aggregate(&qc, &vote(&keys[0], true));
        assert_eq!(first.status, VoteStatus::Success);
        assert_eq!(first.active_index, Some(0));
        assert_eq!(first.pending_index, None);
        assert!(qc.get_best_qc(BLOCK).is_none());

        assert_eq!(aggregate(&qc, &vote(&keys[0], true)).status, VoteStatus::Duplicate);
        assert_eq!(aggregate(&qc, &vote(&keys[1], true)).status, VoteStatus::Success);

        assert!(qc.is_quorum_met());
        let best = qc.get_best_qc(BLOCK).unwrap();
        assert!(best.is_strong());
        assert!(best.pending.is_none());
    }

    #[traced_test]
    #[test]
    fn test_unknown_key_and_bad_signature() {
        let (keys, qc) = dual();

        let stranger = BlsPrivateKey::from_seed(&[99; 32]);
        assert_eq!(
            aggregate(&qc, &vote(&stranger, true)).status,
            VoteStatus::UnknownPublicKey
        );
        assert!(logs_contain("not in any policy"));

        // Signed with the strong digest but flagged weak.
        let mut forged = vote(&keys[0], true);
        forged.strong = false;
        assert_eq!(aggregate(&qc, &forged).status, VoteStatus::InvalidSignature);
        assert_eq!(qc.has_voted(&keys[0].public_key()), HasVoted::NotVoted);
    }

    #[traced_test]
    #[test]
    fn test_dual_finalizer_counts_in_both_policies() {
        let (keys, qc) = dual();

        let result = aggregate(&qc, &vote(&keys[2], true));
        assert_eq!(result.status, VoteStatus::Success);
        assert_eq!(result.active_index, Some(2));
        assert_eq!(result.pending_index, Some(0));
        assert!(qc.active().has_voted(2));
        assert!(qc.pending().unwrap().has_voted(0));

        // Pending-only finalizer: unknown to active, success via pending.
        let result = aggregate(&qc, &vote(&keys[4], true));
        assert_eq!(result.status, VoteStatus::Success);
        assert_eq!(result.active_index, None);
        assert_eq!(qc.pending().unwrap().state(), PendingState::Strong);

        // Active has one strong vote of two needed.
        assert!(!qc.is_quorum_met());
        assert!(qc.get_best_qc(BLOCK).is_none());

        aggregate(&qc, &vote(&keys[0], true));
        assert!(qc.is_quorum_met());
        let best = qc.get_best_qc(BLOCK).unwrap();
        assert!(best.is_strong());
        assert_eq!(
            best.pending.as_ref().unwrap().strong_votes.as_ref().unwrap().set_indices().collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    #[traced_test]
    #[test]
    fn test_has_voted_across_policies() {
        let (keys, qc) = dual();
        let stranger = BlsPrivateKey::from_seed(&[99; 32]);

        assert_eq!(qc.has_voted(&stranger.public_key()), HasVoted::IrrelevantFinalizer);
        assert_eq!(qc.has_voted(&keys[0].public_key()), HasVoted::NotVoted);
        assert_eq!(qc.has_voted(&keys[4].public_key()), HasVoted::NotVoted);

        aggregate(&qc, &vote(&keys[0], false));
        aggregate(&qc, &vote(&keys[4], true));
        assert_eq!(qc.has_voted(&keys[0].public_key()), HasVoted::Voted);
        assert_eq!(qc.has_voted(&keys[4].public_key()), HasVoted::Voted);
        assert_eq!(qc.has_voted(&keys[2].public_key()), HasVoted::NotVoted);
    }

    #[traced_test]
    #[test]
    fn test_missing_votes_and_metrics() {
        let (keys, qc) = dual();
        // Active: weak 0 and 1, strong 2. Pending: strong 2 and 3.
        for (i, key) in keys[..4].iter().enumerate() {
            aggregate(&qc, &vote(key, i >= 2));
        }
        let best = qc.get_best_qc(BLOCK).unwrap();
        assert!(best.active.is_weak());
        assert!(best.pending.as_ref().unwrap().is_strong());

        let missing = qc.missing_votes(&best);
        assert_eq!(
            missing,
            vec![MissingVote {
                generation: 2,
                public_key: keys[4].public_key(),
            }]
        );

        let metrics = qc.vote_metrics(&best);
        assert_eq!(
            metrics.strong_votes,
            BTreeSet::from([keys[2].public_key(), keys[3].public_key()])
        );
        assert_eq!(
            metrics.weak_votes,
            BTreeSet::from([keys[0].public_key(), keys[1].public_key()])
        );
        assert_eq!(metrics.missing_votes, BTreeSet::from([keys[4].public_key()]));
    }

    #[traced_test]
    #[test]
    fn test_received_qc_needs_every_policy_strong() {
        let (keys, local) = dual();
        for key in &keys[..4] {
            aggregate(&local, &vote(key, true));
        }
        let strong = local.get_best_qc(BLOCK).unwrap();

        let (_, remote) = dual();
        let mut partial = strong.clone();
        partial.pending = None;
        assert!(remote.set_received_qc(&partial));
        assert!(!remote.received_qc_is_strong());

        assert!(remote.set_received_qc(&strong));
        assert!(remote.received_qc_is_strong());
        assert!(!remote.set_received_qc(&strong));
    }
}
