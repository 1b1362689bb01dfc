//! Quorum certificates.
//!
//! A [`QuorumCertificate`] proves that a quorum of one finalizer policy voted
//! on a block. A [`BlockQuorumCertificate`] bundles the certificate for the
//! active policy with the one for the pending policy while a policy change is
//! in flight.

use crate::{
    weak_digest, BlockNum, BlsPublicKey, BlsSignature, Digest, FinalizerPolicy, VoteBitset,
};

/// Aggregated votes of one finalizer policy on one block.
///
/// Only `strong_votes` present means a strong QC. Any `weak_votes` present
/// means a weak QC; its signature aggregates both strong and weak signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    /// Block the votes are on.
    pub block_num: BlockNum,
    /// Finalizers that voted strong.
    pub strong_votes: Option<VoteBitset>,
    /// Finalizers that voted weak.
    pub weak_votes: Option<VoteBitset>,
    /// Aggregate of every included vote's signature.
    pub signature: BlsSignature,
}

impl QuorumCertificate {
    /// Strong QC: every vote is strong.
    pub fn is_strong(&self) -> bool {
        self.weak_votes.is_none()
    }

    /// Weak QC: at least one vote is weak.
    pub fn is_weak(&self) -> bool {
        self.weak_votes.is_some()
    }

    fn voted_strong(&self, index: usize) -> bool {
        self.strong_votes.as_ref().is_some_and(|v| v.is_set(index))
    }

    fn voted_weak(&self, index: usize) -> bool {
        self.weak_votes.as_ref().is_some_and(|v| v.is_set(index))
    }

    /// True when finalizer `index` voted at either strength.
    pub fn has_vote(&self, index: usize) -> bool {
        self.voted_strong(index) || self.voted_weak(index)
    }

    /// True when `self` at `my_index` and `other` at `other_index` recorded
    /// the same vote.
    pub fn vote_same_at(&self, other: &QuorumCertificate, my_index: usize, other_index: usize) -> bool {
        self.voted_strong(my_index) == other.voted_strong(other_index)
            && self.voted_weak(my_index) == other.voted_weak(other_index)
    }

    /// Check bitset presence and sizes, and that nobody voted both ways.
    pub fn verify_vote_format(&self, policy: &FinalizerPolicy) -> Result<(), QcError> {
        if self.strong_votes.is_none() && self.weak_votes.is_none() {
            return Err(QcError::NoVotes {
                generation: policy.generation(),
            });
        }

        let expected = policy.len();
        for votes in [&self.strong_votes, &self.weak_votes].into_iter().flatten() {
            if votes.len() != expected {
                return Err(QcError::BitsetSizeMismatch {
                    bitset: votes.len(),
                    finalizers: expected,
                });
            }
        }

        if let (Some(strong), Some(weak)) = (&self.strong_votes, &self.weak_votes) {
            if let Some(index) = strong.set_indices().find(|&i| weak.is_set(i)) {
                return Err(QcError::VotedBothWays { index });
            }
        }
        Ok(())
    }

    /// Check that the voted weight reaches the policy threshold.
    pub fn verify_weights(&self, policy: &FinalizerPolicy) -> Result<(), QcError> {
        let weight_of = |votes: &Option<VoteBitset>| {
            votes.as_ref().map_or(0, |v| {
                v.weight(|i| policy.finalizer(i).map_or(0, |f| f.weight))
            })
        };
        let strong = weight_of(&self.strong_votes);
        let weak = weight_of(&self.weak_votes);

        let voted = if self.is_strong() { strong } else { strong + weak };
        if voted < policy.threshold() {
            return Err(QcError::QuorumNotMet {
                strong,
                weak,
                threshold: policy.threshold(),
            });
        }
        Ok(())
    }

    /// Verify the aggregate signature against the strong and weak digests.
    pub fn verify_signature(
        &self,
        policy: &FinalizerPolicy,
        finality_digest: &Digest,
    ) -> Result<(), QcError> {
        let signers = |votes: &Option<VoteBitset>| -> Vec<&BlsPublicKey> {
            votes.as_ref().map_or_else(Vec::new, |v| {
                v.set_indices()
                    .filter_map(|i| policy.finalizer(i).map(|f| &f.public_key))
                    .collect()
            })
        };
        let strong_keys = signers(&self.strong_votes);
        let weak_keys = signers(&self.weak_votes);
        let weak_message = weak_digest(finality_digest);

        let groups: [(&[&BlsPublicKey], &[u8]); 2] = [
            (&strong_keys, finality_digest.as_bytes()),
            (&weak_keys, &weak_message),
        ];
        if !self.signature.verify_aggregate(&groups) {
            return Err(QcError::InvalidSignature {
                block_num: self.block_num,
            });
        }
        Ok(())
    }
}

/// The QC attached to a block: one certificate per policy in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockQuorumCertificate {
    /// Certificate of the active policy.
    pub active: QuorumCertificate,
    /// Certificate of the pending policy, if one is pending.
    pub pending: Option<QuorumCertificate>,
}

impl BlockQuorumCertificate {
    /// Certificate for a block with only an active policy.
    pub fn active_only(active: QuorumCertificate) -> Self {
        Self {
            active,
            pending: None,
        }
    }

    /// Block the certificate is on.
    pub fn block_num(&self) -> BlockNum {
        self.active.block_num
    }

    /// Strong only when every part is strong.
    pub fn is_strong(&self) -> bool {
        self.active.is_strong() && self.pending.as_ref().is_none_or(|p| p.is_strong())
    }

    /// Weak when any part is weak.
    pub fn is_weak(&self) -> bool {
        !self.is_strong()
    }

    /// Structural checks: vote format, weights, and dual-finalizer
    /// consistency. Signatures are not checked.
    pub fn verify_basic(
        &self,
        active_policy: &FinalizerPolicy,
        pending_policy: Option<&FinalizerPolicy>,
    ) -> Result<(), QcError> {
        self.active.verify_vote_format(active_policy)?;
        self.active.verify_weights(active_policy)?;

        match (&self.pending, pending_policy) {
            (Some(pending), Some(policy)) => {
                self.verify_dual_finalizers(active_policy, pending, policy)?;
                pending.verify_vote_format(policy)?;
                pending.verify_weights(policy)?;
                Ok(())
            }
            (Some(_), None) => Err(QcError::UnexpectedPendingSignature {
                block_num: self.block_num(),
            }),
            (None, Some(_)) => Err(QcError::MissingPendingSignature {
                block_num: self.block_num(),
            }),
            (None, None) => Ok(()),
        }
    }

    /// A finalizer present in both policies must have voted the same way in
    /// both certificates.
    fn verify_dual_finalizers(
        &self,
        active_policy: &FinalizerPolicy,
        pending: &QuorumCertificate,
        pending_policy: &FinalizerPolicy,
    ) -> Result<(), QcError> {
        for (active_index, fin) in active_policy.finalizers().iter().enumerate() {
            let Some(pending_index) = pending_policy.index_of(&fin.public_key) else {
                continue;
            };
            if !self.active.vote_same_at(pending, active_index, pending_index) {
                return Err(QcError::DualFinalizerMismatch {
                    block_num: self.block_num(),
                    public_key: fin.public_key,
                });
            }
        }
        Ok(())
    }

    /// Verify every part's aggregate signature.
    pub fn verify_signatures(
        &self,
        active_policy: &FinalizerPolicy,
        pending_policy: Option<&FinalizerPolicy>,
        finality_digest: &Digest,
    ) -> Result<(), QcError> {
        self.active.verify_signature(active_policy, finality_digest)?;
        if let Some(pending) = &self.pending {
            let policy = pending_policy.ok_or(QcError::UnexpectedPendingSignature {
                block_num: self.block_num(),
            })?;
            pending.verify_signature(policy, finality_digest)?;
        }
        Ok(())
    }
}

/// Reasons a QC is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QcError {
    /// Neither strong nor weak votes present.
    #[error("Neither strong nor weak votes present for policy generation {generation}")]
    NoVotes {
        /// Policy generation.
        generation: u32,
    },

    /// Bitset size differs from the policy size.
    #[error("Vote bitset size {bitset} does not match {finalizers} finalizers")]
    BitsetSizeMismatch {
        /// Bitset length.
        bitset: usize,
        /// Policy length.
        finalizers: usize,
    },

    /// A finalizer appears in both bitsets.
    #[error("Finalizer at index {index} voted both strong and weak")]
    VotedBothWays {
        /// Offending index.
        index: usize,
    },

    /// Voted weight below threshold.
    #[error("Quorum not met: strong {strong}, weak {weak}, threshold {threshold}")]
    QuorumNotMet {
        /// Strong weight.
        strong: u64,
        /// Weak weight.
        weak: u64,
        /// Policy threshold.
        threshold: u64,
    },

    /// A finalizer in both policies voted differently in each.
    #[error("QC {block_num} has dual finalizer {public_key} voting differently per policy")]
    DualFinalizerMismatch {
        /// Block of the QC.
        block_num: BlockNum,
        /// Dual finalizer's key.
        public_key: BlsPublicKey,
    },

    /// Pending certificate without a pending policy.
    #[error("QC {block_num} has a pending policy signature but no pending policy exists")]
    UnexpectedPendingSignature {
        /// Block of the QC.
        block_num: BlockNum,
    },

    /// Pending policy without a pending certificate.
    #[error("QC {block_num} lacks a signature for the pending policy")]
    MissingPendingSignature {
        /// Block of the QC.
        block_num: BlockNum,
    },

    /// QC is for a different block than the one checking it.
    #[error("QC is for block {actual}, expected {expected}")]
    BlockMismatch {
        /// Block doing the check.
        expected: BlockNum,
        /// Block named by the QC.
        actual: BlockNum,
    },

    /// Aggregate signature does not verify.
    #[error("QC {block_num} signature verification failed")]
    InvalidSignature {
        /// Block of the QC.
        block_num: BlockNum,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregateSignature, BlsPrivateKey, FinalizerAuthority};

    fn keys(n: u8) -> Vec<BlsPrivateKey> {
        (1..=n).map(|i| BlsPrivateKey::from_seed(&[i; 32])).collect()
    }

    fn policy(keys: &[BlsPrivateKey], threshold: u64) -> FinalizerPolicy {
        let fins = keys
            .iter()
            .enumerate()
            .map(|(i, k)| FinalizerAuthority::new(format!("fin{i}"), 1, k.public_key()))
            .collect();
        FinalizerPolicy::new(1, threshold, fins).unwrap()
    }

    /// Build a QC where `strong` and `weak` list the signing indices.
    fn make_qc(
        keys: &[BlsPrivateKey],
        digest: &Digest,
        strong: &[usize],
        weak: &[usize],
    ) -> QuorumCertificate {
        let mut agg = AggregateSignature::new();
        let mut strong_votes = VoteBitset::new(keys.len());
        let mut weak_votes = VoteBitset::new(keys.len());
        for &i in strong {
            strong_votes.set(i);
            agg.aggregate(&keys[i].sign(digest.as_bytes())).unwrap();
        }
        for &i in weak {
            weak_votes.set(i);
            agg.aggregate(&keys[i].sign(&weak_digest(digest))).unwrap();
        }
        QuorumCertificate {
            block_num: BlockNum(10),
            strong_votes: Some(strong_votes),
            weak_votes: (!weak.is_empty()).then_some(weak_votes),
            signature: agg.signature().unwrap(),
        }
    }

    #[test]
    fn test_strong_qc_verifies() {
        let keys = keys(3);
        let policy = policy(&keys, 2);
        let digest = Digest::from_bytes(b"block 10");
        let qc = BlockQuorumCertificate::active_only(make_qc(&keys, &digest, &[0, 2], &[]));

        assert!(qc.is_strong());
        qc.verify_basic(&policy, None).unwrap();
        qc.verify_signatures(&policy, None, &digest).unwrap();
    }

    #[test]
    fn test_weak_qc_verifies() {
        let keys = keys(3);
        let policy = policy(&keys, 2);
        let digest = Digest::from_bytes(b"block 10");
        let qc = BlockQuorumCertificate::active_only(make_qc(&keys, &digest, &[1], &[2]));

        assert!(qc.is_weak());
        qc.verify_basic(&policy, None).unwrap();
        qc.verify_signatures(&policy, None, &digest).unwrap();
    }

    #[test]
    fn test_signature_over_wrong_digest_fails() {
        let keys = keys(3);
        let policy = policy(&keys, 2);
        let qc = BlockQuorumCertificate::active_only(make_qc(
            &keys,
            &Digest::from_bytes(b"other"),
            &[0, 1],
            &[],
        ));
        assert_eq!(
            qc.verify_signatures(&policy, None, &Digest::from_bytes(b"block 10")),
            Err(QcError::InvalidSignature {
                block_num: BlockNum(10)
            })
        );
    }

    #[test]
    fn test_quorum_not_met() {
        let keys = keys(3);
        let policy = policy(&keys, 2);
        let digest = Digest::from_bytes(b"block 10");
        let qc = BlockQuorumCertificate::active_only(make_qc(&keys, &digest, &[0], &[]));
        assert!(matches!(
            qc.verify_basic(&policy, None),
            Err(QcError::QuorumNotMet { strong: 1, .. })
        ));
    }

    #[test]
    fn test_vote_format_errors() {
        let keys = keys(3);
        let policy = policy(&keys, 2);
        let digest = Digest::from_bytes(b"block 10");

        let mut qc = make_qc(&keys, &digest, &[0, 1], &[2]);
        qc.weak_votes.as_mut().unwrap().set(0);
        assert_eq!(
            qc.verify_vote_format(&policy),
            Err(QcError::VotedBothWays { index: 0 })
        );

        qc.strong_votes = Some(VoteBitset::new(4));
        assert!(matches!(
            qc.verify_vote_format(&policy),
            Err(QcError::BitsetSizeMismatch { bitset: 4, finalizers: 3 })
        ));

        qc.strong_votes = None;
        qc.weak_votes = None;
        assert_eq!(
            qc.verify_vote_format(&policy),
            Err(QcError::NoVotes { generation: 1 })
        );
    }

    #[test]
    fn test_pending_presence_must_match_policy() {
        let keys = keys(3);
        let policy = policy(&keys, 2);
        let digest = Digest::from_bytes(b"block 10");
        let active = make_qc(&keys, &digest, &[0, 1], &[]);

        let qc = BlockQuorumCertificate::active_only(active.clone());
        assert!(matches!(
            qc.verify_basic(&policy, Some(&policy)),
            Err(QcError::MissingPendingSignature { .. })
        ));

        let qc = BlockQuorumCertificate {
            active: active.clone(),
            pending: Some(active),
        };
        assert!(matches!(
            qc.verify_basic(&policy, None),
            Err(QcError::UnexpectedPendingSignature { .. })
        ));
    }

    #[test]
    fn test_dual_finalizer_must_vote_the_same() {
        let all = keys(4);
        let active_policy = policy(&all[..3], 2);
        // Pending policy reorders: key 3 first, then keys 1 and 2.
        let pending_keys = vec![all[3].clone(), all[1].clone(), all[2].clone()];
        let pending_policy = policy(&pending_keys, 2);
        let digest = Digest::from_bytes(b"block 10");

        let active = make_qc(&all[..3], &digest, &[1, 2], &[]);
        let consistent = make_qc(&pending_keys, &digest, &[1, 2], &[]);
        let qc = BlockQuorumCertificate {
            active: active.clone(),
            pending: Some(consistent),
        };
        qc.verify_basic(&active_policy, Some(&pending_policy)).unwrap();
        qc.verify_signatures(&active_policy, Some(&pending_policy), &digest)
            .unwrap();

        // Key 2 votes strong in the active QC but weak in the pending one.
        let inconsistent = make_qc(&pending_keys, &digest, &[0, 1], &[2]);
        let qc = BlockQuorumCertificate {
            active,
            pending: Some(inconsistent),
        };
        assert!(matches!(
            qc.verify_basic(&active_policy, Some(&pending_policy)),
            Err(QcError::DualFinalizerMismatch { .. })
        ));
    }
}
