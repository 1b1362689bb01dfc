//! Finalizer policies: the weighted roster of finalizers for a generation.

use crate::BlsPublicKey;
use std::collections::HashSet;

/// One finalizer in a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerAuthority {
    /// Human-readable label (informational only).
    pub description: String,
    /// Voting weight.
    pub weight: u64,
    /// BLS key the finalizer votes with.
    pub public_key: BlsPublicKey,
}

impl FinalizerAuthority {
    /// Create a new authority.
    pub fn new(description: impl Into<String>, weight: u64, public_key: BlsPublicKey) -> Self {
        Self {
            description: description.into(),
            weight,
            public_key,
        }
    }
}

/// An ordered, weighted set of finalizers plus the quorum threshold.
///
/// A finalizer's index is its position in [`finalizers`](Self::finalizers).
/// That index is the identity used by vote bitsets, so a policy never changes
/// once built; a new generation replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerPolicy {
    generation: u32,
    threshold: u64,
    finalizers: Vec<FinalizerAuthority>,
    weight_sum: u64,
}

impl FinalizerPolicy {
    /// Build a policy, validating it.
    ///
    /// The finalizer list must be non-empty with unique keys and non-zero
    /// weights, and the threshold must be reachable and exceed half the total
    /// weight.
    pub fn new(
        generation: u32,
        threshold: u64,
        finalizers: Vec<FinalizerAuthority>,
    ) -> Result<Self, PolicyError> {
        if finalizers.is_empty() {
            return Err(PolicyError::Empty);
        }

        let mut seen = HashSet::with_capacity(finalizers.len());
        let mut weight_sum = 0u64;
        for (index, fin) in finalizers.iter().enumerate() {
            if !seen.insert(fin.public_key) {
                return Err(PolicyError::DuplicateKey { index });
            }
            if fin.weight == 0 {
                return Err(PolicyError::ZeroWeight { index });
            }
            weight_sum = weight_sum
                .checked_add(fin.weight)
                .ok_or(PolicyError::WeightOverflow)?;
        }

        if threshold > weight_sum || threshold <= weight_sum / 2 {
            return Err(PolicyError::InvalidThreshold {
                threshold,
                weight_sum,
            });
        }

        Ok(Self {
            generation,
            threshold,
            finalizers,
            weight_sum,
        })
    }

    /// Policy generation (monotonically increasing across policies).
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Weight needed for a quorum.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Finalizers in index order.
    pub fn finalizers(&self) -> &[FinalizerAuthority] {
        &self.finalizers
    }

    /// Number of finalizers.
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    /// Always false for a validated policy.
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    /// Total weight of all finalizers.
    pub fn weight_sum(&self) -> u64 {
        self.weight_sum
    }

    /// Largest weak weight that still leaves a strong quorum reachable.
    ///
    /// Once weak votes exceed this, the remaining finalizers cannot reach the
    /// threshold with strong votes alone.
    pub fn max_weak_sum_before_weak_final(&self) -> u64 {
        self.weight_sum - self.threshold
    }

    /// Index of the finalizer with `public_key`.
    pub fn index_of(&self, public_key: &BlsPublicKey) -> Option<usize> {
        self.finalizers
            .iter()
            .position(|f| f.public_key == *public_key)
    }

    /// Check whether `public_key` belongs to this policy.
    pub fn contains(&self, public_key: &BlsPublicKey) -> bool {
        self.index_of(public_key).is_some()
    }

    /// The finalizer at `index`.
    pub fn finalizer(&self, index: usize) -> Option<&FinalizerAuthority> {
        self.finalizers.get(index)
    }
}

/// Reasons a finalizer policy is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// No finalizers.
    #[error("Finalizer policy has no finalizers")]
    Empty,

    /// A key appears more than once.
    #[error("Duplicate finalizer key at index {index}")]
    DuplicateKey {
        /// Index of the second occurrence.
        index: usize,
    },

    /// A finalizer has zero weight.
    #[error("Finalizer at index {index} has zero weight")]
    ZeroWeight {
        /// Offending index.
        index: usize,
    },

    /// Weights overflow u64.
    #[error("Finalizer weights overflow")]
    WeightOverflow,

    /// Threshold unreachable or not a majority.
    #[error("Invalid threshold {threshold} for total weight {weight_sum}")]
    InvalidThreshold {
        /// Requested threshold.
        threshold: u64,
        /// Sum of weights.
        weight_sum: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlsPrivateKey;

    fn authorities(weights: &[u64]) -> Vec<FinalizerAuthority> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let key = BlsPrivateKey::from_seed(&[i as u8 + 1; 32]);
                FinalizerAuthority::new(format!("fin{i}"), w, key.public_key())
            })
            .collect()
    }

    #[test]
    fn test_policy_accessors() {
        let fins = authorities(&[1, 2, 3]);
        let key = fins[1].public_key;
        let policy = FinalizerPolicy::new(4, 4, fins).unwrap();

        assert_eq!(policy.generation(), 4);
        assert_eq!(policy.len(), 3);
        assert_eq!(policy.weight_sum(), 6);
        assert_eq!(policy.max_weak_sum_before_weak_final(), 2);
        assert_eq!(policy.index_of(&key), Some(1));
        assert_eq!(policy.finalizer(1).unwrap().weight, 2);
    }

    #[test]
    fn test_policy_rejects_duplicates() {
        let mut fins = authorities(&[1, 1]);
        fins.push(fins[0].clone());
        assert_eq!(
            FinalizerPolicy::new(1, 2, fins),
            Err(PolicyError::DuplicateKey { index: 2 })
        );
    }

    #[test]
    fn test_policy_rejects_bad_threshold() {
        assert!(matches!(
            FinalizerPolicy::new(1, 4, authorities(&[1, 1, 1])),
            Err(PolicyError::InvalidThreshold { .. })
        ));
        // Exactly half is not a majority.
        assert!(matches!(
            FinalizerPolicy::new(1, 2, authorities(&[1, 1, 1, 1])),
            Err(PolicyError::InvalidThreshold { .. })
        ));
        assert!(FinalizerPolicy::new(1, 3, authorities(&[1, 1, 1, 1])).is_ok());
    }

    #[test]
    fn test_policy_rejects_empty_and_zero_weight() {
        assert_eq!(FinalizerPolicy::new(1, 1, vec![]), Err(PolicyError::Empty));
        assert_eq!(
            FinalizerPolicy::new(1, 1, authorities(&[1, 0])),
            Err(PolicyError::ZeroWeight { index: 1 })
        );
    }
}
