//! Deterministic fixtures for tests.
//!
//! Keys are derived from fixed seeds so failures reproduce, and votes are
//! signed for real so signature checks run on the same path as in
//! production.

use savanna_messages::VoteMessage;
use savanna_types::{
    vote_signing_message, BlockId, BlsPrivateKey, Digest, FinalizerAuthority, FinalizerPolicy,
};

/// `n` distinct private keys. Key `i` is seeded with `[i + 1; 32]`.
pub fn test_keys(n: usize) -> Vec<BlsPrivateKey> {
    (1..=n)
        .map(|i| {
            let seed = u8::try_from(i).expect("at most 255 test keys");
            BlsPrivateKey::from_seed(&[seed; 32])
        })
        .collect()
}

/// Policy giving every key weight 1, with a simple-majority threshold.
pub fn equal_weight_policy(generation: u32, keys: &[BlsPrivateKey]) -> FinalizerPolicy {
    let weights = vec![1; keys.len()];
    weighted_policy(generation, keys, &weights, keys.len() as u64 / 2 + 1)
}

/// Policy with explicit weights and threshold.
///
/// # Panics
///
/// Panics if the policy is invalid.
pub fn weighted_policy(
    generation: u32,
    keys: &[BlsPrivateKey],
    weights: &[u64],
    threshold: u64,
) -> FinalizerPolicy {
    assert_eq!(keys.len(), weights.len(), "one weight per key");
    let finalizers = keys
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(i, (key, &weight))| FinalizerAuthority::new(format!("fin{i}"), weight, key.public_key()))
        .collect();
    FinalizerPolicy::new(generation, threshold, finalizers).expect("valid test policy")
}

/// A vote by `key` on `block_id`, signed over `finality_digest` (or its weak
/// form).
pub fn sign_vote(
    key: &BlsPrivateKey,
    block_id: BlockId,
    finality_digest: &Digest,
    strong: bool,
) -> VoteMessage {
    let signature = key.sign(&vote_signing_message(finality_digest, strong));
    VoteMessage::new(block_id, strong, key.public_key(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_types::BlockNum;

    #[test]
    fn test_keys_are_deterministic_and_distinct() {
        let a = test_keys(3);
        let b = test_keys(3);
        assert_eq!(a[2].public_key(), b[2].public_key());
        assert_ne!(a[0].public_key(), a[1].public_key());
    }

    #[test]
    fn test_equal_weight_policy() {
        let keys = test_keys(4);
        let policy = equal_weight_policy(7, &keys);
        assert_eq!(policy.generation(), 7);
        assert_eq!(policy.threshold(), 3);
        assert_eq!(policy.index_of(&keys[3].public_key()), Some(3));
    }

    #[test]
    fn test_sign_vote_verifies() {
        let keys = test_keys(1);
        let digest = Digest::from_bytes(b"block");
        let id = BlockId::new(BlockNum(5), &digest);
        for strong in [true, false] {
            let vote = sign_vote(&keys[0], id, &digest, strong);
            assert!(vote
                .finalizer_key
                .verify(&vote_signing_message(&digest, strong), &vote.signature));
        }
    }
}
