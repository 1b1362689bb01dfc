//! Messages signed by finalizers.
//!
//! A strong vote signs the block's finality digest as-is. A weak vote signs
//! the digest followed by the ASCII suffix `WEAK`, so a weak signature can
//! never be passed off as a strong one.
//!
//! | Vote | Signed bytes |
//! |------|--------------|
//! | strong | `finality_digest` |
//! | weak | `finality_digest` ‖ `WEAK` |

use crate::Digest;

/// Suffix appended to the finality digest for weak votes.
pub const WEAK_SUFFIX: &[u8] = b"WEAK";

/// Bytes signed by a weak vote.
pub fn weak_digest(finality_digest: &Digest) -> Vec<u8> {
    let mut message = Vec::with_capacity(Digest::BYTES + WEAK_SUFFIX.len());
    message.extend_from_slice(finality_digest.as_bytes());
    message.extend_from_slice(WEAK_SUFFIX);
    message
}

/// Bytes signed by a vote of the given strength.
pub fn vote_signing_message(finality_digest: &Digest, strong: bool) -> Vec<u8> {
    if strong {
        finality_digest.as_bytes().to_vec()
    } else {
        weak_digest(finality_digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_digest_layout() {
        let digest = Digest::from_bytes(b"block");
        let weak = weak_digest(&digest);
        assert_eq!(weak.len(), 36);
        assert_eq!(&weak[..32], digest.as_bytes());
        assert_eq!(&weak[32..], b"WEAK");
    }

    #[test]
    fn test_strong_and_weak_messages_differ() {
        let digest = Digest::from_bytes(b"block");
        assert_eq!(vote_signing_message(&digest, true), digest.as_bytes().to_vec());
        assert_ne!(
            vote_signing_message(&digest, true),
            vote_signing_message(&digest, false)
        );
    }
}
