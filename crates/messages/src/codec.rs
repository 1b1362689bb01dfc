//! Vote message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! Votes use a fixed-size layout with no framing:
//!
//! ```text
//! [block_id: 32][strong: 1][finalizer_key: 48][signature: 96]
//! ```
//!
//! `strong` is 0 or 1; any other value is rejected. The key and signature are
//! compressed BLS12-381 points and are validated while decoding.

use crate::VoteMessage;
use savanna_types::{BlockId, BlsPublicKey, BlsSignature, CryptoError};
use thiserror::Error;

/// Size of an encoded vote.
pub const VOTE_MESSAGE_SIZE: usize = BlockId::BYTES + 1 + BlsPublicKey::BYTES + BlsSignature::BYTES;

const STRONG_OFFSET: usize = BlockId::BYTES;
const KEY_OFFSET: usize = STRONG_OFFSET + 1;
const SIG_OFFSET: usize = KEY_OFFSET + BlsPublicKey::BYTES;

/// Errors that can occur during vote decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Vote message has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("Invalid strong flag {0}")]
    InvalidStrongFlag(u8),

    #[error("Invalid finalizer key: {0}")]
    InvalidKey(CryptoError),

    #[error("Invalid signature: {0}")]
    InvalidSignature(CryptoError),
}

/// Encode a vote to wire format.
pub fn encode_vote(vote: &VoteMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(VOTE_MESSAGE_SIZE);
    buf.extend_from_slice(vote.block_id.as_bytes());
    buf.push(u8::from(vote.strong));
    buf.extend_from_slice(vote.finalizer_key.as_bytes());
    buf.extend_from_slice(vote.signature.as_bytes());
    buf
}

/// Decode a vote from wire format.
pub fn decode_vote(data: &[u8]) -> Result<VoteMessage, CodecError> {
    if data.len() != VOTE_MESSAGE_SIZE {
        return Err(CodecError::WrongLength {
            expected: VOTE_MESSAGE_SIZE,
            actual: data.len(),
        });
    }

    let mut id = [0u8; BlockId::BYTES];
    id.copy_from_slice(&data[..STRONG_OFFSET]);

    let strong = match data[STRONG_OFFSET] {
        0 => false,
        1 => true,
        other => return Err(CodecError::InvalidStrongFlag(other)),
    };

    let finalizer_key =
        BlsPublicKey::from_bytes(&data[KEY_OFFSET..SIG_OFFSET]).map_err(CodecError::InvalidKey)?;
    let signature =
        BlsSignature::from_bytes(&data[SIG_OFFSET..]).map_err(CodecError::InvalidSignature)?;

    Ok(VoteMessage::new(
        BlockId::from_bytes(id),
        strong,
        finalizer_key,
        signature,
    ))
}
