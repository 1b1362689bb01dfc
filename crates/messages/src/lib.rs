//! Network messages for Savanna finality.
//!
//! Finalizers gossip one message type, the [`VoteMessage`]. It is encoded in
//! a fixed 177-byte layout by [`codec`].

pub mod codec;
pub mod gossip;

// Re-export commonly used types
pub use codec::{decode_vote, encode_vote, CodecError, VOTE_MESSAGE_SIZE};
pub use gossip::VoteMessage;
