//! Gossip messages broadcast to every peer.

mod vote;

pub use vote::VoteMessage;
