//! Outbound signals for the network layer.

use crate::VoteStatus;
use savanna_messages::VoteMessage;
use savanna_types::ConnectionId;
use std::sync::Arc;

/// The outcome of processing one vote, reported to the network layer.
///
/// The network layer uses it to rebroadcast successful votes and to penalise
/// connections that send invalid votes or flood the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSignal {
    /// Connection the vote arrived on.
    pub connection_id: ConnectionId,
    /// Processing outcome.
    pub status: VoteStatus,
    /// The vote itself.
    pub vote: Arc<VoteMessage>,
}

impl VoteSignal {
    /// Create a new signal.
    pub fn new(connection_id: ConnectionId, status: VoteStatus, vote: Arc<VoteMessage>) -> Self {
        Self {
            connection_id,
            status,
            vote,
        }
    }
}
