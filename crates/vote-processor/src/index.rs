//! Votes waiting for their block.
//!
//! Entries are ordered by block number, highest first, then by block id and
//! arrival, so the retry sweep visits the most recent blocks first and sees
//! every vote for one block as a contiguous run. A secondary index by
//! connection makes evicting a misbehaving connection cheap.

use savanna_messages::VoteMessage;
use savanna_types::{BlockId, BlockNum, ConnectionId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// A vote buffered until its block is known.
#[derive(Debug, Clone)]
pub struct QueuedVote {
    pub connection_id: ConnectionId,
    pub vote: Arc<VoteMessage>,
    pub received: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    block_num: Reverse<BlockNum>,
    block_id: BlockId,
    seq: u64,
}

impl Key {
    fn first_of(block_id: BlockId) -> Self {
        Self {
            block_num: Reverse(block_id.block_num()),
            block_id,
            seq: 0,
        }
    }
}

/// Buffered votes, indexed by block and by connection.
#[derive(Debug, Default)]
pub struct VoteIndex {
    entries: BTreeMap<Key, QueuedVote>,
    by_connection: HashMap<ConnectionId, BTreeSet<Key>>,
    votes: HashSet<Arc<VoteMessage>>,
    next_seq: u64,
}

impl VoteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffer a vote. Returns false if the same vote is already buffered.
    pub fn insert(&mut self, queued: QueuedVote) -> bool {
        if !self.votes.insert(Arc::clone(&queued.vote)) {
            return false;
        }
        let key = Key {
            block_num: Reverse(queued.vote.block_num()),
            block_id: queued.vote.block_id,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.by_connection
            .entry(queued.connection_id)
            .or_default()
            .insert(key);
        self.entries.insert(key, queued);
        true
    }

    /// Distinct block ids with buffered votes, highest block number first.
    pub fn block_ids(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = Vec::new();
        for key in self.entries.keys() {
            if ids.last() != Some(&key.block_id) {
                ids.push(key.block_id);
            }
        }
        ids
    }

    /// Remove and return every vote for `block_id`, in arrival order.
    pub fn take_block(&mut self, block_id: &BlockId) -> Vec<QueuedVote> {
        let keys: Vec<Key> = self
            .entries
            .range(Key::first_of(*block_id)..)
            .map(|(key, _)| *key)
            .take_while(|key| key.block_id == *block_id)
            .collect();
        keys.into_iter().filter_map(|key| self.remove(&key)).collect()
    }

    /// Remove every vote from `connection_id`. Returns how many.
    pub fn remove_connection(&mut self, connection_id: ConnectionId) -> usize {
        let Some(keys) = self.by_connection.remove(&connection_id) else {
            return 0;
        };
        for key in &keys {
            if let Some(queued) = self.entries.remove(key) {
                self.votes.remove(&queued.vote);
            }
        }
        keys.len()
    }

    /// Remove votes for blocks at or below `block_num`. Returns how many.
    pub fn remove_at_or_below(&mut self, block_num: BlockNum) -> usize {
        let keys: Vec<Key> = self
            .entries
            .keys()
            .rev()
            .take_while(|key| key.block_num.0 <= block_num)
            .copied()
            .collect();
        keys.iter().filter(|key| self.remove(key).is_some()).count()
    }

    /// Remove votes received before `cutoff`. Returns how many.
    pub fn remove_received_before(&mut self, cutoff: Instant) -> usize {
        let keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|(_, queued)| queued.received < cutoff)
            .map(|(key, _)| *key)
            .collect();
        keys.iter().filter(|key| self.remove(key).is_some()).count()
    }

    fn remove(&mut self, key: &Key) -> Option<QueuedVote> {
        let queued = self.entries.remove(key)?;
        self.votes.remove(&queued.vote);
        if let Some(keys) = self.by_connection.get_mut(&queued.connection_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_connection.remove(&queued.connection_id);
            }
        }
        Some(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_test_helpers::test_keys;
    use savanna_types::Digest;
    use std::time::Duration;

    fn vote(block_num: u32, fork: &str, key_index: usize) -> Arc<VoteMessage> {
        let key = &test_keys(key_index + 1)[key_index];
        let block_id = BlockId::new(BlockNum(block_num), &Digest::from_bytes(fork.as_bytes()));
        Arc::new(VoteMessage::new(
            block_id,
            true,
            key.public_key(),
            key.sign(b"unchecked"),
        ))
    }

    fn queued(connection: u32, vote: Arc<VoteMessage>) -> QueuedVote {
        QueuedVote {
            connection_id: ConnectionId(connection),
            vote,
            received: Instant::now(),
        }
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut index = VoteIndex::new();
        let v = vote(5, "a", 0);
        assert!(index.insert(queued(1, Arc::clone(&v))));
        assert!(!index.insert(queued(2, v)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_block_order_and_take() {
        let mut index = VoteIndex::new();
        index.insert(queued(1, vote(3, "a", 0)));
        index.insert(queued(1, vote(7, "a", 0)));
        index.insert(queued(2, vote(3, "a", 1)));
        index.insert(queued(1, vote(5, "b", 0)));

        let ids = index.block_ids();
        let nums: Vec<_> = ids.iter().map(|id| id.block_num().0).collect();
        assert_eq!(nums, vec![7, 5, 3]);

        let taken = index.take_block(&ids[2]);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].connection_id, ConnectionId(1));
        assert_eq!(taken[1].connection_id, ConnectionId(2));
        assert_eq!(index.len(), 2);

        // Taking the votes also forgets them for duplicate detection.
        assert!(index.insert(queued(1, vote(3, "a", 0))));
    }

    #[test]
    fn test_remove_connection() {
        let mut index = VoteIndex::new();
        index.insert(queued(1, vote(3, "a", 0)));
        index.insert(queued(1, vote(4, "a", 0)));
        index.insert(queued(2, vote(4, "a", 1)));
        assert_eq!(index.remove_connection(ConnectionId(1)), 2);
        assert_eq!(index.remove_connection(ConnectionId(1)), 0);
        assert_eq!(index.len(), 1);
        assert_eq!(index.block_ids().len(), 1);
    }

    #[test]
    fn test_prune_by_block_and_age() {
        let mut index = VoteIndex::new();
        for num in [2, 4, 6, 8] {
            index.insert(queued(1, vote(num, "a", 0)));
        }
        assert_eq!(index.remove_at_or_below(BlockNum(4)), 2);
        let nums: Vec<_> = index.block_ids().iter().map(|id| id.block_num().0).collect();
        assert_eq!(nums, vec![8, 6]);

        let cutoff = Instant::now() + Duration::from_millis(1);
        index.insert(QueuedVote {
            received: cutoff + Duration::from_secs(1),
            ..queued(3, vote(9, "a", 0))
        });
        assert_eq!(index.remove_received_before(cutoff), 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.remove_connection(ConnectionId(1)), 0);
    }
}
