//! Vote intake.
//!
//! Votes arrive from the network before, after, or without their block.
//! [`VoteProcessor`] aggregates a vote straight away when its block is
//! known and otherwise buffers it in a [`VoteIndex`]. Every successful
//! aggregation, and every new block, triggers a sweep over the buffer.
//!
//! Each connection may have at most `max_votes_per_connection` votes
//! buffered or in flight. Going over the quota evicts everything that
//! connection has buffered; its counter is only reset once the whole buffer
//! drains, so a flooding peer keeps getting `MaxExceeded` in the meantime.

use crate::config::VoteProcessorConfig;
use crate::index::{QueuedVote, VoteIndex};
use parking_lot::Mutex;
use savanna_bft::BlockHandle;
use savanna_core::{TaskExecutor, VoteSignal, VoteSink, VoteStatus};
use savanna_messages::VoteMessage;
use savanna_types::{BlockId, BlockNum, ConnectionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Looks blocks up by id.
pub trait BlockFetcher: Send + Sync {
    /// The block with `block_id`, if known.
    fn fetch_block(&self, block_id: &BlockId) -> Option<BlockHandle>;
}

impl<F> BlockFetcher for F
where
    F: Fn(&BlockId) -> Option<BlockHandle> + Send + Sync,
{
    fn fetch_block(&self, block_id: &BlockId) -> Option<BlockHandle> {
        self(block_id)
    }
}

/// Where processing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// On the calling thread.
    Sync,
    /// On the worker pool.
    Async,
}

struct State {
    index: VoteIndex,
    /// Votes received per connection since the buffer last drained.
    num_messages: HashMap<ConnectionId, usize>,
    /// Most recently resolved block.
    last_block: Option<BlockHandle>,
}

struct Shared {
    config: VoteProcessorConfig,
    fetcher: Arc<dyn BlockFetcher>,
    sink: Arc<dyn VoteSink>,
    lib: AtomicU32,
    stopped: AtomicBool,
    state: Mutex<State>,
}

/// Network-facing vote intake.
pub struct VoteProcessor {
    shared: Arc<Shared>,
    executor: Arc<dyn TaskExecutor>,
}

impl VoteProcessor {
    /// Processor that resolves blocks through `fetcher` and signals outcomes to `sink`.
    pub fn new(
        config: VoteProcessorConfig,
        fetcher: Arc<dyn BlockFetcher>,
        sink: Arc<dyn VoteSink>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                fetcher,
                sink,
                lib: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
                state: Mutex::new(State {
                    index: VoteIndex::new(),
                    num_messages: HashMap::new(),
                    last_block: None,
                }),
            }),
            executor,
        }
    }

    /// Process a vote received on `connection_id`.
    ///
    /// Votes produced by this node use [`ConnectionId::LOCAL`]; they are
    /// aggregated but not reported to the sink.
    pub fn process_vote_message(
        &self,
        connection_id: ConnectionId,
        vote: Arc<VoteMessage>,
        dispatch: Dispatch,
    ) {
        if self.shared.is_stopped() {
            return;
        }
        match dispatch {
            Dispatch::Sync => self.shared.process(connection_id, vote),
            Dispatch::Async => {
                let shared = Arc::clone(&self.shared);
                self.executor
                    .submit(Box::new(move || shared.process(connection_id, vote)));
            }
        }
    }

    /// A block became available; retry buffered votes.
    pub fn notify_new_block(&self, dispatch: Dispatch) {
        if self.shared.is_stopped() {
            return;
        }
        match dispatch {
            Dispatch::Sync => self.shared.process_any_queued_for_later(),
            Dispatch::Async => {
                let shared = Arc::clone(&self.shared);
                self.executor
                    .submit(Box::new(move || shared.process_any_queued_for_later()));
            }
        }
    }

    /// Record the last irreversible block. Votes at or below it are dropped.
    pub fn notify_lib(&self, block_num: BlockNum) {
        self.shared.lib.store(block_num.0, Ordering::Relaxed);
    }

    /// Stop processing. Later submissions are ignored and running sweeps
    /// end early.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::Relaxed) {
            info!(buffered = self.index_size(), "Vote processor stopped");
        }
    }

    /// Number of buffered votes.
    pub fn index_size(&self) -> usize {
        self.shared.state.lock().index.len()
    }
}

impl Drop for VoteProcessor {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for VoteProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteProcessor")
            .field("config", &self.shared.config)
            .field("lib", &self.shared.lib())
            .field("stopped", &self.shared.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    fn lib(&self) -> BlockNum {
        BlockNum(self.lib.load(Ordering::Relaxed))
    }

    fn process(&self, connection_id: ConnectionId, vote: Arc<VoteMessage>) {
        if self.is_stopped() {
            return;
        }
        let block_num = vote.block_num();
        if block_num <= self.lib() {
            trace!(
                connection_id = %connection_id,
                block_num = %block_num,
                "Ignoring vote at or below LIB"
            );
            return;
        }

        let mut state = self.state.lock();
        let count = state.num_messages.entry(connection_id).or_insert(0);
        *count += 1;
        if *count > self.config.max_votes_per_connection {
            let removed = state.index.remove_connection(connection_id);
            drop(state);
            warn!(
                connection_id = %connection_id,
                removed,
                "Exceeded max votes per connection"
            );
            self.emit(connection_id, VoteStatus::MaxExceeded, vote);
            return;
        }

        let Some(block) = self.get_block(&mut state, &vote.block_id) else {
            let buffered = state.index.insert(QueuedVote {
                connection_id,
                vote: Arc::clone(&vote),
                received: Instant::now(),
            });
            debug!(
                connection_id = %connection_id,
                block_num = %block_num,
                block_id = %vote.block_id,
                buffered,
                "Block not available, vote queued for later"
            );
            return;
        };

        release(&mut state.num_messages, connection_id);
        drop(state);

        self.aggregate(connection_id, &block, vote);
        self.process_any_queued_for_later();
    }

    /// Retry every buffered vote whose block is now known.
    ///
    /// Votes at or below LIB and votes older than the age limit are dropped
    /// without releasing their connection's quota.
    fn process_any_queued_for_later(&self) {
        let mut ready = Vec::new();
        {
            let mut state = self.state.lock();
            let lib = self.lib();
            let below_lib = state.index.remove_at_or_below(lib);
            let too_old = Instant::now()
                .checked_sub(self.config.too_old())
                .map_or(0, |cutoff| state.index.remove_received_before(cutoff));
            if below_lib + too_old > 0 {
                debug!(below_lib, too_old, lib = %lib, "Pruned buffered votes");
            }
            if state.index.is_empty() {
                state.num_messages.clear();
                return;
            }

            for block_id in state.index.block_ids() {
                if self.is_stopped() {
                    return;
                }
                let Some(block) = self.get_block(&mut state, &block_id) else {
                    continue;
                };
                let queued = state.index.take_block(&block_id);
                for q in &queued {
                    release(&mut state.num_messages, q.connection_id);
                }
                ready.push((block, queued));
            }
        }

        for (block, queued) in ready {
            for q in queued {
                if self.is_stopped() {
                    return;
                }
                self.aggregate(q.connection_id, &block, q.vote);
            }
        }
    }

    fn get_block(&self, state: &mut State, block_id: &BlockId) -> Option<BlockHandle> {
        if let Some(block) = state.last_block.as_ref().filter(|b| b.id() == *block_id) {
            return Some(block.clone());
        }
        let block = self.fetcher.fetch_block(block_id)?;
        state.last_block = Some(block.clone());
        Some(block)
    }

    fn aggregate(&self, connection_id: ConnectionId, block: &BlockHandle, vote: Arc<VoteMessage>) {
        let status = match block.as_savanna() {
            Some(block) => block.aggregate_vote(connection_id, &vote).status,
            None => VoteStatus::UnknownBlock,
        };
        match status {
            VoteStatus::Success => trace!(
                connection_id = %connection_id,
                block_num = %vote.block_num(),
                finalizer = %vote.finalizer_key,
                strong = vote.strong,
                "Vote aggregated"
            ),
            VoteStatus::Duplicate | VoteStatus::UnknownBlock => debug!(
                connection_id = %connection_id,
                block_num = %vote.block_num(),
                status = %status,
                "Vote not aggregated"
            ),
            _ => warn!(
                connection_id = %connection_id,
                block_num = %vote.block_num(),
                finalizer = %vote.finalizer_key,
                status = %status,
                "Vote rejected"
            ),
        }
        if status != VoteStatus::Duplicate {
            self.emit(connection_id, status, vote);
        }
    }

    fn emit(&self, connection_id: ConnectionId, status: VoteStatus, vote: Arc<VoteMessage>) {
        // Our own votes were reported when they were cast.
        if connection_id.is_local() {
            return;
        }
        self.sink
            .on_vote(VoteSignal::new(connection_id, status, vote));
    }
}

fn release(num_messages: &mut HashMap<ConnectionId, usize>, connection_id: ConnectionId) {
    if let Some(count) = num_messages.get_mut(&connection_id) {
        *count = count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_pool::VoteThreadPool;
    use savanna_bft::test_utils::TestChain;
    use savanna_bft::{BlockState, LegacyBlockState};
    use savanna_core::InlineExecutor;
    use savanna_test_helpers::{equal_weight_policy, sign_vote, test_keys};
    use savanna_types::{BlockTimestamp, BlsPrivateKey, Digest};
    use std::thread;
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Blocks the fetcher can see; tests add them to simulate arrival.
    #[derive(Default)]
    struct ForkDb(Mutex<HashMap<BlockId, BlockHandle>>);

    impl ForkDb {
        fn add(&self, block: impl Into<BlockHandle>) {
            let block = block.into();
            self.0.lock().insert(block.id(), block);
        }
    }

    impl BlockFetcher for ForkDb {
        fn fetch_block(&self, block_id: &BlockId) -> Option<BlockHandle> {
            self.0.lock().get(block_id).cloned()
        }
    }

    #[derive(Default)]
    struct Signals(Mutex<Vec<VoteSignal>>);

    impl Signals {
        fn statuses(&self) -> Vec<(u32, VoteStatus)> {
            self.0
                .lock()
                .iter()
                .map(|s| (s.connection_id.0, s.status))
                .collect()
        }

        fn len(&self) -> usize {
            self.0.lock().len()
        }
    }

    impl VoteSink for Signals {
        fn on_vote(&self, signal: VoteSignal) {
            self.0.lock().push(signal);
        }
    }

    struct Harness {
        keys: Vec<BlsPrivateKey>,
        chain: TestChain,
        fork_db: Arc<ForkDb>,
        signals: Arc<Signals>,
        processor: VoteProcessor,
    }

    impl Harness {
        fn new(config: VoteProcessorConfig) -> Self {
            Self::with_executor(config, Arc::new(InlineExecutor))
        }

        fn with_executor(config: VoteProcessorConfig, executor: Arc<dyn TaskExecutor>) -> Self {
            let keys = test_keys(3);
            let chain = TestChain::new(Arc::new(equal_weight_policy(1, &keys)));
            let fork_db = Arc::new(ForkDb::default());
            let signals = Arc::new(Signals::default());
            let processor = VoteProcessor::new(
                config,
                Arc::clone(&fork_db) as Arc<dyn BlockFetcher>,
                Arc::clone(&signals) as Arc<dyn VoteSink>,
                executor,
            );
            Self {
                keys,
                chain,
                fork_db,
                signals,
                processor,
            }
        }

        fn vote(&self, block: &BlockState, key_index: usize, strong: bool) -> Arc<VoteMessage> {
            Arc::new(sign_vote(
                &self.keys[key_index],
                block.id(),
                block.strong_digest(),
                strong,
            ))
        }

        fn send(&self, connection: u32, vote: Arc<VoteMessage>) {
            self.processor
                .process_vote_message(ConnectionId(connection), vote, Dispatch::Sync);
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[traced_test]
    #[test]
    fn test_known_block_vote_signalled_once() {
        let mut h = Harness::new(VoteProcessorConfig::minimal());
        let block = h.chain.extend_strong();
        h.fork_db.add(Arc::clone(&block));

        let vote = h.vote(&block, 0, true);
        h.send(1, Arc::clone(&vote));
        // Duplicates are not reported.
        h.send(1, Arc::clone(&vote));
        assert_eq!(h.signals.statuses(), vec![(1, VoteStatus::Success)]);
        assert_eq!(*h.signals.0.lock()[0].vote, *vote);

        // Strong signature under a weak flag.
        let mut flipped = (*h.vote(&block, 1, true)).clone();
        flipped.strong = false;
        h.send(2, Arc::new(flipped));
        assert_eq!(h.signals.statuses()[1], (2, VoteStatus::InvalidSignature));
        assert!(logs_contain("Vote rejected"));
        assert_eq!(h.processor.index_size(), 0);
    }

    #[traced_test]
    #[test]
    fn test_local_votes_aggregated_silently() {
        let mut h = Harness::new(VoteProcessorConfig::minimal());
        let block = h.chain.extend_strong();
        h.fork_db.add(Arc::clone(&block));

        h.processor
            .process_vote_message(ConnectionId::LOCAL, h.vote(&block, 0, true), Dispatch::Sync);
        h.send(4, h.vote(&block, 1, true));
        assert!(block.is_quorum_met());
        assert_eq!(h.signals.statuses(), vec![(4, VoteStatus::Success)]);
    }

    #[traced_test]
    #[test]
    fn test_buffered_votes_processed_when_block_arrives() {
        let mut h = Harness::new(VoteProcessorConfig::minimal());
        let b2 = h.chain.extend_strong();
        let b3 = h.chain.extend_strong();

        h.send(2, h.vote(&b2, 0, true));
        h.send(3, h.vote(&b3, 1, true));
        assert_eq!(h.processor.index_size(), 2);
        assert_eq!(h.signals.len(), 0);

        h.fork_db.add(Arc::clone(&b2));
        h.processor.notify_new_block(Dispatch::Sync);
        assert_eq!(h.signals.statuses(), vec![(2, VoteStatus::Success)]);
        assert_eq!(h.processor.index_size(), 1);

        // A vote resolving directly also sweeps the buffer.
        h.fork_db.add(Arc::clone(&b3));
        h.send(5, h.vote(&b2, 2, false));
        assert_eq!(
            h.signals.statuses(),
            vec![
                (2, VoteStatus::Success),
                (5, VoteStatus::Success),
                (3, VoteStatus::Success),
            ]
        );
        assert_eq!(h.processor.index_size(), 0);
        assert_eq!(b3.has_voted(&h.keys[1].public_key()), savanna_core::HasVoted::Voted);
    }

    #[traced_test]
    #[test]
    fn test_lib_drops_and_prunes_votes() {
        let mut h = Harness::new(VoteProcessorConfig::minimal());
        let b2 = h.chain.extend_strong();
        let b3 = h.chain.extend_strong();

        h.send(1, h.vote(&b2, 0, true));
        h.send(1, h.vote(&b3, 0, true));
        assert_eq!(h.processor.index_size(), 2);

        h.processor.notify_lib(BlockNum(2));
        h.processor.notify_new_block(Dispatch::Sync);
        assert_eq!(h.processor.index_size(), 1);

        // At LIB: ignored on arrival.
        h.send(1, h.vote(&b2, 1, true));
        assert_eq!(h.processor.index_size(), 1);
        assert_eq!(h.signals.len(), 0);
    }

    #[traced_test]
    #[test]
    fn test_too_old_votes_pruned() {
        let config = VoteProcessorConfig {
            too_old_ms: 1,
            ..VoteProcessorConfig::minimal()
        };
        let mut h = Harness::new(config);
        let b2 = h.chain.extend_strong();
        h.send(1, h.vote(&b2, 0, true));
        assert_eq!(h.processor.index_size(), 1);

        thread::sleep(Duration::from_millis(20));
        h.fork_db.add(Arc::clone(&b2));
        h.processor.notify_new_block(Dispatch::Sync);
        assert_eq!(h.processor.index_size(), 0);
        assert_eq!(h.signals.len(), 0);
        assert!(logs_contain("Pruned buffered votes"));
    }

    #[traced_test]
    #[test]
    fn test_max_votes_per_connection() {
        let h = Harness::new(VoteProcessorConfig::default());
        let key = &h.keys[0];
        let signature = key.sign(b"never checked");
        let unknown = |i: u32| {
            let block_id = BlockId::new(BlockNum(1_000 + i), &Digest::from_bytes(b"elsewhere"));
            Arc::new(VoteMessage::new(block_id, true, key.public_key(), signature))
        };

        for i in 0..2_500 {
            h.send(1, unknown(i));
        }
        h.send(2, unknown(5_000));
        assert_eq!(h.processor.index_size(), 2_501);
        assert_eq!(h.signals.len(), 0);

        for i in 2_500..2_600 {
            h.send(1, unknown(i));
        }
        assert_eq!(h.processor.index_size(), 1);
        let statuses = h.signals.statuses();
        assert_eq!(statuses.len(), 100);
        assert!(statuses
            .iter()
            .all(|s| *s == (1, VoteStatus::MaxExceeded)));

        // The buffer has not drained, so the connection is still over quota.
        h.send(1, unknown(9_999));
        assert_eq!(h.signals.len(), 101);

        // Once it drains, the connection starts over.
        h.processor.notify_lib(BlockNum(1_000_000));
        h.processor.notify_new_block(Dispatch::Sync);
        assert_eq!(h.processor.index_size(), 0);
        h.processor.notify_lib(BlockNum(0));
        h.send(1, unknown(0));
        assert_eq!(h.processor.index_size(), 1);
        assert_eq!(h.signals.len(), 101);
    }

    #[traced_test]
    #[test]
    fn test_legacy_block_reports_unknown_block() {
        let h = Harness::new(VoteProcessorConfig::minimal());
        let legacy = LegacyBlockState {
            block_id: BlockId::new(BlockNum(2), &Digest::from_bytes(b"legacy")),
            previous: BlockId::EMPTY,
            timestamp: BlockTimestamp(2),
        };
        let block_id = legacy.block_id;
        h.fork_db.add(legacy);

        let key = &h.keys[0];
        let vote = VoteMessage::new(block_id, true, key.public_key(), key.sign(b"legacy"));
        h.send(1, Arc::new(vote));
        assert_eq!(h.signals.statuses(), vec![(1, VoteStatus::UnknownBlock)]);
        assert_eq!(h.processor.index_size(), 0);
    }

    #[traced_test]
    #[test]
    fn test_async_dispatch_on_pool() {
        let pool = VoteThreadPool::new(2).unwrap();
        let mut h = Harness::with_executor(VoteProcessorConfig::minimal(), Arc::new(pool));
        let b2 = h.chain.extend_strong();

        let unknown = h.vote(&b2, 0, true);
        h.processor
            .process_vote_message(ConnectionId(1), unknown, Dispatch::Async);
        wait_for(|| h.processor.index_size() == 1);
        assert_eq!(h.processor.index_size(), 1);

        h.fork_db.add(Arc::clone(&b2));
        h.processor.notify_new_block(Dispatch::Async);
        wait_for(|| h.signals.len() == 1);
        assert_eq!(h.signals.statuses(), vec![(1, VoteStatus::Success)]);

        h.processor.stop();
        h.processor
            .process_vote_message(ConnectionId(1), h.vote(&b2, 1, true), Dispatch::Async);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(h.signals.len(), 1);
        assert!(logs_contain("Vote processor stopped"));
    }
}
