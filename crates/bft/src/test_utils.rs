//! Block-state fixtures for tests.
//!
//! [`TestChain`] builds trees of [`BlockState`]s with real finality cores.
//! Block ids are derived from a proposer name and the block number, so two
//! proposers building at the same height produce distinct forks.

use crate::block_state::BlockState;
use crate::config::FinalizerKeyConfig;
use savanna_types::{
    BlockId, BlockNum, BlockTimestamp, BlsPrivateKey, Digest, FinalityCore, FinalizerPolicy,
    QcClaim,
};
use std::sync::Arc;

/// A tree of blocks sharing one genesis and one set of policies.
pub struct TestChain {
    active_policy: Arc<FinalizerPolicy>,
    pending_policy: Option<Arc<FinalizerPolicy>>,
    blocks: Vec<Arc<BlockState>>,
}

impl TestChain {
    /// Chain with genesis block 1 at timestamp 1.
    pub fn new(active_policy: Arc<FinalizerPolicy>) -> Self {
        Self::with_genesis(active_policy, BlockNum(1), BlockTimestamp(1))
    }

    /// Chain with the given genesis block number and timestamp.
    pub fn with_genesis(
        active_policy: Arc<FinalizerPolicy>,
        block_num: BlockNum,
        timestamp: BlockTimestamp,
    ) -> Self {
        let block_id = block_id("genesis", block_num);
        let genesis = BlockState::new(
            block_id,
            BlockId::EMPTY,
            timestamp,
            FinalityCore::genesis(block_id, timestamp),
            finality_digest(&block_id),
            Arc::clone(&active_policy),
            None,
        );
        Self {
            active_policy,
            pending_policy: None,
            blocks: vec![Arc::new(genesis)],
        }
    }

    /// Blocks added from now on carry `policy` as their pending policy.
    pub fn set_pending_policy(&mut self, policy: Option<Arc<FinalizerPolicy>>) {
        self.pending_policy = policy;
    }

    /// Most recently added block.
    pub fn head(&self) -> &Arc<BlockState> {
        // `blocks` always holds at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Most recently added block with the given number.
    pub fn block(&self, block_num: BlockNum) -> Option<&Arc<BlockState>> {
        self.blocks.iter().rev().find(|b| b.block_num() == block_num)
    }

    /// Add a child of `parent` built by `proposer`.
    ///
    /// # Panics
    ///
    /// Panics if `claim` is not a valid claim for a child of `parent`.
    pub fn add_block(
        &mut self,
        parent: &Arc<BlockState>,
        proposer: &str,
        timestamp: BlockTimestamp,
        claim: QcClaim,
    ) -> Arc<BlockState> {
        let core = parent
            .core()
            .next(parent.block_ref(), claim)
            .expect("claim must be valid for the parent");
        let block_id = block_id(proposer, parent.block_num().next());
        let block = Arc::new(BlockState::new(
            block_id,
            parent.id(),
            timestamp,
            core,
            finality_digest(&block_id),
            Arc::clone(&self.active_policy),
            self.pending_policy.clone(),
        ));
        self.blocks.push(Arc::clone(&block));
        block
    }

    /// Child of the head, one slot later, with the given claim.
    pub fn extend(&mut self, claim: QcClaim) -> Arc<BlockState> {
        let parent = Arc::clone(self.head());
        self.add_block(&parent, "main", parent.timestamp().next(), claim)
    }

    /// Child of the head claiming a strong QC on the head.
    pub fn extend_strong(&mut self) -> Arc<BlockState> {
        let claim = QcClaim::new(self.head().block_num(), true);
        self.extend(claim)
    }
}

/// Id of the block `proposer` builds at `block_num`.
pub fn block_id(proposer: &str, block_num: BlockNum) -> BlockId {
    let digest = Digest::from_parts(&[proposer.as_bytes(), &block_num.0.to_le_bytes()]);
    BlockId::new(block_num, &digest)
}

/// Finality digest used for a test block.
pub fn finality_digest(block_id: &BlockId) -> Digest {
    Digest::from_parts(&[b"finality", block_id.as_bytes()])
}

/// Hex key-pair entry for `key`.
pub fn key_config(key: &BlsPrivateKey) -> FinalizerKeyConfig {
    FinalizerKeyConfig {
        public_key: key.public_key().to_hex(),
        private_key: key.to_hex(),
    }
}
