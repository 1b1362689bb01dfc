//! Block references and the finality core.
//!
//! The finality core is the per-block summary of the QC chain that lets a
//! finalizer decide how to vote without walking the fork database. It keeps:
//!
//! - **links**: one [`QcLink`] per block from the oldest block still relevant
//!   to finality up to the current block, recording which ancestor each block
//!   claimed a QC on.
//! - **refs**: a [`BlockRef`] per block from the last final block up to (but
//!   excluding) the current block.
//!
//! Finality advances with a two-chain rule: a strong QC claim on block `b`
//! makes final the block that `b` itself claimed a strong QC on.

use crate::{BlockId, BlockNum, BlockTimestamp};

/// Reference to a block by id and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockRef {
    /// Block id (encodes the block number).
    pub block_id: BlockId,
    /// Block timestamp.
    pub timestamp: BlockTimestamp,
}

impl BlockRef {
    /// The empty reference.
    pub const EMPTY: Self = Self {
        block_id: BlockId::EMPTY,
        timestamp: BlockTimestamp(0),
    };

    /// Create a new block reference.
    pub fn new(block_id: BlockId, timestamp: BlockTimestamp) -> Self {
        Self {
            block_id,
            timestamp,
        }
    }

    /// True when this refers to no block.
    pub fn is_empty(&self) -> bool {
        self.block_id.is_empty()
    }

    /// Block number taken from the id.
    pub fn block_num(&self) -> BlockNum {
        self.block_id.block_num()
    }
}

/// A block's claim that some ancestor has a QC of the given strength.
///
/// Claims order by block number first, then weak before strong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QcClaim {
    /// Block the QC is on.
    pub block_num: BlockNum,
    /// Whether the QC is strong.
    pub is_strong_qc: bool,
}

impl QcClaim {
    /// Create a claim.
    pub fn new(block_num: BlockNum, is_strong_qc: bool) -> Self {
        Self {
            block_num,
            is_strong_qc,
        }
    }
}

/// Link from a block to the ancestor it claimed a QC on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QcLink {
    /// Block making the claim.
    pub source: BlockNum,
    /// Block the claimed QC is on (`target <= source`).
    pub target: BlockNum,
    /// Whether the claimed QC is strong.
    pub is_link_strong: bool,
}

/// Finality state carried by each block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityCore {
    links: Vec<QcLink>,
    refs: Vec<BlockRef>,
    genesis_timestamp: BlockTimestamp,
}

impl FinalityCore {
    /// Core for the genesis block.
    ///
    /// The genesis block is its own last final block and claims a weak QC on
    /// itself.
    pub fn genesis(block_id: BlockId, timestamp: BlockTimestamp) -> Self {
        let block_num = block_id.block_num();
        Self {
            links: vec![QcLink {
                source: block_num,
                target: block_num,
                is_link_strong: false,
            }],
            refs: Vec::new(),
            genesis_timestamp: timestamp,
        }
    }

    fn front(&self) -> &QcLink {
        // Every constructor leaves at least one link and `next` only appends.
        &self.links[0]
    }

    fn back(&self) -> &QcLink {
        &self.links[self.links.len() - 1]
    }

    /// True while no block has been appended after genesis.
    pub fn is_genesis_core(&self) -> bool {
        self.refs.is_empty()
    }

    /// Number of the block this core belongs to.
    pub fn current_block_num(&self) -> BlockNum {
        self.back().source
    }

    /// Last final block as seen by this block.
    pub fn last_final_block_num(&self) -> BlockNum {
        self.front().target
    }

    /// Latest QC claimed by this block.
    pub fn latest_qc_claim(&self) -> QcClaim {
        let back = self.back();
        QcClaim {
            block_num: back.target,
            is_strong_qc: back.is_link_strong,
        }
    }

    /// Timestamp of the last final block.
    pub fn last_final_block_timestamp(&self) -> BlockTimestamp {
        if self.is_genesis_core() {
            return self.genesis_timestamp;
        }
        self.ref_timestamp(self.last_final_block_num())
    }

    /// Timestamp of the block the latest QC claim is on.
    pub fn latest_qc_block_timestamp(&self) -> BlockTimestamp {
        if self.is_genesis_core() {
            return self.genesis_timestamp;
        }
        self.ref_timestamp(self.back().target)
    }

    fn ref_timestamp(&self, block_num: BlockNum) -> BlockTimestamp {
        self.get_block_reference(block_num)
            .map(|r| r.timestamp)
            .unwrap_or(self.genesis_timestamp)
    }

    /// Reference to an ancestor in `[last_final_block_num, current_block_num)`.
    pub fn get_block_reference(&self, block_num: BlockNum) -> Option<&BlockRef> {
        if block_num < self.last_final_block_num() || block_num >= self.current_block_num() {
            return None;
        }
        let index = (block_num.0 - self.last_final_block_num().0) as usize;
        self.refs.get(index)
    }

    /// Check whether `id` is a non-final ancestor of this block.
    ///
    /// Blocks at or after the last final block are the only ones tracked;
    /// anything older reads as not extended.
    pub fn extends(&self, id: &BlockId) -> bool {
        self.get_block_reference(id.block_num())
            .is_some_and(|r| r.block_id == *id)
    }

    fn get_qc_link_from(&self, block_num: BlockNum) -> Option<&QcLink> {
        let front_source = self.front().source;
        if block_num < front_source {
            return None;
        }
        self.links.get((block_num.0 - front_source.0) as usize)
    }

    /// New last-final block and new front link source for a claim.
    fn new_block_nums(&self, claim: &QcClaim) -> Result<(BlockNum, BlockNum), FinalityCoreError> {
        if !claim.is_strong_qc {
            return Ok((self.last_final_block_num(), self.front().source));
        }
        let link = self
            .get_qc_link_from(claim.block_num)
            .ok_or(FinalityCoreError::InvalidClaim {
                claim: *claim,
                current: self.current_block_num(),
            })?;
        Ok((link.target, link.source))
    }

    /// Core of the child block.
    ///
    /// `current_block` is the block this core belongs to and `claim` is the
    /// child's QC claim, which must not regress from this core's latest claim
    /// and must be on a block no later than the current one.
    pub fn next(
        &self,
        current_block: BlockRef,
        claim: QcClaim,
    ) -> Result<FinalityCore, FinalityCoreError> {
        let current = self.current_block_num();
        if current_block.block_num() != current {
            return Err(FinalityCoreError::WrongBlock {
                expected: current,
                actual: current_block.block_num(),
            });
        }
        if claim.block_num > current || claim < self.latest_qc_claim() {
            return Err(FinalityCoreError::InvalidClaim { claim, current });
        }

        let (new_last_final, new_front_source) = self.new_block_nums(&claim)?;

        let links_index = (new_front_source.0 - self.front().source.0) as usize;
        let mut links = self.links[links_index..].to_vec();
        links.push(QcLink {
            source: current.next(),
            target: claim.block_num,
            is_link_strong: claim.is_strong_qc,
        });

        let refs_index = (new_last_final.0 - self.last_final_block_num().0) as usize;
        let mut refs = self.refs[refs_index.min(self.refs.len())..].to_vec();
        refs.push(current_block);

        Ok(FinalityCore {
            links,
            refs,
            genesis_timestamp: self.genesis_timestamp,
        })
    }
}

/// Errors from advancing a finality core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalityCoreError {
    /// The block passed as current does not match the core.
    #[error("Expected current block {expected}, got {actual}")]
    WrongBlock {
        /// Core's current block number.
        expected: BlockNum,
        /// Number of the block supplied.
        actual: BlockNum,
    },

    /// The claim regresses or points past the current block.
    #[error("Invalid QC claim {claim:?} for current block {current}")]
    InvalidClaim {
        /// Offending claim.
        claim: QcClaim,
        /// Core's current block number.
        current: BlockNum,
    },
}
