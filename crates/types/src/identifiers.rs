//! Domain-specific identifier types.

use crate::{Digest, HexError};
use std::fmt;

/// Block number (height).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNum(pub u32);

impl BlockNum {
    /// Get the next block number.
    pub fn next(self) -> Self {
        BlockNum(self.0 + 1)
    }

    /// Get the previous block number (returns None at zero).
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(BlockNum)
    }
}

impl fmt::Display for BlockNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Block timestamp, counted in half-second slots.
///
/// Slot 0 doubles as the "empty" timestamp of an unset [`BlockRef`](crate::BlockRef).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockTimestamp(pub u32);

impl BlockTimestamp {
    /// Milliseconds per slot.
    pub const SLOT_MS: u64 = 500;

    /// Timestamp one slot later.
    pub fn next(self) -> Self {
        BlockTimestamp(self.0 + 1)
    }

    /// Timestamp `slots` slots later.
    pub fn after(self, slots: u32) -> Self {
        BlockTimestamp(self.0 + slots)
    }
}

impl fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot({})", self.0)
    }
}

/// Block identifier.
///
/// The first four bytes carry the block number (big-endian), the remaining
/// 28 bytes come from the block digest. The block number can therefore be read
/// from an id without looking the block up.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockId([u8; 32]);

impl BlockId {
    /// Size of a block id in bytes.
    pub const BYTES: usize = 32;

    /// The empty id (all zero).
    pub const EMPTY: Self = Self([0u8; 32]);

    /// Build an id for `block_num` from the block's digest.
    pub fn new(block_num: BlockNum, digest: &Digest) -> Self {
        let mut bytes = *digest.as_bytes();
        bytes[..4].copy_from_slice(&block_num.0.to_be_bytes());
        Self(bytes)
    }

    /// Wrap raw id bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an id from a 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        Digest::from_hex(hex).map(|d| Self(*d.as_bytes()))
    }

    /// Block number encoded in the id.
    pub fn block_num(&self) -> BlockNum {
        BlockNum(u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the all-zero id.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Hex encoding of the id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlockId({}:{}..)", self.block_num().0, &hex[8..20])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Network connection identifier.
///
/// Connection 0 is reserved for votes produced by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Votes produced by the local finalizers.
    pub const LOCAL: Self = ConnectionId(0);

    /// True for the local pseudo-connection.
    pub fn is_local(&self) -> bool {
        *self == Self::LOCAL
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({})", self.0)
    }
}
