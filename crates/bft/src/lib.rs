//! Savanna finality: vote aggregation and local voting.
//!
//! This crate holds the per-block and per-finalizer state of the finality
//! layer:
//!
//! - [`PendingQuorumCertificate`] accumulates votes for one policy and
//!   tracks the quorum state machine
//! - [`AggregatingQc`] runs one accumulator per policy of a block
//! - [`BlockState`] ties a block's finality core, digests and accumulators
//!   together; [`BlockHandle`] also covers pre-activation blocks
//! - [`Finalizer`] decides votes for one local key
//! - [`FinalizerSet`] decides for every local key, persists the
//!   [`SafetyFile`], then releases the votes
//!
//! Nothing here performs network I/O. The only blocking I/O is the safety
//! file write in [`FinalizerSet::maybe_vote`].

mod aggregating_qc;
mod block_state;
mod config;
mod finalizer;
mod finalizer_set;
mod pending_qc;
pub mod safety_file;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use aggregating_qc::{AggregateVoteResult, AggregatingQc, MissingVote, QcVoteMetrics};
pub use block_state::{BlockHandle, BlockState, LegacyBlockState};
pub use config::{ConfigError, FinalizerKeyConfig, FinalizerSetConfig, DEFAULT_SAFETY_FILE};
pub use finalizer::{Finalizer, VoteDecision, VoteResult};
pub use finalizer_set::{CastVote, FinalizerSet, FinalizerSetError};
pub use pending_qc::{PendingQcSnapshot, PendingQuorumCertificate, PendingState, VoteTally};
pub use safety_file::{SafetyFile, SafetyFileError, SafetyMap};
