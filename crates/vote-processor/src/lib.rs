//! Network-facing intake for finalizer votes.
//!
//! [`VoteProcessor`] takes votes from peers, enforces a per-connection
//! quota, buffers votes whose block is not known yet and feeds the rest to
//! the block's accumulator. Outcomes go to a [`VoteSink`](savanna_core::VoteSink)
//! so the network layer can rebroadcast or penalise.
//!
//! Work runs either on the caller's thread or on a [`TaskExecutor`](savanna_core::TaskExecutor),
//! normally a [`VoteThreadPool`].

mod config;
mod index;
mod processor;
mod thread_pool;

pub use config::{ConfigError, VoteProcessorConfig, MAX_VOTES_PER_CONNECTION, TOO_OLD};
pub use index::{QueuedVote, VoteIndex};
pub use processor::{BlockFetcher, Dispatch, VoteProcessor};
pub use thread_pool::{ThreadPoolError, VoteThreadPool};
