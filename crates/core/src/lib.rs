//! Shared vocabulary for the Savanna finality engine.
//!
//! - [`VoteStatus`] and [`HasVoted`]: outcomes of vote intake
//! - [`VoteSignal`]: what the engine reports to the network layer per vote
//! - [`VoteSink`] and [`TaskExecutor`]: the collaborators the engine is
//!   handed instead of owning a network or a thread pool itself

mod message;
mod status;
mod traits;

pub use message::VoteSignal;
pub use status::{HasVoted, VoteStatus};
pub use traits::{InlineExecutor, Task, TaskExecutor, VoteSink};
