//! Collaborator traits.

use crate::VoteSignal;

/// Receives the outcome of each processed vote.
///
/// Called from whichever thread processed the vote, so implementations must
/// be thread-safe and should not block.
pub trait VoteSink: Send + Sync {
    /// Handle one vote outcome.
    fn on_vote(&self, signal: VoteSignal);
}

impl<F> VoteSink for F
where
    F: Fn(VoteSignal) + Send + Sync,
{
    fn on_vote(&self, signal: VoteSignal) {
        self(signal)
    }
}

/// A unit of work handed to a [`TaskExecutor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks.
///
/// Tasks submitted from one thread must start in submission order.
pub trait TaskExecutor: Send + Sync {
    /// Submit a task for execution.
    fn submit(&self, task: Task);
}

/// Runs every task immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn submit(&self, task: Task) {
        task()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoteStatus;
    use savanna_messages::VoteMessage;
    use savanna_types::{BlockId, BlockNum, BlsPrivateKey, ConnectionId, Digest};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<VoteStatus>>);

    impl VoteSink for Recorder {
        fn on_vote(&self, signal: VoteSignal) {
            self.0.lock().unwrap().push(signal.status);
        }
    }

    fn signal(status: VoteStatus) -> VoteSignal {
        let key = BlsPrivateKey::from_seed(&[1; 32]);
        let vote = VoteMessage::new(
            BlockId::new(BlockNum(1), &Digest::from_bytes(b"1")),
            true,
            key.public_key(),
            key.sign(b"1"),
        );
        VoteSignal::new(ConnectionId(3), status, Arc::new(vote))
    }

    #[test]
    fn test_closure_and_struct_sinks() {
        let recorder = Recorder::default();
        recorder.on_vote(signal(VoteStatus::Success));
        assert_eq!(*recorder.0.lock().unwrap(), vec![VoteStatus::Success]);

        let count = AtomicUsize::new(0);
        let sink = |_: VoteSignal| {
            count.fetch_add(1, Ordering::Relaxed);
        };
        sink.on_vote(signal(VoteStatus::Duplicate));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_inline_executor_runs_immediately() {
        let flag = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&flag);
        InlineExecutor.submit(Box::new(move || f.store(true, Ordering::Relaxed)));
        assert!(flag.load(Ordering::Relaxed));
    }
}
