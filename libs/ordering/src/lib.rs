//! Per-conversation serialization queues.
//!
//! Events that share a conversation context must be processed strictly in
//! arrival order, one at a time, while unrelated conversations run
//! concurrently. Each live context owns one driver task and a FIFO queue of
//! pending jobs; the driver retires and removes its entry as soon as the
//! queue drains, so idle conversations hold no memory.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tracing::debug;

pub type Job = BoxFuture<'static, ()>;

/// Arena of per-context work queues with get-or-create semantics.
#[derive(Clone, Default)]
pub struct ContextQueues {
    // `BoxFuture` is `Send` but not `Sync`; the `Mutex` restores `Sync` so the
    // map can be shared from the spawned driver task. It is never contended:
    // jobs are only taken out whole via `into_inner`.
    queues: Arc<DashMap<String, VecDeque<Mutex<Job>>>>,
}

impl ContextQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts with a live driver, mainly for observability.
    pub fn active_contexts(&self) -> usize {
        self.queues.len()
    }

    /// Appends `job` to the context's queue, lazily starting a driver for a
    /// previously-unseen context. Jobs for one context run to completion in
    /// submission order; jobs for different contexts interleave freely.
    pub fn enqueue<F>(&self, context: impl Into<String>, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let context = context.into();
        let job: Job = Box::pin(job);
        match self.queues.entry(context.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().push_back(Mutex::new(job)),
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::new());
                let queues = self.clone();
                tokio::spawn(queues.drive(context, job));
            }
        }
    }

    async fn drive(self, context: String, first: Job) {
        debug!(context = %context, "context worker started");
        let mut job = first;
        loop {
            job.await;
            loop {
                if let Some(next) = self
                    .queues
                    .get_mut(&context)
                    .and_then(|mut queue| queue.pop_front())
                {
                    job = next.into_inner().expect("job mutex poisoned");
                    break;
                }
                // The queue looks drained; retire unless a producer slipped
                // a job in between the pop and the removal check.
                if self
                    .queues
                    .remove_if(&context, |_, queue| queue.is_empty())
                    .is_some()
                {
                    debug!(context = %context, "context worker retired");
                    return;
                }
            }
        }
    }
}
