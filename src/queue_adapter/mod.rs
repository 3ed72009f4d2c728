//! Work queue abstraction between webhook intake and delivery processing.
//!
//! The HTTP layer acknowledges deliveries as soon as they are verified and
//! enqueued; a background task drains the queue and runs the pipeline. The
//! trait keeps the backend swappable: the in-memory adapter suits a single
//! instance, and a distributed backend can slot in without touching the
//! intake or processing code.

use anyhow::Result;
use async_trait::async_trait;

mod mpsc;

pub use mpsc::MpscQueueAdapter;

/// Generic async work queue.
///
/// Implementations must be safe to share across tasks. `ack` and `depth`
/// have no-op defaults for backends that do not track either.
#[async_trait]
pub trait QueueAdapter<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Pull the next work item, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    async fn pull(&self) -> Option<T>;

    /// Push a work item, waiting for space if the queue is full.
    async fn push(&self, work: T) -> Result<()>;

    /// Confirm an item was fully processed. No-op for backends without
    /// redelivery.
    async fn ack(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    /// Push without waiting; fails immediately when the queue is full.
    ///
    /// The webhook handler uses this so a saturated queue sheds load
    /// instead of stalling platform delivery retries.
    async fn try_push(&self, work: T) -> Result<()> {
        self.push(work).await
    }

    /// Approximate number of queued items, if the backend can report it.
    async fn depth(&self) -> Option<usize> {
        None
    }

    /// Whether the queue can still accept and deliver work.
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_trait_object_safety() {
        fn _assert_object_safe(_: &dyn QueueAdapter<String>) {}
        fn _assert_sendable(_: Arc<dyn QueueAdapter<String>>) {}
    }
}
