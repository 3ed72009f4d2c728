//! In-memory queue adapter backed by a Tokio MPSC channel.
//!
//! Bounded, fast, and process-local: queued deliveries are lost on restart,
//! which is acceptable because the platform retries unacknowledged webhooks.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use super::QueueAdapter;
use crate::errors::QueueError;

/// MPSC-backed [`QueueAdapter`].
///
/// The receiver sits behind a `Mutex` so multiple consumer tasks can share
/// one adapter; each queued item is pulled by exactly one of them.
pub struct MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    sender: mpsc::Sender<T>,
}

impl<T> MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    /// Create an adapter with room for `buffer` queued items. Pushes past
    /// the buffer wait (`push`) or fail (`try_push`).
    pub fn new(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            sender,
        }
    }

    /// Clone of the producer handle, for tasks that only enqueue.
    pub fn sender(&self) -> mpsc::Sender<T> {
        self.sender.clone()
    }
}

#[async_trait]
impl<T> QueueAdapter<T> for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    async fn pull(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        let result = receiver.recv().await;
        trace!(has_item = result.is_some(), "Pulled item from queue");
        result
    }

    async fn push(&self, work: T) -> Result<()> {
        self.sender
            .send(work)
            .await
            .map_err(|e| QueueError::OperationFailed {
                operation: "send".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    async fn try_push(&self, work: T) -> Result<()> {
        self.sender.try_send(work).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::CapacityExceeded {
                capacity: self.sender.max_capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::OperationFailed {
                operation: "try_send".to_string(),
                details: "channel closed".to_string(),
            },
        })?;
        Ok(())
    }

    async fn depth(&self) -> Option<usize> {
        // Approximate: the channel only exposes remaining capacity.
        Some(self.sender.max_capacity() - self.sender.capacity())
    }

    async fn is_healthy(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl<T> Clone for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            sender: self.sender.clone(),
        }
    }
}
