//! Delivery task: consumes queued webhook deliveries through the pipeline.
//!
//! The webhook handler acknowledges the platform as soon as a delivery is
//! verified and enqueued; this task does the actual rule processing. Each
//! delivery is processed on its own spawned task so a slow platform call for
//! one delivery never stalls the rest of the queue, bounded by a semaphore.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::errors::QueueError;
use crate::normalizer::DeliveryEnvelope;
use crate::pipeline::EventPipeline;
use crate::queue_adapter::QueueAdapter;

/// One verified webhook delivery, queued for processing.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DeliveryWork {
    /// Queue-side identifier for tracing, not a platform id.
    pub id: String,
    pub envelope: DeliveryEnvelope,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl DeliveryWork {
    pub fn new(envelope: DeliveryEnvelope) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            envelope,
            received_at: chrono::Utc::now(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryTaskConfig {
    /// Maximum deliveries processed concurrently.
    pub max_concurrent: usize,
}

impl Default for DeliveryTaskConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

/// Queue consumer driving the event pipeline.
pub struct DeliveryTask {
    adapter: Arc<dyn QueueAdapter<DeliveryWork>>,
    pipeline: Arc<EventPipeline>,
    cancel_token: CancellationToken,
    config: DeliveryTaskConfig,
    semaphore: Arc<Semaphore>,
    processed: Arc<AtomicU64>,
}

impl DeliveryTask {
    pub fn new(
        adapter: Arc<dyn QueueAdapter<DeliveryWork>>,
        pipeline: Arc<EventPipeline>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self::with_config(adapter, pipeline, cancel_token, DeliveryTaskConfig::default())
    }

    pub fn with_config(
        adapter: Arc<dyn QueueAdapter<DeliveryWork>>,
        pipeline: Arc<EventPipeline>,
        cancel_token: CancellationToken,
        config: DeliveryTaskConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            adapter,
            pipeline,
            cancel_token,
            config,
            semaphore,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run until cancelled or the queue closes.
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<(), QueueError> {
        info!(
            max_concurrent = self.config.max_concurrent,
            "Delivery task started"
        );

        if !self.adapter.is_healthy().await {
            return Err(QueueError::OperationFailed {
                operation: "health_check".to_string(),
                details: "queue adapter is not healthy".to_string(),
            });
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Delivery task shutting down");
                    break;
                }
                work = self.adapter.pull() => {
                    let Some(work) = work else {
                        info!("Delivery queue closed, stopping");
                        break;
                    };

                    let permit = match self.semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            error!("Delivery semaphore closed unexpectedly");
                            break;
                        }
                    };

                    let pipeline = self.pipeline.clone();
                    let adapter = self.adapter.clone();
                    let processed = self.processed.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        debug!(delivery = %work.id, "Processing delivery");
                        let report = pipeline.process_delivery(&work.envelope).await;
                        debug!(
                            delivery = %work.id,
                            events = report.events,
                            executed = report.executed,
                            "Delivery processed"
                        );
                        processed.fetch_add(1, Ordering::Relaxed);
                        let _ = adapter.ack(&work).await;
                    });
                }
            }
        }

        // Drain in-flight deliveries before reporting stopped.
        let _permits = self
            .semaphore
            .acquire_many(self.config.max_concurrent as u32)
            .await
            .map_err(|e| QueueError::OperationFailed {
                operation: "drain".to_string(),
                details: e.to_string(),
            })?;

        info!(
            total_processed = self.processed.load(Ordering::Relaxed),
            "Delivery task stopped"
        );

        Ok(())
    }
}
