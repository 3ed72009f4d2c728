//! Background tasks.
//!
//! The HTTP layer is a thin producer: verified deliveries become
//! [`DeliveryWork`] items on the queue, and the delivery task consumes them
//! through the pipeline off the request path.

mod delivery;
mod manager;

pub use delivery::{DeliveryTask, DeliveryTaskConfig, DeliveryWork};
pub use manager::{spawn_cancellable_task, spawn_managed_task};
