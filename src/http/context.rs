use std::{ops::Deref, sync::Arc};

use crate::{config::Config, queue_adapter::QueueAdapter, tasks::DeliveryWork};

pub struct InnerWebContext {
    pub(crate) config: Config,
    pub(crate) delivery_queue: Arc<dyn QueueAdapter<DeliveryWork>>,
}

#[derive(Clone)]
pub struct WebContext(pub(crate) Arc<InnerWebContext>);

impl Deref for WebContext {
    type Target = InnerWebContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(config: Config, delivery_queue: Arc<dyn QueueAdapter<DeliveryWork>>) -> Self {
        Self(Arc::new(InnerWebContext {
            config,
            delivery_queue,
        }))
    }

    pub fn delivery_queue(&self) -> &Arc<dyn QueueAdapter<DeliveryWork>> {
        &self.0.delivery_queue
    }
}
