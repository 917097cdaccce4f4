//! The container-event bus: fans driver events out to per-job subscribers.

use std::sync::Arc;

use futures::StreamExt;
use jobrunner_core::{ContainerDriver, ContainerEvent};
use tokio::sync::mpsc;
use tracing::warn;

use crate::fanout::{FanoutBus, Subscription};

/// Fans out [`ContainerEvent`]s from the driver's event source to every
/// subscribed job runner. If the underlying driver stream terminates, it is
/// transparently re-established; subscribers never see this as a closure.
pub struct ContainerEventBus {
    bus: FanoutBus<ContainerEvent>,
}

impl ContainerEventBus {
    /// Spawn the dispatch task and return a handle to it.
    pub fn spawn(driver: Arc<dyn ContainerDriver>) -> Self {
        let bus = FanoutBus::new();
        let dispatch_bus = bus.clone();
        tokio::spawn(async move {
            loop {
                let mut stream = driver.subscribe_events();
                while let Some(event) = stream.next().await {
                    dispatch_bus.deliver(event);
                }
                warn!("container event stream closed, re-subscribing");
            }
        });
        Self { bus }
    }

    pub fn subscribe(&self) -> (mpsc::Receiver<ContainerEvent>, Subscription<ContainerEvent>) {
        self.bus.subscribe()
    }
}
