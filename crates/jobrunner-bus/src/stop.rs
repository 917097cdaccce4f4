//! The stop-event bus: fans user stop requests out to the engine.

use jobrunner_core::StopRequest;
use tokio::sync::mpsc;

use crate::fanout::{FanoutBus, Subscription};

/// Fans [`StopRequest`]s out to every subscribed job runner. Unlike the
/// container-event bus there is no external producer to reconnect to: the
/// HTTP stop handler publishes directly via [`StopBus::publish`].
#[derive(Clone, Default)]
pub struct StopBus {
    bus: FanoutBus<StopRequest>,
}

impl StopBus {
    pub fn new() -> Self {
        Self {
            bus: FanoutBus::new(),
        }
    }

    pub fn subscribe(&self) -> (mpsc::Receiver<StopRequest>, Subscription<StopRequest>) {
        self.bus.subscribe()
    }

    pub fn publish(&self, request: StopRequest) {
        self.bus.deliver(request);
    }
}
