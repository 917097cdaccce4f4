//! Single-producer, many-subscriber fan-out buses.
//!
//! Two multiplexers built on the same primitive: [`ContainerEventBus`] fans
//! driver events out to per-job subscribers and transparently reconnects to
//! the driver if its event stream closes; [`StopBus`] fans user stop
//! requests, keyed by job id, out to the engine.

mod container;
mod fanout;
mod stop;

pub use container::ContainerEventBus;
pub use fanout::{FanoutBus, Subscription};
pub use stop::StopBus;
