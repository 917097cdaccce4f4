//! Generic single-producer, many-subscriber fan-out primitive.
//!
//! Delivery to subscribers never blocks the producer: `deliver` only pushes
//! onto each subscriber's internal unbounded queue, which is drained in
//! order by that subscriber's own long-lived forwarding task (spawned once,
//! at `subscribe` time — not once per event). A slow or stalled subscriber
//! only backs up its own queue and its own forwarding task; it cannot delay
//! delivery to anyone else or to the producer. Subscribers are identified by
//! an opaque, ever-incrementing id so unsubscribe is a simple map removal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

type SubscriberId = u64;

struct Inner<T> {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<T>>>,
}

/// A fan-out bus for values of type `T`. Cloning a `FanoutBus` shares the
/// same subscriber set.
pub struct FanoutBus<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FanoutBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for FanoutBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity of each subscriber's delivery channel. A bounded channel backed
/// by a per-subscriber task is enough to smooth out bursts without letting
/// one forgotten subscriber grow unbounded memory.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

impl<T> FanoutBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new subscriber, returning its receiver and a handle that
    /// unsubscribes on drop. Spawns this subscriber's one forwarding task,
    /// which drains its internal queue in order and feeds the bounded
    /// channel handed back to the caller.
    pub fn subscribe(&self) -> (mpsc::Receiver<T>, Subscription<T>)
    where
        T: Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<T>();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().unwrap().insert(id, internal_tx);

        tokio::spawn(async move {
            while let Some(value) = internal_rx.recv().await {
                if out_tx.send(value).await.is_err() {
                    break;
                }
            }
        });

        (
            out_rx,
            Subscription {
                id,
                inner: self.inner.clone(),
            },
        )
    }

    /// Deliver `value` to every currently-registered subscriber. Never
    /// blocks: each subscriber's internal queue is unbounded, so the
    /// `send` below never waits, and ordering relative to prior deliveries
    /// is preserved by that subscriber's forwarding task.
    pub fn deliver(&self, value: T)
    where
        T: Clone + Send + 'static,
    {
        let subscribers = self.inner.subscribers.lock().unwrap();
        for tx in subscribers.values() {
            let _ = tx.send(value.clone());
        }
    }

    fn unsubscribe(inner: &Inner<T>, id: SubscriberId) {
        inner.subscribers.lock().unwrap().remove(&id);
    }
}

/// Handle returned by [`FanoutBus::subscribe`]. Unregisters the subscriber
/// when dropped: the internal sender is removed from the map, so its
/// forwarding task's queue closes and the task exits on its next `recv`.
pub struct Subscription<T> {
    id: SubscriberId,
    inner: Arc<Inner<T>>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        FanoutBus::unsubscribe(&self.inner, self.id);
    }
}
