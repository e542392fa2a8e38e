//! Observer surface of the stream.
//!
//! Every lifecycle change and publish outcome is broadcast as a
//! [`StreamEvent`] to all subscribers. Each subscriber owns a bounded
//! channel; a subscriber that stops reading loses events rather than
//! stalling the stream, and a dropped receiver is pruned on the next
//! emission.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::warn;
use parking_lot::Mutex;

use crate::{
    broker::{ConnectionError, PublishError},
    rate_limited_warner::RateLimitedWarner,
};

/// Default per-subscriber event queue length.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notification delivered to stream observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The exchange is available; buffered messages are being drained.
    Connect,
    /// The connection was closed explicitly.
    Close,
    /// The connection layer reported a failure.
    Error(ConnectionError),
    /// A heartbeat was exchanged with the broker.
    Heartbeat,
    /// The broker accepted the payload.
    Ack(Arc<[u8]>),
    /// The broker rejected a publish.
    AckError(PublishError),
    /// A buffered message was evicted to make room for a newer one.
    Overflow { routing_key: String },
}

impl StreamEvent {
    /// Short event name, matching the observer vocabulary.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connect => "connect",
            StreamEvent::Close => "close",
            StreamEvent::Error(_) => "error",
            StreamEvent::Heartbeat => "heartbeat",
            StreamEvent::Ack(_) => "ack",
            StreamEvent::AckError(_) => "ack-error",
            StreamEvent::Overflow { .. } => "overflow",
        }
    }
}

/// Fan-out of [`StreamEvent`]s to subscribers.
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<StreamEvent>>>,
    capacity: usize,
    warner: RateLimitedWarner,
}

impl EventHub {
    pub fn new(capacity: usize, warn_interval: Duration) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
            warner: RateLimitedWarner::new(warn_interval),
        }
    }

    /// Register a new subscriber. Only events emitted afterwards are seen.
    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn emit(&self, event: StreamEvent) {
        {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.warner.record_drop();
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
        self.warner.warn_if_due(|count| {
            warn!("AmqpStream observer queue full; dropped {count} events");
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(
            DEFAULT_EVENT_CAPACITY,
            crate::rate_limited_warner::DEFAULT_WARN_INTERVAL,
        )
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
