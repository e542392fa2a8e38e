//! Ordering and delivery between record writes and broker publishes.

use std::{sync::Arc, time::Duration};

use log::{debug, warn};

use crate::{
    broker::{Exchange, PublishCallback, PublishOptions},
    events::{EventHub, StreamEvent},
    rate_limited_warner::RateLimitedWarner,
    ring_buffer::RingBuffer,
};

use super::stats::StreamStats;

/// A routed, serialized message awaiting publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferedMessage {
    pub routing_key: String,
    pub payload: Arc<[u8]>,
}

impl BufferedMessage {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }
}

/// Publishes directly while an exchange is available and buffers otherwise.
///
/// The exchange is borrowed per call from the
/// [`ConnectionManager`](crate::connection::ConnectionManager), which returns
/// one only while connected.
pub struct BufferedPublisher {
    buffer: RingBuffer<BufferedMessage>,
    options: PublishOptions,
    default_routing_key: String,
    events: Arc<EventHub>,
    stats: Arc<StreamStats>,
    warner: RateLimitedWarner,
}

impl BufferedPublisher {
    pub fn new(
        capacity: usize,
        options: PublishOptions,
        default_routing_key: impl Into<String>,
        events: Arc<EventHub>,
        stats: Arc<StreamStats>,
        warn_interval: Duration,
    ) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            options,
            default_routing_key: default_routing_key.into(),
            events,
            stats,
            warner: RateLimitedWarner::new(warn_interval),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Buffered messages, oldest first.
    pub fn buffered(&self) -> impl Iterator<Item = &BufferedMessage> {
        self.buffer.iter()
    }

    /// Publish `message` now if an exchange is available, otherwise buffer it.
    pub fn submit(&mut self, exchange: Option<&dyn Exchange>, mut message: BufferedMessage) {
        self.stats.record_submitted();
        if message.routing_key.is_empty() {
            message.routing_key.clone_from(&self.default_routing_key);
        }
        let deferred = match exchange {
            Some(exchange) => self.publish(exchange, message).err(),
            None => Some(message),
        };
        if let Some(message) = deferred {
            self.enqueue(message);
        }
    }

    /// Publish every buffered message in FIFO order.
    ///
    /// Call once per transition into the connected state. Returns the number
    /// of messages handed to the exchange. Stops early, keeping the order
    /// intact, if the exchange closes part-way through.
    pub fn drain(&mut self, exchange: Option<&dyn Exchange>) -> usize {
        let Some(exchange) = exchange else {
            return 0;
        };
        let mut drained = 0;
        while let Some(message) = self.buffer.pop() {
            if let Err(message) = self.publish(exchange, message) {
                if let Some(lost) = self.buffer.push_front(message) {
                    self.record_overflow(lost);
                }
                debug!("AmqpStream exchange closed during drain; {} messages remain buffered", self.buffer.len());
                break;
            }
            drained += 1;
        }
        self.stats.set_buffered(self.buffer.len());
        if drained > 0 {
            debug!("AmqpStream drained {drained} buffered messages");
        }
        drained
    }

    /// Discard every buffered message, returning how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.clear();
        self.stats.set_buffered(0);
        dropped
    }

    /// Hand `message` to the exchange. The message is returned if the
    /// exchange has already closed.
    fn publish(
        &self,
        exchange: &dyn Exchange,
        message: BufferedMessage,
    ) -> Result<(), BufferedMessage> {
        let events = Arc::clone(&self.events);
        let stats = Arc::clone(&self.stats);
        let payload = Arc::clone(&message.payload);
        let done: PublishCallback = Box::new(move |outcome| match outcome {
            Ok(()) => {
                stats.record_acked();
                events.emit(StreamEvent::Ack(payload));
            }
            Err(err) => {
                stats.record_ack_error();
                debug!("AmqpStream publish failed: {err}");
                events.emit(StreamEvent::AckError(err));
            }
        });
        match exchange.publish(&message.routing_key, &message.payload, self.options, done) {
            Ok(()) => {
                self.stats.record_published();
                Ok(())
            }
            Err(closed) => {
                debug!(
                    "AmqpStream deferring message for `{}`: {closed}",
                    message.routing_key
                );
                Err(message)
            }
        }
    }

    fn enqueue(&mut self, message: BufferedMessage) {
        if let Some(evicted) = self.buffer.push(message) {
            self.record_overflow(evicted);
        }
        self.stats.set_buffered(self.buffer.len());
    }

    fn record_overflow(&self, evicted: BufferedMessage) {
        self.stats.record_overflow();
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("AmqpStream buffer full; evicted {count} records while disconnected");
        });
        self.events.emit(StreamEvent::Overflow {
            routing_key: evicted.routing_key,
        });
    }
}

impl std::fmt::Debug for BufferedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedPublisher")
            .field("len", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .field("options", &self.options)
            .finish()
    }
}
