//! Delivery counters shared between the stream handle and its worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the stream and the publisher.
#[derive(Debug, Default)]
pub struct StreamStats {
    submitted: AtomicU64,
    published: AtomicU64,
    acked: AtomicU64,
    ack_errors: AtomicU64,
    overflowed: AtomicU64,
    queue_dropped: AtomicU64,
    suppressed: AtomicU64,
    buffered: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages handed to the publisher.
    pub submitted: u64,
    /// Messages passed to the exchange.
    pub published: u64,
    /// Publishes confirmed by the broker.
    pub acked: u64,
    /// Publishes rejected by the broker.
    pub ack_errors: u64,
    /// Buffered messages evicted by newer ones.
    pub overflowed: u64,
    /// Records dropped because the worker queue was full or closed.
    pub queue_dropped: u64,
    /// Records suppressed by the message formatter.
    pub suppressed: u64,
    /// Messages currently waiting in the ring buffer.
    pub buffered: u64,
}

impl StreamStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_error(&self) {
        self.ack_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_drop(&self) {
        self.queue_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_buffered(&self, len: usize) {
        self.buffered.store(len as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
        }
    }
}
