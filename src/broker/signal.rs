//! Lifecycle signals flowing from the broker connection to the stream.
//!
//! Connection establishment, exchange declaration and closure complete
//! asynchronously inside the connection layer. The layer reports each of
//! those completions through a [`SignalSink`]; the stream worker consumes
//! them in order on its own thread.

use std::{fmt, sync::Arc};

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::{Exchange, error::ConnectionError};

/// Notification raised by the external connection.
pub enum ConnectionSignal {
    /// The low-level connection is established.
    Ready,
    /// The exchange requested via `open_exchange` is available.
    ExchangeOpened(Arc<dyn Exchange>),
    /// The connection closed. `Some(cause)` marks an explicit close; `None` a
    /// transient drop the stream recovers from by reconnecting.
    Closed(Option<ConnectionError>),
    /// The connection layer reported a failure.
    Error(ConnectionError),
    /// A heartbeat frame was exchanged with the broker.
    Heartbeat,
}

impl fmt::Debug for ConnectionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::ExchangeOpened(exchange) => f
                .debug_tuple("ExchangeOpened")
                .field(&exchange.name())
                .finish(),
            Self::Closed(cause) => f.debug_tuple("Closed").field(cause).finish(),
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Heartbeat => f.write_str("Heartbeat"),
        }
    }
}

/// Handle given to connectors for reporting lifecycle signals.
///
/// Sending never blocks. Signals raised after the stream has shut down are
/// discarded.
#[derive(Clone, Debug)]
pub struct SignalSink {
    tx: Sender<ConnectionSignal>,
}

impl SignalSink {
    /// Create a sink together with the receiving end.
    pub fn channel() -> (Self, Receiver<ConnectionSignal>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn send(&self, signal: ConnectionSignal) {
        if self.tx.send(signal).is_err() {
            log::debug!("AmqpStream worker gone; discarding connection signal");
        }
    }

    pub fn ready(&self) {
        self.send(ConnectionSignal::Ready);
    }

    pub fn exchange_opened(&self, exchange: Arc<dyn Exchange>) {
        self.send(ConnectionSignal::ExchangeOpened(exchange));
    }

    pub fn closed(&self, cause: Option<ConnectionError>) {
        self.send(ConnectionSignal::Closed(cause));
    }

    pub fn error(&self, err: ConnectionError) {
        self.send(ConnectionSignal::Error(err));
    }

    pub fn heartbeat(&self) {
        self.send(ConnectionSignal::Heartbeat);
    }
}
