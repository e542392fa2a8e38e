//! Boundary to the external broker connection.
//!
//! The AMQP wire protocol, heartbeat negotiation and TLS handshakes live in
//! an external connection library. This module defines the traits such a
//! library is adapted to:
//!
//! - [`BrokerConnector`] establishes a connection and wires it to a
//!   [`SignalSink`] for lifecycle notifications.
//! - [`BrokerConnection`] declares exchanges, reconnects and closes.
//! - [`Exchange`] publishes messages and reports each outcome through a
//!   completion callback.
//!
//! With the `test-util` feature an in-memory implementation is available in
//! [`memory`].

mod error;
mod options;
mod signal;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use thiserror::Error;

pub use error::{ConnectionError, PublishError};
pub use options::{ConnectionOptions, DeliveryMode, ExchangeProperties, PublishOptions, TlsOptions};
pub use signal::{ConnectionSignal, SignalSink};

/// Completion invoked exactly once when a publish attempt settles.
pub type PublishCallback = Box<dyn FnOnce(Result<(), PublishError>) + Send>;

/// Returned synchronously by [`Exchange::publish`] when the exchange can no
/// longer accept messages. The completion callback is dropped uncalled.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("exchange is closed")]
pub struct ExchangeClosed;

/// A declared exchange that accepts publishes.
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Publish `payload` under `routing_key`.
    ///
    /// On `Ok(())` the implementation must eventually invoke `done`, on any
    /// thread.
    fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        options: PublishOptions,
        done: PublishCallback,
    ) -> Result<(), ExchangeClosed>;
}

/// An established (or establishing) broker connection.
pub trait BrokerConnection: Send {
    /// Request the exchange; completion is reported with
    /// [`ConnectionSignal::ExchangeOpened`] or [`ConnectionSignal::Error`].
    fn open_exchange(&mut self, name: &str, properties: &ExchangeProperties);

    /// Re-establish the connection after a transient drop; completion is
    /// reported with [`ConnectionSignal::Ready`].
    fn reconnect(&mut self);

    /// Close the connection without further signals.
    fn close(&mut self);
}

/// Factory for broker connections.
pub trait BrokerConnector: Send {
    /// Start connecting. Readiness is reported asynchronously through
    /// `signals`; an `Err` means the attempt could not even be started.
    fn connect(
        &self,
        options: &ConnectionOptions,
        signals: SignalSink,
    ) -> Result<Box<dyn BrokerConnection>, ConnectionError>;
}
