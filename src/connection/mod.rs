//! Broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the external connection and the exchange handle
//! and folds the connection layer's [`ConnectionSignal`]s into a three-state
//! machine:
//!
//! ```text
//!                start / reconnect              exchange opened
//!  Disconnected ─────────────────▶ Connecting ──────────────────▶ Connected
//!       ▲                            ▲   │                           │
//!       │         error while        │   └──── implicit close ◀──────┤
//!       ├──────── connecting ────────┘         (reconnect)           │
//!       └──────────────────── explicit close ◀───────────────────────┘
//! ```
//!
//! Every transition is driven by a discrete signal processed on the stream
//! worker; nothing else mutates the state.

pub(crate) mod backoff;


use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    broker::{
        BrokerConnection, BrokerConnector, ConnectionError, ConnectionOptions, ConnectionSignal,
        Exchange, ExchangeProperties, SignalSink,
    },
    builder::BuildError,
    events::{EventHub, StreamEvent},
};

pub use backoff::BackoffPolicy;
use backoff::BackoffState;

/// Heartbeat intervals above this are accepted but discouraged.
pub const MAX_RECOMMENDED_HEARTBEAT: Duration = Duration::from_secs(60);

/// Connectivity as seen by the publisher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Lock-free mirror of the manager's state, readable from any thread.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// How the manager reacts to a connection dropping without a cause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Ask the connection to reconnect straight away.
    #[default]
    Immediate,
    /// Wait for a jittered exponential delay before reconnecting.
    Backoff,
}

/// Name and properties of the exchange messages are published to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeSettings {
    pub name: String,
    pub routing_key: Option<String>,
    pub properties: ExchangeProperties,
}

/// Outcome of a signal that the owner of the manager must act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The exchange became available; drain buffered messages now.
    Connected,
    /// Call [`ConnectionManager::retry`] once the delay has elapsed.
    RetryAfter(Duration),
}

/// Validate connection settings before they are handed to a connector.
pub fn validate_options(options: &ConnectionOptions) -> Result<(), BuildError> {
    if options.host.trim().is_empty() {
        return Err(BuildError::InvalidConfig("host must not be empty".into()));
    }
    if options.port == 0 {
        return Err(BuildError::InvalidConfig(
            "port must be greater than zero".into(),
        ));
    }
    if options.vhost.is_empty() {
        return Err(BuildError::InvalidConfig("vhost must not be empty".into()));
    }
    if options.heartbeat.is_zero() {
        return Err(BuildError::InvalidConfig(
            "heartbeat must be greater than zero".into(),
        ));
    }
    if options.heartbeat > MAX_RECOMMENDED_HEARTBEAT {
        warn!(
            "AmqpStream heartbeat of {}s exceeds the recommended maximum of {}s",
            options.heartbeat.as_secs(),
            MAX_RECOMMENDED_HEARTBEAT.as_secs()
        );
    }
    if let Some(tls) = &options.tls
        && tls.cert.is_some() != tls.key.is_some()
    {
        return Err(BuildError::InvalidConfig(
            "tls cert and key must be configured together".into(),
        ));
    }
    Ok(())
}

/// Owner of the broker connection and exchange handle.
pub struct ConnectionManager {
    connector: Box<dyn BrokerConnector>,
    options: ConnectionOptions,
    exchange_settings: ExchangeSettings,
    policy: ReconnectPolicy,
    backoff: BackoffState,
    state: ConnectionState,
    shared_state: Arc<StateCell>,
    connection: Option<Box<dyn BrokerConnection>>,
    exchange: Option<Arc<dyn Exchange>>,
    events: Arc<EventHub>,
}

impl ConnectionManager {
    pub fn new(
        connector: Box<dyn BrokerConnector>,
        exchange_settings: ExchangeSettings,
        events: Arc<EventHub>,
        shared_state: Arc<StateCell>,
    ) -> Self {
        shared_state.store(ConnectionState::Disconnected);
        Self {
            connector,
            options: ConnectionOptions::default(),
            exchange_settings,
            policy: ReconnectPolicy::default(),
            backoff: BackoffState::new(BackoffPolicy::default()),
            state: ConnectionState::Disconnected,
            shared_state,
            connection: None,
            exchange: None,
            events,
        }
    }

    /// Validate and store connection settings used by the next `start`.
    pub fn configure(&mut self, options: ConnectionOptions) -> Result<(), BuildError> {
        validate_options(&options)?;
        self.options = options;
        Ok(())
    }

    /// Use settings that already passed [`validate_options`].
    pub(crate) fn with_validated_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_reconnect_policy(&mut self, policy: ReconnectPolicy, backoff: BackoffPolicy) {
        self.policy = policy;
        self.backoff = BackoffState::new(backoff);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The live exchange, present only while connected.
    pub fn exchange(&self) -> Option<&dyn Exchange> {
        match self.state {
            ConnectionState::Connected => self.exchange.as_deref(),
            _ => None,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("AmqpStream connection {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.shared_state.store(state);
    }

    /// Begin a connection attempt.
    ///
    /// Failures are reported through the `error` event and a retry is
    /// scheduled with backoff. Past the policy deadline retries continue at
    /// the maximum delay, each one reported as an `error` event.
    pub fn start(&mut self, signals: &SignalSink) -> Option<Transition> {
        self.set_state(ConnectionState::Connecting);
        match self.connector.connect(&self.options, signals.clone()) {
            Ok(connection) => {
                self.connection = Some(connection);
                None
            }
            Err(err) => {
                warn!(
                    "AmqpStream failed to connect to {}:{}: {err}",
                    self.options.host, self.options.port
                );
                self.set_state(ConnectionState::Disconnected);
                self.events.emit(StreamEvent::Error(err));
                self.schedule_retry()
            }
        }
    }

    /// Retry after a scheduled delay: reconnect an existing connection or
    /// start a fresh one.
    pub fn retry(&mut self, signals: &SignalSink) -> Option<Transition> {
        match self.connection.as_mut() {
            Some(connection) => {
                self.state = ConnectionState::Connecting;
                self.shared_state.store(ConnectionState::Connecting);
                connection.reconnect();
                None
            }
            None => self.start(signals),
        }
    }

    fn schedule_retry(&mut self) -> Option<Transition> {
        if let Some(delay) = self.backoff.next_delay(Instant::now()) {
            return Some(Transition::RetryAfter(delay));
        }
        let (deadline, cap) = {
            let policy = self.backoff.policy();
            (policy.deadline, policy.cap)
        };
        warn!(
            "AmqpStream not reconnected within {}s; retrying every {}ms",
            deadline.as_secs(),
            cap.as_millis()
        );
        self.set_state(ConnectionState::Disconnected);
        self.events
            .emit(StreamEvent::Error(ConnectionError::RetryDeadline(deadline)));
        Some(Transition::RetryAfter(cap))
    }

    /// Apply a lifecycle signal from the connection layer.
    pub fn handle_signal(&mut self, signal: ConnectionSignal) -> Option<Transition> {
        match signal {
            ConnectionSignal::Ready => {
                self.set_state(ConnectionState::Connecting);
                let settings = &self.exchange_settings;
                if let Some(connection) = self.connection.as_mut() {
                    connection.open_exchange(&settings.name, &settings.properties);
                }
                None
            }
            ConnectionSignal::ExchangeOpened(exchange) => {
                self.exchange = Some(exchange);
                self.set_state(ConnectionState::Connected);
                self.backoff.record_connected(Instant::now());
                self.events.emit(StreamEvent::Connect);
                Some(Transition::Connected)
            }
            ConnectionSignal::Closed(Some(cause)) => {
                debug!("AmqpStream connection closed: {cause}");
                self.drop_exchange();
                self.set_state(ConnectionState::Disconnected);
                self.events.emit(StreamEvent::Close);
                None
            }
            ConnectionSignal::Closed(None) => {
                self.drop_exchange();
                self.set_state(ConnectionState::Connecting);
                self.reconnect_after_drop()
            }
            ConnectionSignal::Error(err) => {
                if self.state == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Disconnected);
                }
                self.events.emit(StreamEvent::Error(err));
                None
            }
            ConnectionSignal::Heartbeat => {
                self.events.emit(StreamEvent::Heartbeat);
                None
            }
        }
    }

    fn drop_exchange(&mut self) {
        if self.exchange.take().is_some() {
            self.backoff.record_lost(Instant::now());
        }
    }

    fn reconnect_after_drop(&mut self) -> Option<Transition> {
        match self.policy {
            ReconnectPolicy::Immediate => {
                match self.connection.as_mut() {
                    Some(connection) => connection.reconnect(),
                    None => {
                        self.set_state(ConnectionState::Disconnected);
                        self.events.emit(StreamEvent::Error(ConnectionError::Other(
                            "connection dropped before it was established".into(),
                        )));
                    }
                }
                None
            }
            ReconnectPolicy::Backoff => self.schedule_retry(),
        }
    }

    /// Close the connection and forget the exchange.
    pub fn shutdown(&mut self) {
        self.exchange = None;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("exchange", &self.exchange_settings.name)
            .field("policy", &self.policy)
            .finish()
    }
}
