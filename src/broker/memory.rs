//! In-memory broker for exercising streams without a real connection.
//!
//! [`MemoryBroker`] implements [`BrokerConnector`] and records every
//! connection attempt, exchange declaration and publish. Tests drive the
//! connection lifecycle explicitly (`ready`, `close_implicitly`,
//! `close_with`, ...) and inspect what reached the "wire".

use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    BrokerConnection, BrokerConnector, ConnectionError, ConnectionOptions, ConnectionSignal,
    DeliveryMode, Exchange, ExchangeClosed, ExchangeProperties, PublishCallback, PublishError,
    PublishOptions, SignalSink,
};

/// A message accepted by a [`MemoryBroker`] exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub delivery_mode: DeliveryMode,
}

impl PublishedMessage {
    /// Payload decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Default)]
struct BrokerState {
    sink: Option<SignalSink>,
    pending: Vec<ConnectionSignal>,
    last_options: Option<ConnectionOptions>,
    connect_attempts: usize,
    reconnects: usize,
    closes: usize,
    exchange_requests: Vec<(String, ExchangeProperties)>,
    published: Vec<PublishedMessage>,
    refuse_with: Option<ConnectionError>,
    publish_failure: Option<String>,
    auto_ready: bool,
    hold_exchange: bool,
    generation: u64,
    exchange_live: bool,
}

/// Scriptable broker double.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report readiness as soon as a connection (or reconnection) starts.
    pub fn with_auto_ready(self) -> Self {
        self.state.lock().auto_ready = true;
        self
    }

    /// Do not answer exchange requests until [`open_held_exchange`](Self::open_held_exchange).
    pub fn with_held_exchange(self) -> Self {
        self.state.lock().hold_exchange = true;
        self
    }

    fn signal(&self, signal: ConnectionSignal) {
        let mut state = self.state.lock();
        match &state.sink {
            Some(sink) => sink.send(signal),
            None => state.pending.push(signal),
        }
    }

    /// Complete the pending connection attempt.
    pub fn ready(&self) {
        self.signal(ConnectionSignal::Ready);
    }

    /// Declare the most recently requested exchange.
    pub fn open_held_exchange(&self) {
        let exchange = {
            let mut state = self.state.lock();
            let Some((name, _)) = state.exchange_requests.last().cloned() else {
                return;
            };
            self.activate_exchange(&mut state, name)
        };
        self.signal(ConnectionSignal::ExchangeOpened(exchange));
    }

    fn activate_exchange(&self, state: &mut BrokerState, name: String) -> Arc<dyn Exchange> {
        state.generation += 1;
        state.exchange_live = true;
        Arc::new(MemoryExchange {
            name,
            generation: state.generation,
            broker: self.clone(),
        })
    }

    /// Drop the connection without a cause (idle or heartbeat loss).
    pub fn close_implicitly(&self) {
        self.state.lock().exchange_live = false;
        self.signal(ConnectionSignal::Closed(None));
    }

    /// Close the connection with an explicit cause.
    pub fn close_with(&self, cause: ConnectionError) {
        self.state.lock().exchange_live = false;
        self.signal(ConnectionSignal::Closed(Some(cause)));
    }

    /// Invalidate exchange handles without telling the stream.
    pub fn revoke_exchange(&self) {
        self.state.lock().exchange_live = false;
    }

    pub fn heartbeat(&self) {
        self.signal(ConnectionSignal::Heartbeat);
    }

    pub fn raise_error(&self, err: ConnectionError) {
        self.signal(ConnectionSignal::Error(err));
    }

    /// Make subsequent `connect` calls fail synchronously.
    pub fn refuse_connections(&self, err: Option<ConnectionError>) {
        self.state.lock().refuse_with = err;
    }

    /// Make subsequent publishes complete with an error.
    pub fn fail_publishes(&self, reason: Option<&str>) {
        self.state.lock().publish_failure = reason.map(str::to_owned);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn reconnects(&self) -> usize {
        self.state.lock().reconnects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn exchange_requests(&self) -> Vec<(String, ExchangeProperties)> {
        self.state.lock().exchange_requests.clone()
    }

    pub fn last_options(&self) -> Option<ConnectionOptions> {
        self.state.lock().last_options.clone()
    }
}

impl BrokerConnector for MemoryBroker {
    fn connect(
        &self,
        options: &ConnectionOptions,
        signals: SignalSink,
    ) -> Result<Box<dyn BrokerConnection>, ConnectionError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        state.last_options = Some(options.clone());
        if let Some(err) = state.refuse_with.clone() {
            return Err(err);
        }
        for signal in state.pending.drain(..) {
            signals.send(signal);
        }
        if state.auto_ready {
            signals.ready();
        }
        state.sink = Some(signals);
        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
}

impl BrokerConnection for MemoryConnection {
    fn open_exchange(&mut self, name: &str, properties: &ExchangeProperties) {
        let exchange = {
            let mut state = self.broker.state.lock();
            state
                .exchange_requests
                .push((name.to_owned(), *properties));
            if state.hold_exchange {
                return;
            }
            self.broker.activate_exchange(&mut state, name.to_owned())
        };
        self.broker
            .signal(ConnectionSignal::ExchangeOpened(exchange));
    }

    fn reconnect(&mut self) {
        let auto_ready = {
            let mut state = self.broker.state.lock();
            state.reconnects += 1;
            state.auto_ready
        };
        if auto_ready {
            self.broker.ready();
        }
    }

    fn close(&mut self) {
        let mut state = self.broker.state.lock();
        state.closes += 1;
        state.exchange_live = false;
    }
}

struct MemoryExchange {
    name: String,
    generation: u64,
    broker: MemoryBroker,
}

impl Exchange for MemoryExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        options: PublishOptions,
        done: PublishCallback,
    ) -> Result<(), ExchangeClosed> {
        let outcome = {
            let mut state = self.broker.state.lock();
            if !state.exchange_live || state.generation != self.generation {
                return Err(ExchangeClosed);
            }
            state.published.push(PublishedMessage {
                exchange: self.name.clone(),
                routing_key: routing_key.to_owned(),
                payload: payload.to_vec(),
                delivery_mode: options.delivery_mode,
            });
            match &state.publish_failure {
                Some(reason) => Err(PublishError::new(routing_key, reason.clone())),
                None => Ok(()),
            }
        };
        done(outcome);
        Ok(())
    }
}
