//! Fixtures pairing an [`AmqpStream`] with the [`MemoryBroker`] behind it so
//! integration tests can drive the connection lifecycle and inspect what was
//! published.

use std::time::{Duration, Instant};

use amqp_log_stream::{
    AmqpStream, AmqpStreamBuilder, StreamEvent, broker::memory::MemoryBroker,
};
use crossbeam_channel::Receiver;
use rstest::fixture;
use serde_json::Value;

/// A running stream, its broker and an observer registered before start.
pub struct StreamRig {
    pub broker: MemoryBroker,
    pub stream: AmqpStream,
    pub events: Receiver<StreamEvent>,
}

impl StreamRig {
    /// Build a stream from `builder`, wiring in a fresh broker.
    pub fn with_builder(builder: AmqpStreamBuilder) -> Self {
        Self::with_broker(MemoryBroker::new(), builder)
    }

    pub fn with_broker(broker: MemoryBroker, builder: AmqpStreamBuilder) -> Self {
        let (stream, events) = builder
            .with_connector(broker.clone())
            .with_server("test-host")
            .with_application("test-app")
            .with_pid(4242)
            .build_subscribed()
            .expect("stream builds");
        Self {
            broker,
            stream,
            events,
        }
    }

    /// Complete the pending connection and wait for the worker to apply it.
    pub fn connect(&self) {
        self.broker.ready();
        assert!(self.stream.flush(), "worker acknowledged flush");
    }

    pub fn sync(&self) {
        assert!(self.stream.flush(), "worker acknowledged flush");
    }

    /// Drain every event observed so far.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.try_iter().collect()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(StreamEvent::name).collect()
    }
}

/// Default rig: buffer of 100, exchange `logs`, no routing key.
#[fixture]
pub fn rig() -> StreamRig {
    StreamRig::with_builder(AmqpStreamBuilder::new().with_exchange("logs"))
}

/// Parsed JSON payloads published to `broker`, in publish order.
pub fn published_messages(broker: &MemoryBroker) -> Vec<Value> {
    broker
        .published()
        .iter()
        .map(|message| serde_json::from_slice(&message.payload).expect("payload is JSON"))
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
