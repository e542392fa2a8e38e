//! Public stream type exported by the crate.

use std::{sync::Arc, thread, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    broker::{BrokerConnector, PublishOptions, SignalSink},
    builder::{AmqpStreamBuilder, BuildError},
    config::AmqpStreamConfig,
    connection::{ConnectionManager, ConnectionState, StateCell},
    events::{EventHub, StreamEvent},
    level::Severity,
    log_record::RecordInput,
    rate_limited_warner::RateLimitedWarner,
    transform::{RecordTransformer, TransformError},
};

use super::{
    buffered::{BufferedMessage, BufferedPublisher},
    stats::{StatsSnapshot, StreamStats},
    worker::{StreamCommand, WorkerParts, enqueue_message, flush_queue, spawn_worker},
};

/// Log sink publishing JSON records to an AMQP exchange.
///
/// Records are transformed on the calling thread and handed to a worker that
/// owns the broker connection. While the exchange is unavailable the worker
/// keeps the most recent records in a bounded ring buffer and publishes them,
/// oldest first, as soon as the exchange opens again.
pub struct AmqpStream {
    tx: Option<Sender<StreamCommand>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    transformer: RecordTransformer,
    level: Severity,
    events: Arc<EventHub>,
    stats: Arc<StreamStats>,
    state: Arc<StateCell>,
    warner: RateLimitedWarner,
    flush_timeout: Duration,
}

impl AmqpStream {
    pub fn builder() -> AmqpStreamBuilder {
        AmqpStreamBuilder::new()
    }

    /// Start a stream from resolved configuration.
    ///
    /// Observers already subscribed to `events` see every event, including
    /// the first `connect`.
    pub(crate) fn with_config(
        config: AmqpStreamConfig,
        connector: Box<dyn BrokerConnector>,
        events: Arc<EventHub>,
    ) -> Result<Self, BuildError> {
        let stats = Arc::new(StreamStats::default());
        let state = Arc::new(StateCell::default());

        let default_routing_key = config.exchange.routing_key.clone().unwrap_or_default();
        // Connection settings were validated by `build_config`.
        let mut connection = ConnectionManager::new(
            connector,
            config.exchange.clone(),
            Arc::clone(&events),
            Arc::clone(&state),
        )
        .with_validated_options(config.connection.clone());
        connection.set_reconnect_policy(config.reconnect, config.backoff);

        let publisher = BufferedPublisher::new(
            config.buffer_size,
            PublishOptions {
                delivery_mode: config.delivery_mode,
            },
            default_routing_key,
            Arc::clone(&events),
            Arc::clone(&stats),
            config.warn_interval,
        );
        let (sink, signals) = SignalSink::channel();
        let (tx, handle) = spawn_worker(
            WorkerParts {
                connection,
                publisher,
                sink,
                signals,
            },
            config.queue_capacity,
        )?;
        debug!(
            "AmqpStream started for exchange `{}` on {}:{}",
            config.exchange.name, config.connection.host, config.connection.port
        );
        Ok(Self {
            tx: Some(tx),
            handle: Mutex::new(Some(handle)),
            transformer: RecordTransformer::new(config.transform),
            level: config.level,
            events,
            stats,
            state,
            warner: RateLimitedWarner::new(config.warn_interval),
            flush_timeout: config.flush_timeout,
        })
    }

    /// Write one record.
    ///
    /// Transformation errors are returned to the caller and nothing is
    /// queued. Every record is accepted regardless of its severity; records
    /// suppressed by the formatter are skipped silently. Delivery itself is
    /// asynchronous and never reported here.
    pub fn write(&self, input: impl Into<RecordInput>) -> Result<(), TransformError> {
        let record = input.into().into_record()?;
        let Some(message) = self.transformer.transform(record)? else {
            self.stats.record_suppressed();
            return Ok(());
        };
        let message = BufferedMessage::new(message.routing_key, message.payload);
        match self.tx.as_ref() {
            Some(tx) => enqueue_message(tx, message, &self.warner, &self.stats),
            None => {
                self.stats.record_queue_drop();
                self.warner.record_drop();
                self.warner.warn_if_due(|count| {
                    warn!("AmqpStream dropped {count} records after close");
                });
            }
        }
        Ok(())
    }

    /// Write a serialized JSON record.
    pub fn write_str(&self, raw: &str) -> Result<(), TransformError> {
        self.write(raw)
    }

    /// Register an observer. Only events emitted afterwards are delivered.
    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Level the stream was registered with.
    ///
    /// Filtering by severity belongs to the logging front-end; `write`
    /// accepts records of any level.
    pub fn level(&self) -> Severity {
        self.level
    }

    /// Wait until the worker has processed every record written so far.
    ///
    /// Returns `false` once the stream is closed or when the worker does not
    /// acknowledge within the flush timeout.
    pub fn flush(&self) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        self.warner.flush(|count| {
            warn!("AmqpStream dropped {count} records in the last interval");
        });
        flush_queue(tx, self.flush_timeout)
    }

    /// Close the connection and wait for the worker to exit.
    ///
    /// Records still buffered are discarded.
    pub fn close(&mut self) {
        self.request_shutdown();
        self.join_worker();
    }

    fn request_shutdown(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if tx.send(StreamCommand::Shutdown(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.recv_timeout(self.flush_timeout);
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("AmqpStream worker thread panicked");
        }
    }
}

impl Drop for AmqpStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AmqpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpStream")
            .field("state", &self.state.load())
            .field("level", &self.level)
            .field("closed", &self.tx.is_none())
            .finish()
    }
}
