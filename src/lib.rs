//! Structured log stream publishing JSON records to an AMQP exchange.
//!
//! [`AmqpStream`] accepts bunyan-style records, reshapes them into routed
//! wire messages and publishes them through a [`broker::BrokerConnector`].
//! While the exchange is unavailable the most recent records are kept in a
//! bounded ring buffer and published in order once it opens again.

pub mod broker;
pub mod builder;
pub mod config;
pub mod connection;
pub mod events;
pub mod file_config;
pub mod formatter;
pub mod level;
pub mod log_record;
pub mod publisher;
pub mod rate_limited_warner;
pub mod ring_buffer;
pub mod transform;

pub use broker::{
    BrokerConnection, BrokerConnector, ConnectionError, ConnectionOptions, ConnectionSignal,
    DeliveryMode, Exchange, ExchangeClosed, ExchangeProperties, PublishCallback, PublishError,
    PublishOptions, SignalSink, TlsOptions,
};
pub use builder::{AmqpStreamBuilder, BackoffOverrides, BuildError};
pub use config::{AmqpOptions, AmqpStreamConfig};
pub use connection::{ConnectionState, ReconnectPolicy};
pub use events::StreamEvent;
pub use file_config::{ConfigFileError, load_options};
pub use formatter::{MessageFormatter, SharedFormatter};
pub use level::Severity;
pub use log_record::{LogRecord, RecordInput};
pub use publisher::{AmqpStream, StatsSnapshot};
pub use ring_buffer::RingBuffer;
pub use transform::{RecordTransformer, TransformConfig, TransformError, TransformedMessage};
