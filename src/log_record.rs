//! Inbound log record representation.
//!
//! Records arrive either as serialized JSON (the raw form written by a
//! logging front-end) or as an already structured object. Both forms end up
//! as a [`LogRecord`]: an owned JSON object whose well-known keys (`time`,
//! `msg`, `level`, `v` and the optional `routingKey` override) are consumed by
//! the transformer while every other key travels through as an extra field.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::level::Severity;
use crate::transform::TransformError;

/// Key holding the record timestamp.
pub const TIME_FIELD: &str = "time";
/// Key holding the record message text.
pub const MESSAGE_FIELD: &str = "msg";
/// Key holding the numeric severity.
pub const LEVEL_FIELD: &str = "level";
/// Key holding the producer's record format version.
pub const VERSION_FIELD: &str = "v";
/// Key holding an explicit per-record routing key.
pub const ROUTING_KEY_FIELD: &str = "routingKey";

/// A structured log record.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    fields: Map<String, Value>,
}

impl LogRecord {
    /// Construct a record stamped with the current time.
    pub fn new(level: Severity, message: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(VERSION_FIELD.into(), Value::from(0));
        fields.insert(LEVEL_FIELD.into(), Value::from(level.as_u64()));
        fields.insert(MESSAGE_FIELD.into(), Value::from(message));
        let mut record = Self { fields };
        record.set_time(Utc::now());
        record
    }

    /// Wrap an existing JSON object.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Interpret a JSON value as a record; only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self, TransformError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(TransformError::NotAnObject),
        }
    }

    /// Parse the serialized form of a record.
    pub fn parse(text: &str) -> Result<Self, TransformError> {
        let value: Value = serde_json::from_str(text).map_err(TransformError::Parse)?;
        Self::from_value(value)
    }

    /// Parse the serialized form of a record from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransformError> {
        let value: Value = serde_json::from_slice(bytes).map_err(TransformError::Parse)?;
        Self::from_value(value)
    }

    /// Attach an extra field, replacing any previous value under `key`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Override the routing key used for this record only.
    pub fn with_routing_key(self, routing_key: impl Into<String>) -> Self {
        self.with_field(ROUTING_KEY_FIELD, routing_key.into())
    }

    /// Replace the record timestamp.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.set_time(time);
        self
    }

    fn set_time(&mut self, time: DateTime<Utc>) {
        self.fields.insert(
            TIME_FIELD.into(),
            Value::String(time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }

    /// Raw severity value as supplied by the producer.
    pub fn level(&self) -> Option<&Value> {
        self.fields.get(LEVEL_FIELD)
    }

    /// Numeric severity, if the record carries one.
    pub fn level_number(&self) -> Option<u64> {
        self.level().and_then(Value::as_u64)
    }

    /// Message text, if present and textual.
    pub fn message(&self) -> Option<&str> {
        self.fields.get(MESSAGE_FIELD).and_then(Value::as_str)
    }

    /// Borrow all fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Take ownership of all fields.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self
            .level()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".into());
        write!(f, "{} - {}", level, self.message().unwrap_or_default())
    }
}

/// The two shapes a front-end may hand to the stream.
#[derive(Clone, Debug)]
pub enum RecordInput {
    /// Serialized JSON text.
    Raw(String),
    /// Serialized JSON bytes.
    Bytes(Vec<u8>),
    /// Already structured record.
    Structured(LogRecord),
}

impl RecordInput {
    /// Resolve the input into a structured record, parsing if required.
    pub fn into_record(self) -> Result<LogRecord, TransformError> {
        match self {
            RecordInput::Raw(text) => LogRecord::parse(&text),
            RecordInput::Bytes(bytes) => LogRecord::from_slice(&bytes),
            RecordInput::Structured(record) => Ok(record),
        }
    }
}

impl From<&str> for RecordInput {
    fn from(value: &str) -> Self {
        RecordInput::Raw(value.to_owned())
    }
}

impl From<String> for RecordInput {
    fn from(value: String) -> Self {
        RecordInput::Raw(value)
    }
}

impl From<Vec<u8>> for RecordInput {
    fn from(value: Vec<u8>) -> Self {
        RecordInput::Bytes(value)
    }
}

impl From<LogRecord> for RecordInput {
    fn from(value: LogRecord) -> Self {
        RecordInput::Structured(value)
    }
}

impl From<Map<String, Value>> for RecordInput {
    fn from(value: Map<String, Value>) -> Self {
        RecordInput::Structured(LogRecord::from_map(value))
    }
}
