//! Record transformation into wire messages.
//!
//! [`RecordTransformer`] turns an inbound [`LogRecord`] into the JSON payload
//! published to the exchange plus the routing key it is published under. The
//! transformer is pure: it owns the record only for the duration of the call
//! and performs no I/O.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    formatter::SharedFormatter,
    level::{level_text, map_level},
    log_record::{
        LEVEL_FIELD, LogRecord, MESSAGE_FIELD, ROUTING_KEY_FIELD, TIME_FIELD, VERSION_FIELD,
    },
};

/// Nesting depth beyond which containers are replaced by [`CIRCULAR_MARKER`].
pub const MAX_PAYLOAD_DEPTH: usize = 64;
/// Marker substituted for containers nested deeper than [`MAX_PAYLOAD_DEPTH`].
pub const CIRCULAR_MARKER: &str = "[Circular]";

/// Errors raised while transforming a record.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The serialized form of the record is not valid JSON.
    #[error("failed to parse log record: {0}")]
    Parse(#[source] serde_json::Error),
    /// The record is valid JSON but not an object.
    #[error("log record must be a JSON object")]
    NotAnObject,
    /// A field every record must carry is absent.
    #[error("log record is missing required field `{0}`")]
    MissingField(&'static str),
    /// The `time` field could not be read as an ISO-8601 timestamp.
    #[error("invalid log record timestamp: {0}")]
    InvalidTimestamp(String),
    /// The wire message could not be serialized.
    #[error("failed to serialise wire message: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Static inputs applied to every record.
#[derive(Clone, Debug)]
pub struct TransformConfig {
    pub tags: Vec<String>,
    pub server: String,
    pub application: String,
    pub pid: u32,
    pub message_type: Option<String>,
    /// Routing key configured on the exchange, used when a record has no
    /// override of its own.
    pub routing_key: Option<String>,
    pub formatter: Option<SharedFormatter>,
}

/// Output of a successful transformation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformedMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Converts log records into routable wire messages.
#[derive(Clone, Debug)]
pub struct RecordTransformer {
    config: TransformConfig,
}

impl RecordTransformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Transform `record` into a wire message.
    ///
    /// Returns `Ok(None)` when a configured formatter suppresses the record;
    /// the caller must then neither publish nor buffer anything.
    pub fn transform(
        &self,
        record: LogRecord,
    ) -> Result<Option<TransformedMessage>, TransformError> {
        let mut extra = record.into_fields();
        let time = extra
            .remove(TIME_FIELD)
            .ok_or(TransformError::MissingField(TIME_FIELD))?;
        let timestamp = parse_timestamp(&time)?;
        let message = extra
            .remove(MESSAGE_FIELD)
            .ok_or(TransformError::MissingField(MESSAGE_FIELD))?;
        let raw_level = extra
            .remove(LEVEL_FIELD)
            .ok_or(TransformError::MissingField(LEVEL_FIELD))?;
        extra.remove(VERSION_FIELD);

        let level = map_level(&raw_level);
        let mut wire = self.base_fields(timestamp, message, level.clone());
        for (key, value) in extra {
            wire.entry(key).or_insert(value);
        }
        wire.insert("pid".into(), Value::from(self.config.pid));

        let mut wire = match &self.config.formatter {
            Some(formatter) => match formatter.format(wire) {
                Some(formatted) => formatted,
                None => return Ok(None),
            },
            None => wire,
        };

        let routing_key = take_routing_key(&mut wire)
            .or_else(|| {
                self.config
                    .routing_key
                    .clone()
                    .filter(|key| !key.is_empty())
            })
            .unwrap_or_else(|| level_text(&level));

        let payload = serde_json::to_vec(&cap_depth(Value::Object(wire), 0))
            .map_err(TransformError::Serialize)?;
        Ok(Some(TransformedMessage {
            routing_key,
            payload,
        }))
    }

    fn base_fields(&self, timestamp: String, message: Value, level: Value) -> Map<String, Value> {
        let mut base = Map::new();
        base.insert("@timestamp".into(), Value::String(timestamp));
        base.insert("message".into(), message);
        base.insert(
            "tags".into(),
            Value::Array(
                self.config
                    .tags
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        base.insert(
            "source".into(),
            Value::String(format!(
                "{}/{}",
                self.config.server, self.config.application
            )),
        );
        base.insert("level".into(), level);
        if let Some(message_type) = &self.config.message_type {
            base.insert("type".into(), Value::String(message_type.clone()));
        }
        base
    }
}

fn parse_timestamp(value: &Value) -> Result<String, TransformError> {
    let text = value
        .as_str()
        .ok_or_else(|| TransformError::InvalidTimestamp(value.to_string()))?;
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|err| TransformError::InvalidTimestamp(format!("{text:?}: {err}")))?;
    Ok(parsed
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Remove the routing key override from the message, returning it when it
/// is a non-empty string.
fn take_routing_key(wire: &mut Map<String, Value>) -> Option<String> {
    match wire.remove(ROUTING_KEY_FIELD)? {
        Value::String(key) if !key.is_empty() => Some(key),
        _ => None,
    }
}

fn cap_depth(value: Value, depth: usize) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) if depth >= MAX_PAYLOAD_DEPTH => {
            Value::String(CIRCULAR_MARKER.into())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, nested)| (key, cap_depth(nested, depth + 1)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|nested| cap_depth(nested, depth + 1))
                .collect(),
        ),
        scalar => scalar,
    }
}
