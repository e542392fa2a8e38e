//! Stream configuration.
//!
//! [`AmqpOptions`] is the serde-facing option object, using the camelCase
//! keys accepted by JSON and INI sources. [`AmqpStreamConfig`] is the fully
//! resolved form the stream runs with; it is produced by
//! [`AmqpStreamBuilder`](crate::builder::AmqpStreamBuilder).

use std::{fs, path::PathBuf, time::Duration};

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    broker::{ConnectionOptions, DeliveryMode},
    builder::BuildError,
    connection::{BackoffPolicy, ExchangeSettings, ReconnectPolicy},
    events::DEFAULT_EVENT_CAPACITY,
    level::Severity,
    rate_limited_warner::DEFAULT_WARN_INTERVAL,
    transform::TransformConfig,
};

/// Default ring buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 100;
/// Default worker command queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Largest accepted command queue capacity; the queue is allocated up front.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;
/// Default bound on `flush` and `close` waits.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(1000);
/// Tags attached when none are configured.
pub const DEFAULT_TAGS: &[&str] = &["bunyan"];

/// Host name reported as the message `source` unless overridden.
pub static LOCAL_HOSTNAME: Lazy<String> = Lazy::new(|| {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_owned())
});

/// Name of the running executable, used as the default application.
pub static PROCESS_NAME: Lazy<String> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
});

/// Fully resolved stream settings.
#[derive(Clone, Debug)]
pub struct AmqpStreamConfig {
    pub connection: ConnectionOptions,
    pub exchange: ExchangeSettings,
    pub transform: TransformConfig,
    /// Records below this severity are skipped.
    pub level: Severity,
    pub buffer_size: usize,
    pub delivery_mode: DeliveryMode,
    pub queue_capacity: usize,
    pub flush_timeout: Duration,
    pub warn_interval: Duration,
    pub event_capacity: usize,
    pub reconnect: ReconnectPolicy,
    pub backoff: BackoffPolicy,
}

impl Default for AmqpStreamConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            exchange: ExchangeSettings {
                name: String::new(),
                routing_key: None,
                properties: Default::default(),
            },
            transform: TransformConfig {
                tags: DEFAULT_TAGS.iter().map(|t| (*t).to_owned()).collect(),
                server: LOCAL_HOSTNAME.clone(),
                application: PROCESS_NAME.clone(),
                pid: std::process::id(),
                message_type: None,
                routing_key: None,
                formatter: None,
            },
            level: Severity::Info,
            buffer_size: DEFAULT_BUFFER_SIZE,
            delivery_mode: DeliveryMode::Persistent,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            warn_interval: DEFAULT_WARN_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reconnect: ReconnectPolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Stream level given either by name (`"warn"`) or by number (`40`).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LevelOption {
    Number(u64),
    Name(String),
}

impl LevelOption {
    pub fn resolve(&self) -> Result<Severity, BuildError> {
        match self {
            LevelOption::Number(n) => Severity::from_u64(*n),
            LevelOption::Name(name) => name.parse().ok(),
        }
        .ok_or_else(|| BuildError::InvalidConfig(format!("unknown level {self}")))
    }
}

impl std::fmt::Display for LevelOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelOption::Number(n) => write!(f, "{n}"),
            LevelOption::Name(name) => write!(f, "`{name}`"),
        }
    }
}

/// Exchange given by name only or as a full declaration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExchangeOption {
    Name(String),
    Declared(ExchangeOptions),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOptions {
    pub name: Option<String>,
    pub routing_key: Option<String>,
    pub properties: Option<ExchangePropertyOptions>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePropertyOptions {
    pub durable: Option<bool>,
    pub auto_delete: Option<bool>,
}

/// Deserializable stream options. Unset fields take their documented default
/// when the stream is built; unknown keys are ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AmqpOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub vhost: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub level: Option<LevelOption>,
    pub server: Option<String>,
    pub application: Option<String>,
    pub pid: Option<u32>,
    pub tags: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub buffer_size: Option<usize>,
    pub ssl_enable: Option<bool>,
    pub ssl_key: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    #[serde(rename = "sslCA")]
    pub ssl_ca: Option<PathBuf>,
    pub ssl_reject_unauthorized: Option<bool>,
    /// Heartbeat interval in seconds.
    pub heartbeat: Option<u64>,
    pub heartbeat_force_reconnect: Option<bool>,
    pub delivery_mode: Option<u8>,
    pub exchange: Option<ExchangeOption>,
    pub queue_capacity: Option<usize>,
    pub flush_timeout_ms: Option<u64>,
}

impl AmqpOptions {
    pub fn from_json(text: &str) -> Result<Self, BuildError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self, BuildError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn parses_camel_case_keys() {
        let options = AmqpOptions::from_json(
            r#"{
                "host": "rabbit", "port": 5671, "bufferSize": 5,
                "sslEnable": true, "sslCA": "/etc/ca.pem",
                "sslRejectUnauthorized": false, "type": "audit",
                "heartbeatForceReconnect": false, "deliveryMode": 1,
                "queueCapacity": 16, "flushTimeoutMs": 50,
                "unknownKey": "ignored"
            }"#,
        )
        .expect("valid options");
        assert_eq!(options.host.as_deref(), Some("rabbit"));
        assert_eq!(options.port, Some(5671));
        assert_eq!(options.buffer_size, Some(5));
        assert_eq!(options.ssl_enable, Some(true));
        assert_eq!(options.ssl_ca, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(options.ssl_reject_unauthorized, Some(false));
        assert_eq!(options.message_type.as_deref(), Some("audit"));
        assert_eq!(options.heartbeat_force_reconnect, Some(false));
        assert_eq!(options.delivery_mode, Some(1));
        assert_eq!(options.queue_capacity, Some(16));
        assert_eq!(options.flush_timeout_ms, Some(50));
    }

    #[rstest]
    #[case(json!("logs"), ExchangeOption::Name("logs".into()))]
    #[case(
        json!({"name": "logs", "routingKey": "app", "properties": {"durable": true, "autoDelete": false}}),
        ExchangeOption::Declared(ExchangeOptions {
            name: Some("logs".into()),
            routing_key: Some("app".into()),
            properties: Some(ExchangePropertyOptions { durable: Some(true), auto_delete: Some(false) }),
        })
    )]
    fn exchange_accepts_name_or_object(#[case] raw: Value, #[case] expected: ExchangeOption) {
        let options = AmqpOptions::from_value(json!({ "exchange": raw })).expect("valid options");
        assert_eq!(options.exchange, Some(expected));
    }

    #[rstest]
    #[case(json!("warn"), Severity::Warn)]
    #[case(json!("ERROR"), Severity::Error)]
    #[case(json!(20), Severity::Debug)]
    #[case(json!("50"), Severity::Error)]
    fn level_accepts_name_or_number(#[case] raw: Value, #[case] expected: Severity) {
        let options = AmqpOptions::from_value(json!({ "level": raw })).expect("valid options");
        let level = options.level.expect("level set").resolve().expect("known level");
        assert_eq!(level, expected);
    }

    #[rstest]
    #[case(LevelOption::Name("loud".into()))]
    #[case(LevelOption::Number(35))]
    fn unknown_levels_are_rejected(#[case] level: LevelOption) {
        let err = level.resolve().expect_err("level must be rejected");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("unknown level")));
    }

    #[rstest]
    fn malformed_json_is_a_parse_error() {
        let err = AmqpOptions::from_json("{\"port\": \"high\"}").expect_err("bad port");
        assert!(matches!(err, BuildError::Parse(_)));
    }

    #[rstest]
    fn defaults_match_documented_values() {
        let config = AmqpStreamConfig::default();
        assert_eq!(config.level, Severity::Info);
        assert_eq!(config.buffer_size, 100);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.transform.tags, vec!["bunyan".to_owned()]);
        assert_eq!(config.transform.pid, std::process::id());
        assert!(!config.transform.server.is_empty());
        assert_eq!(config.delivery_mode, DeliveryMode::Persistent);
    }
}
