//! Builder for [`AmqpStream`].
//!
//! Collects [`AmqpOptions`] together with the pieces that cannot be
//! deserialized (broker connector, message formatter, reconnect tuning),
//! validates them and resolves the documented defaults.

use std::{io, sync::Arc, time::Duration};

use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::{
    broker::{BrokerConnector, ConnectionOptions, DeliveryMode, ExchangeProperties, TlsOptions},
    config::{
        AmqpOptions, AmqpStreamConfig, ExchangeOption, ExchangeOptions, ExchangePropertyOptions,
        LevelOption, MAX_QUEUE_CAPACITY,
    },
    connection::{BackoffPolicy, ExchangeSettings, ReconnectPolicy, validate_options},
    events::{EventHub, StreamEvent},
    file_config::ConfigFileError,
    formatter::{MessageFormatter, SharedFormatter},
    level::Severity,
    publisher::AmqpStream,
};

/// Errors raised while assembling a stream.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid amqp stream configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse amqp stream options: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    File(#[from] ConfigFileError),
    #[error("failed to start amqp stream worker: {0}")]
    Io(#[from] io::Error),
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

/// Overrides for the reconnect backoff timings.
#[derive(Clone, Debug, Default)]
pub struct BackoffOverrides {
    base_ms: Option<u64>,
    cap_ms: Option<u64>,
    reset_after_ms: Option<u64>,
    deadline_ms: Option<u64>,
}

impl BackoffOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_ms(mut self, base_ms: u64) -> Self {
        self.base_ms = Some(base_ms);
        self
    }

    pub fn with_cap_ms(mut self, cap_ms: u64) -> Self {
        self.cap_ms = Some(cap_ms);
        self
    }

    pub fn with_reset_after_ms(mut self, reset_after_ms: u64) -> Self {
        self.reset_after_ms = Some(reset_after_ms);
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    fn apply(&self, policy: &mut BackoffPolicy) -> Result<(), BuildError> {
        if let Some(base) = self.base_ms {
            policy.base = Duration::from_millis(ensure_positive!(base, "backoff_base_ms")?);
        }
        if let Some(cap) = self.cap_ms {
            policy.cap = Duration::from_millis(ensure_positive!(cap, "backoff_cap_ms")?);
        }
        if let Some(reset) = self.reset_after_ms {
            policy.reset_after =
                Duration::from_millis(ensure_positive!(reset, "backoff_reset_after_ms")?);
        }
        if let Some(deadline) = self.deadline_ms {
            policy.deadline =
                Duration::from_millis(ensure_positive!(deadline, "backoff_deadline_ms")?);
        }
        if policy.base > policy.cap {
            return Err(BuildError::InvalidConfig(
                "backoff_base_ms must not exceed backoff_cap_ms".into(),
            ));
        }
        Ok(())
    }
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.options.$field = Some(value.into());
            self
        }
    };
}

/// Builder for constructing [`AmqpStream`] instances.
#[derive(Default)]
pub struct AmqpStreamBuilder {
    options: AmqpOptions,
    connector: Option<Box<dyn BrokerConnector>>,
    formatter: Option<SharedFormatter>,
    reconnect: Option<ReconnectPolicy>,
    backoff: BackoffOverrides,
    warn_interval: Option<Duration>,
    event_capacity: Option<usize>,
}

impl AmqpStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from deserialized options, e.g. [`AmqpOptions::from_json`].
    pub fn from_options(options: AmqpOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &AmqpOptions {
        &self.options
    }

    option_setter!(with_host, host, impl Into<String>);
    option_setter!(with_port, port, u16);
    option_setter!(with_vhost, vhost, impl Into<String>);
    option_setter!(with_login, login, impl Into<String>);
    option_setter!(with_password, password, impl Into<String>);
    option_setter!(
        #[doc = "Override the host name reported in the message `source`."]
        with_server,
        server,
        impl Into<String>
    );
    option_setter!(
        #[doc = "Override the application name reported in the message `source`."]
        with_application,
        application,
        impl Into<String>
    );
    option_setter!(with_pid, pid, u32);
    option_setter!(
        #[doc = "Set the `type` field attached to every message."]
        with_message_type,
        message_type,
        impl Into<String>
    );
    option_setter!(
        #[doc = "Set the ring buffer capacity used while disconnected."]
        with_buffer_size,
        buffer_size,
        usize
    );
    option_setter!(
        #[doc = "Set the heartbeat interval in seconds."]
        with_heartbeat_secs,
        heartbeat,
        u64
    );
    option_setter!(
        with_heartbeat_force_reconnect,
        heartbeat_force_reconnect,
        bool
    );
    option_setter!(
        #[doc = "Set the bounded worker queue capacity."]
        with_queue_capacity,
        queue_capacity,
        usize
    );
    option_setter!(with_flush_timeout_ms, flush_timeout_ms, u64);

    /// Skip records below `level`.
    pub fn with_level(mut self, level: Severity) -> Self {
        self.options.level = Some(LevelOption::Number(level.as_u64()));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.options.delivery_mode = Some(mode.as_u8());
        self
    }

    pub fn with_exchange(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.update_exchange(|exchange| exchange.name = Some(name));
        self
    }

    /// Routing key used when a record carries no `routingKey` of its own.
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        let routing_key = routing_key.into();
        self.update_exchange(|exchange| exchange.routing_key = Some(routing_key));
        self
    }

    pub fn with_exchange_properties(mut self, properties: ExchangeProperties) -> Self {
        self.update_exchange(|exchange| {
            exchange.properties = Some(ExchangePropertyOptions {
                durable: Some(properties.durable),
                auto_delete: Some(properties.auto_delete),
            });
        });
        self
    }

    /// Enable TLS with the provided materials.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.options.ssl_enable = Some(true);
        self.options.ssl_key = tls.key;
        self.options.ssl_cert = tls.cert;
        self.options.ssl_ca = tls.ca;
        self.options.ssl_reject_unauthorized = Some(tls.reject_unauthorized);
        self
    }

    /// Set the connector used to reach the broker. Required.
    pub fn with_connector(mut self, connector: impl BrokerConnector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Reshape or suppress the wire message before it is serialized.
    pub fn with_formatter(mut self, formatter: impl MessageFormatter + 'static) -> Self {
        self.formatter = Some(SharedFormatter::new(formatter));
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Override backoff timings used by [`ReconnectPolicy::Backoff`] and by
    /// retries after a failed connection attempt.
    pub fn with_backoff(mut self, overrides: BackoffOverrides) -> Self {
        self.backoff = overrides;
        self
    }

    /// Minimum spacing between repeated drop warnings.
    pub fn with_warn_interval(mut self, interval: Duration) -> Self {
        self.warn_interval = Some(interval);
        self
    }

    /// Per-observer event queue length.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    fn update_exchange(&mut self, update: impl FnOnce(&mut ExchangeOptions)) {
        let mut declared = match self.options.exchange.take() {
            Some(ExchangeOption::Declared(declared)) => declared,
            Some(ExchangeOption::Name(name)) => ExchangeOptions {
                name: Some(name),
                ..ExchangeOptions::default()
            },
            None => ExchangeOptions::default(),
        };
        update(&mut declared);
        self.options.exchange = Some(ExchangeOption::Declared(declared));
    }

    /// Validate the builder and resolve every default.
    pub fn build_config(&self) -> Result<AmqpStreamConfig, BuildError> {
        let mut config = AmqpStreamConfig::default();
        config.connection = self.build_connection()?;
        config.exchange = self.build_exchange();
        self.apply_transform_fields(&mut config);
        self.apply_delivery_fields(&mut config)?;
        if let Some(level) = &self.options.level {
            config.level = level.resolve()?;
        }
        if let Some(policy) = self.reconnect {
            config.reconnect = policy;
        }
        self.backoff.apply(&mut config.backoff)?;
        if let Some(interval) = self.warn_interval {
            config.warn_interval = interval;
        }
        if let Some(capacity) = self.event_capacity {
            config.event_capacity = ensure_positive!(capacity, "event_capacity")?;
        }
        validate_options(&config.connection)?;
        Ok(config)
    }

    fn build_connection(&self) -> Result<ConnectionOptions, BuildError> {
        let options = &self.options;
        let mut connection = ConnectionOptions::default();
        if let Some(host) = &options.host {
            connection.host.clone_from(host);
        }
        if let Some(port) = options.port {
            connection.port = port;
        }
        if let Some(vhost) = &options.vhost {
            connection.vhost.clone_from(vhost);
        }
        if let Some(login) = &options.login {
            connection.login.clone_from(login);
        }
        if let Some(password) = &options.password {
            connection.password.clone_from(password);
        }
        if let Some(heartbeat) = options.heartbeat {
            connection.heartbeat = Duration::from_secs(ensure_positive!(heartbeat, "heartbeat")?);
        }
        if let Some(force) = options.heartbeat_force_reconnect {
            connection.heartbeat_force_reconnect = force;
        }
        if options.ssl_enable == Some(true) {
            connection.tls = Some(TlsOptions {
                key: options.ssl_key.clone(),
                cert: options.ssl_cert.clone(),
                ca: options.ssl_ca.clone(),
                reject_unauthorized: options.ssl_reject_unauthorized.unwrap_or(true),
            });
        }
        Ok(connection)
    }

    fn build_exchange(&self) -> ExchangeSettings {
        let declared = match &self.options.exchange {
            Some(ExchangeOption::Name(name)) => ExchangeOptions {
                name: Some(name.clone()),
                ..ExchangeOptions::default()
            },
            Some(ExchangeOption::Declared(declared)) => declared.clone(),
            None => ExchangeOptions::default(),
        };
        let mut properties = ExchangeProperties::default();
        if let Some(overrides) = declared.properties {
            if let Some(durable) = overrides.durable {
                properties.durable = durable;
            }
            if let Some(auto_delete) = overrides.auto_delete {
                properties.auto_delete = auto_delete;
            }
        }
        ExchangeSettings {
            name: declared.name.unwrap_or_default(),
            routing_key: declared.routing_key.filter(|key| !key.is_empty()),
            properties,
        }
    }

    fn apply_transform_fields(&self, config: &mut AmqpStreamConfig) {
        let options = &self.options;
        let transform = &mut config.transform;
        if let Some(tags) = &options.tags {
            transform.tags.clone_from(tags);
        }
        if let Some(server) = &options.server {
            transform.server.clone_from(server);
        }
        if let Some(application) = &options.application {
            transform.application.clone_from(application);
        }
        if let Some(pid) = options.pid {
            transform.pid = pid;
        }
        transform.message_type.clone_from(&options.message_type);
        transform.routing_key.clone_from(&config.exchange.routing_key);
        transform.formatter.clone_from(&self.formatter);
    }

    fn apply_delivery_fields(&self, config: &mut AmqpStreamConfig) -> Result<(), BuildError> {
        let options = &self.options;
        if let Some(size) = options.buffer_size {
            config.buffer_size = size;
        }
        if let Some(mode) = options.delivery_mode {
            config.delivery_mode = DeliveryMode::try_from(mode).map_err(|mode| {
                BuildError::InvalidConfig(format!("deliveryMode must be 1 or 2, got {mode}"))
            })?;
        }
        if let Some(capacity) = options.queue_capacity {
            config.queue_capacity = ensure_positive!(capacity, "queueCapacity")?;
            if capacity > MAX_QUEUE_CAPACITY {
                return Err(BuildError::InvalidConfig(format!(
                    "queueCapacity must not exceed {MAX_QUEUE_CAPACITY}, got {capacity}"
                )));
            }
        }
        if let Some(timeout) = options.flush_timeout_ms {
            config.flush_timeout = Duration::from_millis(ensure_positive!(timeout, "flushTimeoutMs")?);
        }
        Ok(())
    }

    fn into_parts(
        self,
    ) -> Result<(AmqpStreamConfig, Box<dyn BrokerConnector>, Arc<EventHub>), BuildError> {
        let config = self.build_config()?;
        let connector = self.connector.ok_or_else(|| {
            BuildError::InvalidConfig("amqp stream requires a broker connector".into())
        })?;
        let events = Arc::new(EventHub::new(config.event_capacity, config.warn_interval));
        Ok((config, connector, events))
    }

    /// Build the stream and start connecting.
    pub fn build(self) -> Result<AmqpStream, BuildError> {
        let (config, connector, events) = self.into_parts()?;
        AmqpStream::with_config(config, connector, events)
    }

    /// Build the stream with an observer registered before it starts
    /// connecting, so no lifecycle event is missed.
    pub fn build_subscribed(self) -> Result<(AmqpStream, Receiver<StreamEvent>), BuildError> {
        let (config, connector, events) = self.into_parts()?;
        let observer = events.subscribe();
        let stream = AmqpStream::with_config(config, connector, events)?;
        Ok((stream, observer))
    }
}

impl std::fmt::Debug for AmqpStreamBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpStreamBuilder")
            .field("options", &self.options)
            .field("connector", &self.connector.is_some())
            .field("formatter", &self.formatter.is_some())
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use rstest::rstest;

    #[rstest]
    fn defaults_resolve() {
        let config = AmqpStreamBuilder::new().build_config().expect("defaults are valid");
        assert_eq!(config.connection, ConnectionOptions::default());
        assert_eq!(config.exchange.name, "");
        assert_eq!(config.exchange.routing_key, None);
        assert_eq!(config.exchange.properties, ExchangeProperties::default());
        assert_eq!(config.reconnect, ReconnectPolicy::Immediate);
    }

    #[rstest]
    fn setters_flow_into_config() {
        let config = AmqpStreamBuilder::new()
            .with_host("rabbit")
            .with_port(5673)
            .with_vhost("logs")
            .with_login("svc")
            .with_password("secret")
            .with_server("web-1")
            .with_application("api")
            .with_pid(42)
            .with_message_type("audit")
            .with_tags(["a", "b"])
            .with_level(Severity::Warn)
            .with_buffer_size(7)
            .with_heartbeat_secs(10)
            .with_delivery_mode(DeliveryMode::Transient)
            .with_exchange("amq-logs")
            .with_routing_key("app.logs")
            .with_exchange_properties(ExchangeProperties {
                durable: true,
                auto_delete: false,
            })
            .with_reconnect_policy(ReconnectPolicy::Backoff)
            .build_config()
            .expect("valid config");
        assert_eq!(config.connection.host, "rabbit");
        assert_eq!(config.connection.port, 5673);
        assert_eq!(config.connection.vhost, "logs");
        assert_eq!(config.connection.login, "svc");
        assert_eq!(config.connection.heartbeat, Duration::from_secs(10));
        assert_eq!(config.transform.server, "web-1");
        assert_eq!(config.transform.application, "api");
        assert_eq!(config.transform.pid, 42);
        assert_eq!(config.transform.message_type.as_deref(), Some("audit"));
        assert_eq!(config.transform.tags, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(config.transform.routing_key.as_deref(), Some("app.logs"));
        assert_eq!(config.level, Severity::Warn);
        assert_eq!(config.buffer_size, 7);
        assert_eq!(config.delivery_mode, DeliveryMode::Transient);
        assert_eq!(config.exchange.name, "amq-logs");
        assert!(config.exchange.properties.durable);
        assert!(!config.exchange.properties.auto_delete);
        assert_eq!(config.reconnect, ReconnectPolicy::Backoff);
    }

    #[rstest]
    fn routing_key_survives_exchange_rename() {
        let config = AmqpStreamBuilder::new()
            .with_routing_key("app")
            .with_exchange("logs")
            .build_config()
            .expect("valid config");
        assert_eq!(config.exchange.name, "logs");
        assert_eq!(config.exchange.routing_key.as_deref(), Some("app"));
    }

    #[rstest]
    fn ssl_options_enable_tls() {
        let options = AmqpOptions::from_json(
            r#"{"sslEnable": true, "sslCA": "/etc/ca.pem"}"#,
        )
        .expect("valid options");
        let config = AmqpStreamBuilder::from_options(options)
            .build_config()
            .expect("valid config");
        let tls = config.connection.tls.expect("tls enabled");
        assert!(tls.reject_unauthorized);
        assert_eq!(tls.ca.as_deref(), Some(std::path::Path::new("/etc/ca.pem")));
    }

    #[rstest]
    fn ssl_materials_ignored_unless_enabled() {
        let options =
            AmqpOptions::from_json(r#"{"sslCA": "/etc/ca.pem"}"#).expect("valid options");
        let config = AmqpStreamBuilder::from_options(options)
            .build_config()
            .expect("valid config");
        assert!(config.connection.tls.is_none());
    }

    #[rstest]
    #[case(AmqpStreamBuilder::new().with_queue_capacity(0usize), "queueCapacity")]
    #[case(AmqpStreamBuilder::new().with_flush_timeout_ms(0u64), "flushTimeoutMs")]
    #[case(AmqpStreamBuilder::new().with_heartbeat_secs(0u64), "heartbeat")]
    #[case(AmqpStreamBuilder::new().with_host(""), "host")]
    #[case(AmqpStreamBuilder::new().with_port(0u16), "port")]
    #[case(AmqpStreamBuilder::new().with_event_capacity(0), "event_capacity")]
    #[case(AmqpStreamBuilder::new().with_backoff(BackoffOverrides::new().with_cap_ms(0)), "backoff_cap_ms")]
    #[case(
        AmqpStreamBuilder::new().with_backoff(BackoffOverrides::new().with_base_ms(500).with_cap_ms(100)),
        "backoff_base_ms"
    )]
    fn invalid_settings_are_rejected(#[case] builder: AmqpStreamBuilder, #[case] field: &str) {
        let err = builder.build_config().expect_err("config must be rejected");
        assert!(
            matches!(&err, BuildError::InvalidConfig(msg) if msg.contains(field)),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn invalid_delivery_mode_is_rejected() {
        let options = AmqpOptions::from_json(r#"{"deliveryMode": 3}"#).expect("valid json");
        let err = AmqpStreamBuilder::from_options(options)
            .build_config()
            .expect_err("mode 3 is invalid");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("deliveryMode")));
    }

    #[rstest]
    fn zero_buffer_size_is_allowed() {
        let config = AmqpStreamBuilder::new()
            .with_buffer_size(0usize)
            .build_config()
            .expect("zero capacity is valid");
        assert_eq!(config.buffer_size, 0);
    }

    #[rstest]
    fn huge_buffer_size_builds_without_reserving() {
        let mut stream = AmqpStreamBuilder::new()
            .with_buffer_size(usize::MAX)
            .with_connector(MemoryBroker::new())
            .build()
            .expect("large buffers are allocated on demand");
        assert!(stream.flush());
        stream.close();
    }

    #[rstest]
    fn oversized_queue_capacity_is_rejected() {
        let err = AmqpStreamBuilder::new()
            .with_queue_capacity(MAX_QUEUE_CAPACITY + 1)
            .build_config()
            .expect_err("queue capacity must be bounded");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("queueCapacity")));
    }

    #[rstest]
    fn build_requires_connector() {
        let err = AmqpStreamBuilder::new().build().expect_err("connector required");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("connector")));
    }

    #[rstest]
    fn build_starts_connecting() {
        let broker = MemoryBroker::new();
        let stream = AmqpStreamBuilder::new()
            .with_connector(broker.clone())
            .build()
            .expect("stream builds");
        assert!(stream.flush());
        assert_eq!(broker.connect_attempts(), 1);
    }
}
