//! Settings handed to broker connectors.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use native_tls::{Certificate, Identity, TlsConnector};

use super::error::ConnectionError;

/// Durability hint attached to every published message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Mode `1`: kept in memory only.
    Transient,
    /// Mode `2`: persisted by the broker.
    #[default]
    Persistent,
}

impl DeliveryMode {
    pub const fn as_u8(self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

impl TryFrom<u8> for DeliveryMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeliveryMode::Transient),
            2 => Ok(DeliveryMode::Persistent),
            other => Err(other),
        }
    }
}

/// Per-message publish options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub delivery_mode: DeliveryMode,
}

/// Properties requested when declaring the exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeProperties {
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for ExchangeProperties {
    fn default() -> Self {
        Self {
            durable: false,
            auto_delete: true,
        }
    }
}

/// TLS materials for the broker connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PKCS#8 PEM private key for client authentication.
    pub key: Option<PathBuf>,
    /// PEM certificate chain matching `key`.
    pub cert: Option<PathBuf>,
    /// Additional PEM root certificate to trust.
    pub ca: Option<PathBuf>,
    /// Reject peers presenting certificates that fail validation.
    pub reject_unauthorized: bool,
}

impl TlsOptions {
    /// Build a connector from the configured materials.
    pub fn connector(&self) -> Result<TlsConnector, ConnectionError> {
        let mut builder = TlsConnector::builder();
        if let Some(ca) = &self.ca {
            let pem = read_material(ca)?;
            builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => {
                let identity = Identity::from_pkcs8(&read_material(cert)?, &read_material(key)?)?;
                builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(ConnectionError::Tls(
                    "client certificate and key must be configured together".into(),
                ));
            }
        }
        if !self.reject_unauthorized {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        Ok(builder.build()?)
    }
}

fn read_material(path: &Path) -> Result<Vec<u8>, ConnectionError> {
    fs::read(path)
        .map_err(|err| ConnectionError::Tls(format!("failed to read {}: {err}", path.display())))
}

/// Everything a connector needs to establish the broker connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub login: String,
    pub password: String,
    pub heartbeat: Duration,
    /// Ask the connection layer to reconnect when heartbeats stop arriving.
    pub heartbeat_force_reconnect: bool,
    pub tls: Option<TlsOptions>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5672,
            vhost: "/".into(),
            login: "guest".into(),
            password: "guest".into(),
            heartbeat: Duration::from_secs(30),
            heartbeat_force_reconnect: true,
            tls: None,
        }
    }
}
