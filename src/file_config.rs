//! INI file loading for [`AmqpOptions`].
//!
//! Options live in an `[amqp]` section using the same camelCase keys as the
//! JSON form. An optional `[amqp.exchange]` section declares the exchange:
//!
//! ```ini
//! [amqp]
//! host = rabbit.internal
//! level = warn
//! tags = bunyan, web
//!
//! [amqp.exchange]
//! name = logs
//! routingKey = app.web
//! durable = true
//! autoDelete = false
//! ```
//!
//! Values are coerced to the type each key expects before the section is
//! deserialized, so `port = 5671` and `sslEnable = yes` both work.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use encoding_rs::Encoding;
use ini::{Ini, Properties};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{builder::BuildError, config::AmqpOptions};

/// Section holding the stream options.
pub const OPTIONS_SECTION: &str = "amqp";
/// Section declaring the exchange.
pub const EXCHANGE_SECTION: &str = "amqp.exchange";

const INTEGER_KEYS: &[&str] = &[
    "port",
    "pid",
    "bufferSize",
    "heartbeat",
    "deliveryMode",
    "queueCapacity",
    "flushTimeoutMs",
];
const BOOLEAN_KEYS: &[&str] = &[
    "sslEnable",
    "sslRejectUnauthorized",
    "heartbeatForceReconnect",
    "durable",
    "autoDelete",
];
const LIST_KEYS: &[&str] = &["tags"];

/// Errors raised while reading an options file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("{} doesn't exist", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is an empty file", .0.display())]
    Empty(PathBuf),
    #[error("unknown encoding {0}")]
    UnknownEncoding(String),
    #[error("{} is not valid {encoding}", .path.display())]
    Decode { path: PathBuf, encoding: String },
    #[error("{} is invalid: {reason}", .path.display())]
    Syntax { path: PathBuf, reason: String },
    #[error("{} has no [amqp] section", .path.display())]
    MissingSection { path: PathBuf },
    #[error("{}: `{key}` expects {expected}, got `{value}`", .path.display())]
    InvalidValue {
        path: PathBuf,
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Load options from an INI file decoded with `encoding` (UTF-8 by default).
pub fn load_options(path: impl AsRef<Path>, encoding: Option<&str>) -> Result<AmqpOptions, BuildError> {
    let path = path.as_ref();
    let bytes = read_file_bytes(path)?;
    if bytes.is_empty() {
        return Err(ConfigFileError::Empty(path.to_owned()).into());
    }
    let text = decode_with_encoding(path, &bytes, encoding.unwrap_or("utf-8"))?;
    parse_options(path, &text)
}

/// Parse options from INI text. `path` is used for error messages only.
pub fn parse_options(path: &Path, text: &str) -> Result<AmqpOptions, BuildError> {
    let ini = Ini::load_from_str(text).map_err(|err| ConfigFileError::Syntax {
        path: path.to_owned(),
        reason: err.to_string(),
    })?;
    let section = ini
        .section(Some(OPTIONS_SECTION))
        .ok_or_else(|| ConfigFileError::MissingSection {
            path: path.to_owned(),
        })?;
    let mut object = section_to_object(path, section)?;
    if let Some(exchange) = ini.section(Some(EXCHANGE_SECTION)) {
        object.insert("exchange".into(), exchange_object(path, exchange)?);
    }
    AmqpOptions::from_value(Value::Object(object))
}

fn read_file_bytes(path: &Path) -> Result<Vec<u8>, ConfigFileError> {
    fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ConfigFileError::NotFound(path.to_owned()),
        _ => ConfigFileError::Read {
            path: path.to_owned(),
            source: err,
        },
    })
}

fn decode_with_encoding(path: &Path, bytes: &[u8], label: &str) -> Result<String, ConfigFileError> {
    let normalized_label = label.trim().to_ascii_lowercase();
    let encoding = Encoding::for_label(normalized_label.as_bytes())
        .ok_or_else(|| ConfigFileError::UnknownEncoding(label.to_owned()))?;
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(ConfigFileError::Decode {
            path: path.to_owned(),
            encoding: encoding.name().to_owned(),
        });
    }
    Ok(decoded.into_owned())
}

fn section_to_object(path: &Path, section: &Properties) -> Result<Map<String, Value>, ConfigFileError> {
    section
        .iter()
        .map(|(key, value)| Ok((key.to_owned(), coerce(path, key, value)?)))
        .collect()
}

fn exchange_object(path: &Path, section: &Properties) -> Result<Value, ConfigFileError> {
    let mut exchange = Map::new();
    let mut properties = Map::new();
    for (key, value) in section.iter() {
        match key {
            "durable" | "autoDelete" => {
                properties.insert(key.to_owned(), coerce(path, key, value)?);
            }
            _ => {
                exchange.insert(key.to_owned(), Value::String(value.to_owned()));
            }
        }
    }
    if !properties.is_empty() {
        exchange.insert("properties".into(), Value::Object(properties));
    }
    Ok(Value::Object(exchange))
}

fn coerce(path: &Path, key: &str, value: &str) -> Result<Value, ConfigFileError> {
    let value = value.trim();
    let invalid = |expected| ConfigFileError::InvalidValue {
        path: path.to_owned(),
        key: key.to_owned(),
        value: value.to_owned(),
        expected,
    };
    if INTEGER_KEYS.contains(&key) {
        return value
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| invalid("an unsigned integer"));
    }
    if BOOLEAN_KEYS.contains(&key) {
        return parse_bool(value).map(Value::Bool).ok_or_else(|| invalid("a boolean"));
    }
    if LIST_KEYS.contains(&key) {
        return Ok(Value::Array(
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_owned()))
                .collect(),
        ));
    }
    Ok(Value::String(value.to_owned()))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeOption, ExchangeOptions, ExchangePropertyOptions, LevelOption};
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(text: &str) -> Result<AmqpOptions, BuildError> {
        parse_options(Path::new("amqp.ini"), text)
    }

    #[rstest]
    fn parses_typed_values() {
        let options = parse(
            "[amqp]\nhost = rabbit\nport = 5671\nsslEnable = yes\ntags = bunyan, web\nlevel = warn\n",
        )
        .expect("valid file");
        assert_eq!(options.host.as_deref(), Some("rabbit"));
        assert_eq!(options.port, Some(5671));
        assert_eq!(options.ssl_enable, Some(true));
        assert_eq!(options.tags, Some(vec!["bunyan".to_owned(), "web".to_owned()]));
        assert_eq!(options.level, Some(LevelOption::Name("warn".into())));
    }

    #[rstest]
    fn numeric_level_stays_a_name_and_still_resolves() {
        let options = parse("[amqp]\nlevel = 40\n").expect("valid file");
        let level = options.level.expect("level set").resolve().expect("known level");
        assert_eq!(level, crate::level::Severity::Warn);
    }

    #[rstest]
    fn reads_exchange_section() {
        let options = parse(
            "[amqp]\nhost = rabbit\n\n[amqp.exchange]\nname = logs\nroutingKey = app\ndurable = true\nautoDelete = false\n",
        )
        .expect("valid file");
        assert_eq!(
            options.exchange,
            Some(ExchangeOption::Declared(ExchangeOptions {
                name: Some("logs".into()),
                routing_key: Some("app".into()),
                properties: Some(ExchangePropertyOptions {
                    durable: Some(true),
                    auto_delete: Some(false),
                }),
            }))
        );
    }

    #[rstest]
    #[case("port = high", "port")]
    #[case("sslEnable = maybe", "sslEnable")]
    fn rejects_mistyped_values(#[case] line: &str, #[case] key: &str) {
        let err = parse(&format!("[amqp]\n{line}\n")).expect_err("value must be rejected");
        assert!(
            matches!(&err, BuildError::File(ConfigFileError::InvalidValue { key: k, .. }) if k == key),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn requires_options_section() {
        let err = parse("[other]\nkey = value\n").expect_err("section required");
        assert!(matches!(err, BuildError::File(ConfigFileError::MissingSection { .. })));
    }

    #[rstest]
    fn load_reads_from_disk() {
        let mut file = NamedTempFile::new().expect("create temp ini file");
        writeln!(file, "[amqp]\nhost = disk-host\nbufferSize = 3").expect("write ini contents");
        let options = load_options(file.path(), None).expect("should load");
        assert_eq!(options.host.as_deref(), Some("disk-host"));
        assert_eq!(options.buffer_size, Some(3));
    }

    #[rstest]
    fn load_decodes_with_label() {
        let mut file = NamedTempFile::new().expect("create temp ini file");
        file.write_all(b"[amqp]\napplication = caf\xe9\n")
            .expect("write ini contents");
        let options = load_options(file.path(), Some("latin1")).expect("should load");
        assert_eq!(options.application.as_deref(), Some("café"));
    }

    #[rstest]
    fn load_reports_missing_file() {
        let err = load_options("/nonexistent/amqp.ini", None).expect_err("missing file");
        assert!(matches!(err, BuildError::File(ConfigFileError::NotFound(_))));
    }

    #[rstest]
    fn load_rejects_empty_file() {
        let file = NamedTempFile::new().expect("create temp ini file");
        let err = load_options(file.path(), None).expect_err("empty file");
        assert!(matches!(err, BuildError::File(ConfigFileError::Empty(_))));
    }

    #[rstest]
    fn load_rejects_unknown_encoding() {
        let mut file = NamedTempFile::new().expect("create temp ini file");
        writeln!(file, "[amqp]").expect("write ini contents");
        let err = load_options(file.path(), Some("does-not-exist")).expect_err("bad label");
        assert!(matches!(err, BuildError::File(ConfigFileError::UnknownEncoding(_))));
    }
}
