//! Message formatter hook.
//!
//! A formatter replaces the default field merge performed by the
//! transformer. It receives the merged wire fields and returns either the
//! mapping to publish or `None` to suppress the record entirely.

use std::{fmt, sync::Arc};

use serde_json::{Map, Value};

/// Trait for rewriting wire messages before they are published.
///
/// Implementors must be thread-safe (`Send + Sync`) because formatting runs on
/// whichever thread writes to the stream.
pub trait MessageFormatter: Send + Sync {
    /// Rewrite `message`, or return `None` to drop the record.
    fn format(&self, message: Map<String, Value>) -> Option<Map<String, Value>>;
}

impl<F> MessageFormatter for F
where
    F: Fn(Map<String, Value>) -> Option<Map<String, Value>> + Send + Sync,
{
    fn format(&self, message: Map<String, Value>) -> Option<Map<String, Value>> {
        self(message)
    }
}

/// Shared formatter trait object used by the transformer configuration.
#[derive(Clone)]
pub struct SharedFormatter {
    inner: Arc<dyn MessageFormatter>,
}

impl SharedFormatter {
    /// Create a shared formatter from an owned formatter implementation.
    pub fn new<F>(formatter: F) -> Self
    where
        F: MessageFormatter + 'static,
    {
        Self {
            inner: Arc::new(formatter),
        }
    }

    /// Wrap an existing shared formatter trait object.
    pub fn from_arc(inner: Arc<dyn MessageFormatter>) -> Self {
        Self { inner }
    }

    /// Format a message using the wrapped formatter instance.
    pub fn format(&self, message: Map<String, Value>) -> Option<Map<String, Value>> {
        self.inner.format(message)
    }
}

impl fmt::Debug for SharedFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedFormatter(<dyn MessageFormatter>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use static_assertions::assert_impl_all;

    #[test]
    fn shared_formatter_is_send_sync() {
        assert_impl_all!(SharedFormatter: Send, Sync);
    }

    #[test]
    fn closures_act_as_formatters() {
        let formatter = SharedFormatter::new(|mut message: Map<String, Value>| {
            message.insert("formatted".into(), json!(true));
            Some(message)
        });
        let out = formatter.format(Map::new()).expect("formatter keeps record");
        assert_eq!(out.get("formatted"), Some(&json!(true)));
    }

    #[test]
    fn trait_objects_can_be_shared() {
        let inner: Arc<dyn MessageFormatter> = Arc::new(|mut message: Map<String, Value>| {
            message.insert("source".into(), json!("shared"));
            Some(message)
        });
        let first = SharedFormatter::from_arc(Arc::clone(&inner));
        let second = SharedFormatter::from_arc(inner);
        for formatter in [first, second] {
            let out = formatter.format(Map::new()).expect("formatter keeps record");
            assert_eq!(out.get("source"), Some(&json!("shared")));
        }
    }

    #[test]
    fn formatter_can_suppress() {
        let formatter = SharedFormatter::new(|_: Map<String, Value>| None);
        assert!(formatter.format(Map::new()).is_none());
    }
}
