//! Numeric severity table shared by the record transformer and the stream
//! level option.
//!
//! Producers emit severities as integers (`10` for trace through `60` for
//! fatal). [`Severity`] gives those values a typed form and maps them to the
//! canonical lowercase names used in wire messages and routing keys.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

impl Severity {
    /// All severities in ascending order.
    pub const ALL: [Severity; 6] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
    ];

    /// Numeric value used by record producers.
    pub const fn as_u64(self) -> u64 {
        match self {
            Severity::Trace => 10,
            Severity::Debug => 20,
            Severity::Info => 30,
            Severity::Warn => 40,
            Severity::Error => 50,
            Severity::Fatal => 60,
        }
    }

    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Look up the severity for an exact table entry.
    ///
    /// Values that fall between table entries (e.g. `35`) are not mapped.
    pub fn from_u64(value: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_u64() == value)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    /// Accepts either a name (`"warn"`, `"WARNING"`) or a table number
    /// (`"40"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<u64>() {
            return Self::from_u64(number).ok_or(());
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            _ => Err(()),
        }
    }
}

/// Map a record's raw `level` value onto its wire form.
///
/// Numbers present in the severity table become their canonical name; every
/// other value is returned unchanged.
pub fn map_level(raw: &Value) -> Value {
    raw.as_u64()
        .and_then(Severity::from_u64)
        .map(|severity| Value::String(severity.as_str().to_owned()))
        .unwrap_or_else(|| raw.clone())
}

/// Render a mapped level as text, e.g. for use as a fallback routing key.
pub fn level_text(mapped: &Value) -> String {
    match mapped {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(10, "trace")]
    #[case(20, "debug")]
    #[case(30, "info")]
    #[case(40, "warn")]
    #[case(50, "error")]
    #[case(60, "fatal")]
    fn maps_table_entries(#[case] raw: u64, #[case] expected: &str) {
        assert_eq!(map_level(&json!(raw)), json!(expected));
    }

    #[rstest]
    #[case(json!(35))]
    #[case(json!("custom"))]
    #[case(json!(-1))]
    fn unmapped_levels_pass_through(#[case] raw: Value) {
        assert_eq!(map_level(&raw), raw);
    }

    #[test]
    fn level_text_renders_numbers() {
        assert_eq!(level_text(&json!(35)), "35");
        assert_eq!(level_text(&json!("info")), "info");
    }

    #[rstest]
    #[case("info", Severity::Info)]
    #[case(" WARNING ", Severity::Warn)]
    #[case("50", Severity::Error)]
    #[case("critical", Severity::Fatal)]
    fn parses_names_and_numbers(#[case] input: &str, #[case] expected: Severity) {
        assert_eq!(input.parse::<Severity>(), Ok(expected));
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("verbose".parse::<Severity>().is_err());
        assert!("35".parse::<Severity>().is_err());
    }
}
