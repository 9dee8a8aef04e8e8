//! Prometheus-style durations such as `30s`, `1h30m` or `500ms`.
//!
//! Units, largest first: `y` (365 days), `w`, `d`, `h`, `m`, `s`, `ms`. Each
//! unit may appear at most once and in that order. `0` is accepted alone.

use std::time::Duration;

use crate::error::{ConfigError, Result};

const UNITS: [(&str, u64); 7] = [
    ("y", 365 * 24 * 60 * 60 * 1000),
    ("w", 7 * 24 * 60 * 60 * 1000),
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

/// Parses a duration.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let invalid = || ConfigError::InvalidDuration {
        value: text.to_string(),
    };

    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(invalid());
    }

    let bytes = text.as_bytes();
    let mut pos = 0;
    let mut next_unit = 0;
    let mut total_ms: u64 = 0;

    while pos < bytes.len() {
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            return Err(invalid());
        }
        let value: u64 = text[digits_start..pos].parse().map_err(|_| invalid())?;

        // "ms" must be tried before "m".
        let rest = &text[pos..];
        let unit = if rest.starts_with("ms") {
            6
        } else {
            UNITS
                .iter()
                .position(|(suffix, _)| rest.starts_with(suffix))
                .ok_or_else(invalid)?
        };
        if unit < next_unit {
            return Err(invalid());
        }
        next_unit = unit + 1;
        pos += UNITS[unit].0.len();

        total_ms = value
            .checked_mul(UNITS[unit].1)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(invalid)?;
    }

    Ok(Duration::from_millis(total_ms))
}

/// Formats a duration using the largest units first, e.g. `1h30m`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let mut ms = d.as_millis() as u64;
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (suffix, unit_ms) in UNITS {
        let count = ms / unit_ms;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(suffix);
            ms -= count * unit_ms;
        }
    }
    out
}

/// Serde adapter for `Option<Duration>` fields written as duration strings.
pub mod option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a present duration as its string form.
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional duration string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for required `Duration` fields written as duration strings.
pub mod required {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as its string form.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    /// Deserializes a duration string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
