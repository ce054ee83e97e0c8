//! The duration wire format used by rule files.
//!
//! Durations are written as `<integer><unit>` with units `ms`, `s`, `m`,
//! `h`, and `d` (for example `90s` or `15m`). Relative window starts use
//! the `now-<duration>` form.

use std::time::Duration;

use thiserror::Error;

/// Errors produced when parsing the duration wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    /// The string is empty or contains no digits.
    #[error("invalid duration '{0}': expected <integer><unit>")]
    Malformed(String),

    /// The unit suffix is not one of `ms`, `s`, `m`, `h`, `d`.
    #[error("invalid duration '{0}': unknown unit '{1}'")]
    UnknownUnit(String, String),

    /// A window expression did not start with `now-`.
    #[error("invalid time range '{0}': expected 'now-<duration>'")]
    NotRelative(String),
}

/// Parse a duration string such as `200ms`, `30s`, `15m`, `6h`, or `2d`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(digits_end);

    let value: u64 = digits
        .parse()
        .map_err(|_| DurationError::Malformed(input.to_owned()))?;

    let millis = match unit {
        "ms" => value,
        "s" => value * 1_000,
        "m" => value * 60_000,
        "h" => value * 3_600_000,
        "d" => value * 86_400_000,
        _ => return Err(DurationError::UnknownUnit(input.to_owned(), unit.to_owned())),
    };

    Ok(Duration::from_millis(millis))
}

/// Format a duration back into the wire format using the largest exact unit.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_owned();
    }
    for (factor, unit) in [(86_400_000, "d"), (3_600_000, "h"), (60_000, "m"), (1_000, "s")] {
        if ms % factor == 0 {
            return format!("{}{unit}", ms / factor);
        }
    }
    format!("{ms}ms")
}

/// Parse the `from` side of a relative time range (`now-<duration>`),
/// returning the window width.
pub fn parse_window_from(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    let rest = s
        .strip_prefix("now-")
        .ok_or_else(|| DurationError::NotRelative(input.to_owned()))?;
    parse_duration(rest)
}

/// Serde adapter serializing a [`Duration`] as the wire-format string.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(de)?;
        super::parse_duration(&raw).map_err(Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` in the wire format.
pub mod serde_opt_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => ser.serialize_some(&super::format_duration(*d)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(de)?;
        raw.map(|s| super::parse_duration(&s).map_err(Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(21_600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10 s").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("10w").is_err());
    }

    #[test]
    fn formats_largest_exact_unit() {
        assert_eq!(format_duration(Duration::from_secs(900)), "15m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(86_400)), "1d");
    }

    #[test]
    fn format_parse_roundtrip() {
        for s in ["10s", "90s", "15m", "1h", "3d", "250ms"] {
            let d = parse_duration(s).unwrap();
            assert_eq!(format_duration(d), s);
        }
    }

    #[test]
    fn window_from_relative() {
        assert_eq!(
            parse_window_from("now-5m").unwrap(),
            Duration::from_secs(300)
        );
        assert!(parse_window_from("5m").is_err());
        assert!(parse_window_from("now+5m").is_err());
    }
}
