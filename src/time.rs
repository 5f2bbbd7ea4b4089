use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use thiserror::Error;

use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;

#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid ISO-8601 timestamp {input:?}: {source}")]
    Invalid {
        input: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("timestamp {0:?} has sub-millisecond precision")]
    SubMillisecond(String),
    #[error("timestamp {0} is out of range")]
    OutOfRange(Ms),
}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 timestamp (any offset) into UTC epoch milliseconds.
pub fn parse_timestamp(input: &str) -> Result<Ms, TimeError> {
    let dt = DateTime::parse_from_rfc3339(input.trim()).map_err(|source| TimeError::Invalid {
        input: input.to_string(),
        source,
    })?;
    if dt.nanosecond() % 1_000_000 != 0 {
        return Err(TimeError::SubMillisecond(input.to_string()));
    }
    Ok(dt.timestamp_millis())
}

/// `2026-01-01T10:00:00.000Z`
pub fn format_timestamp(ms: Ms) -> Result<String, TimeError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or(TimeError::OutOfRange(ms))
}

pub fn is_minute_aligned(ms: Ms) -> bool {
    ms.rem_euclid(MINUTE_MS) == 0
}

/// Serde adapter storing `Ms` as an RFC 3339 string.
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    use crate::model::Ms;

    pub fn serialize<S: Serializer>(ms: &Ms, serializer: S) -> Result<S::Ok, S::Error> {
        let text = super::format_timestamp(*ms).map_err(ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ms, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text).map_err(de::Error::custom)
    }
}
