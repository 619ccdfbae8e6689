use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{EtlError, EtlResult};

// ---------------------------------------------------------------------------
// Timestamp normalization: everything becomes UTC at millisecond precision
// ---------------------------------------------------------------------------

/// Convert a millisecond epoch (Bitbucket's native timestamp format) into a
/// UTC datetime.
pub fn from_epoch_ms(ms: i64) -> EtlResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| EtlError::Mapping(format!("timestamp out of range: {ms}")))
}

/// Millisecond epoch of a datetime; the wire format for DateTime64(3)
/// columns and the `_version` stamp.
pub fn to_epoch_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Parse an ISO-8601 string (`2025-11-17T19:45:14Z` and offset variants)
/// into UTC, truncated to millisecond precision.
pub fn parse_iso8601(value: &str) -> EtlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| truncate_to_ms(ts.with_timezone(&Utc)))
        .map_err(|err| EtlError::Mapping(format!("unparseable timestamp {value:?}: {err}")))
}

/// Parse a timestamp field that upstreams serve in mixed formats: a
/// millisecond epoch integer, or an ISO-8601 string. Strings of digits are
/// treated as epochs.
pub fn parse_mixed(value: &Value) -> EtlResult<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let ms = n
                .as_i64()
                .ok_or_else(|| EtlError::Mapping(format!("non-integer timestamp: {n}")))?;
            from_epoch_ms(ms)
        }
        Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() => {
            let ms = s
                .parse::<i64>()
                .map_err(|err| EtlError::Mapping(format!("bad epoch {s:?}: {err}")))?;
            from_epoch_ms(ms)
        }
        Value::String(s) => parse_iso8601(s),
        other => Err(EtlError::Mapping(format!(
            "expected timestamp, got {other}"
        ))),
    }
}

/// Drop sub-millisecond precision so every stored timestamp agrees with the
/// DateTime64(3) columns it lands in.
pub fn truncate_to_ms(ts: DateTime<Utc>) -> DateTime<Utc> {
    let ms = ts.timestamp_millis();
    Utc.timestamp_millis_opt(ms).single().unwrap_or(ts)
}

/// Serde adapter: serialize `DateTime<Utc>` as a millisecond epoch.
pub mod ts_ms {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(ts.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        super::from_epoch_ms(ms).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<DateTime<Utc>>` as a nullable millisecond epoch.
pub mod ts_ms_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&ts.timestamp_millis()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let ms = Option::<i64>::deserialize(deserializer)?;
        match ms {
            Some(ms) => super::from_epoch_ms(ms)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
