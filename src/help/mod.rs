//! Shared helpers for ISO-8601 datetimes.
//!
//! KERI datetimes are microsecond precision, timezone aware, in the
//! extended format `2021-01-01T00:00:00.000000+00:00`.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use crate::errors::KeriError;

/// Returns the current UTC datetime as an extended ISO-8601 string with
/// microsecond precision and explicit +00:00 offset.
pub fn now_iso8601() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parses an extended ISO-8601 datetime string.
pub fn from_iso8601(dts: &str) -> Result<DateTime<FixedOffset>, KeriError> {
    DateTime::parse_from_rfc3339(dts)
        .map_err(|e| KeriError::ValueError(format!("invalid datetime = {dts}: {e}")))
}

/// Formats a datetime as an extended ISO-8601 string with microseconds.
pub fn to_iso8601(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_roundtrip() {
        let dts = "2021-01-01T00:00:00.000000+00:00";
        let dt = from_iso8601(dts).unwrap();
        assert_eq!(to_iso8601(&dt), dts);

        let dts1 = "2020-08-22T17:50:09.988921+00:00";
        let dt1 = from_iso8601(dts1).unwrap();
        assert_eq!(to_iso8601(&dt1), dts1);
        assert!(dt1 < dt);
    }

    #[test]
    fn test_now_is_parseable() {
        let dts = now_iso8601();
        assert!(from_iso8601(&dts).is_ok());
        assert_eq!(dts.len(), "2021-01-01T00:00:00.000000+00:00".len());
    }
}
