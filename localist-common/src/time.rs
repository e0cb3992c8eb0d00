//! Timestamp utilities
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC text
//! (`2024-01-02T03:04:05.000006Z`) so that SQL string comparison orders
//! them chronologically.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time formatted for storage
pub fn now_db() -> String {
    to_db(now())
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(6);
        assert_eq!(to_db(a), "2024-01-02T03:04:05.000000Z");
        assert_eq!(to_db(b), "2024-01-02T03:04:05.000006Z");
        assert_eq!(to_db(a).len(), to_db(b).len());
    }

    #[test]
    fn test_lexical_order_matches_chronological() {
        let early = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(to_db(early) < to_db(late));
    }

    #[test]
    fn test_round_trip_preserves_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(from_db(&to_db(ts)).unwrap(), ts);
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        assert!(from_db("yesterday").is_err());
        assert!(from_db_opt(None).unwrap().is_none());
    }
}
