//! JSON fix payload decoding shared by the MQTT, TCP and HTTP sources
//!
//! A payload is one fix object or an array of them:
//! `{"lat": 46.05, "lon": 14.50, "ts": 1767617600000, "acc": 4.5}`
//! `ts` may be epoch milliseconds or an RFC 3339 string; when missing the
//! fix is stamped with the engine clock, offset by its index in the array.

use crate::domain::types::{FixMessage, PositionFix, TimestampValue};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum FixPayload {
    One(FixMessage),
    Many(Vec<FixMessage>),
}

/// Parse RFC 3339 time string to epoch milliseconds
pub fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

/// Convert a wire message into a fix, stamping missing timestamps with `now_ms`
pub fn to_position_fix(message: &FixMessage, now_ms: u64) -> Option<PositionFix> {
    let timestamp_ms = match &message.ts {
        TimestampValue::EpochMs(ms) => *ms,
        TimestampValue::IsoString(s) => match parse_iso_time(s) {
            Some(ms) => ms,
            None => {
                debug!(ts = %s, "fix_timestamp_unparseable");
                return None;
            }
        },
        TimestampValue::None => now_ms,
    };
    Some(PositionFix::new(message.lat, message.lon, timestamp_ms, message.acc.unwrap_or(0.0)))
}

/// Decode a payload into fixes; unparseable entries are skipped
pub fn parse_fix_payload(json_str: &str, now_ms: u64) -> Result<Vec<PositionFix>, serde_json::Error> {
    let messages = match serde_json::from_str::<FixPayload>(json_str)? {
        FixPayload::One(m) => vec![m],
        FixPayload::Many(ms) => ms,
    };
    // Untimestamped entries get now_ms, now_ms + 1, ... so none is stale
    Ok(messages
        .iter()
        .enumerate()
        .filter_map(|(i, m)| to_position_fix(m, now_ms + i as u64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_fix() {
        let fixes =
            parse_fix_payload(r#"{"lat":46.05,"lon":14.5,"ts":1767617600000,"acc":4.5}"#, 0).unwrap();
        assert_eq!(fixes, vec![PositionFix::new(46.05, 14.5, 1767617600000, 4.5)]);
    }

    #[test]
    fn test_parse_array_and_aliases() {
        let json = r#"[
            {"lat":46.0,"lon":14.5,"timestampMs":10,"accuracyMeters":3.0},
            {"lat":46.1,"lon":14.6}
        ]"#;
        let fixes = parse_fix_payload(json, 999).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].timestamp_ms, 10);
        assert_eq!(fixes[0].accuracy_meters, 3.0);
        // Missing ts is stamped with the engine clock (plus index), missing acc is 0
        assert_eq!(fixes[1].timestamp_ms, 1_000);
        assert_eq!(fixes[1].accuracy_meters, 0.0);
    }

    #[test]
    fn test_untimestamped_array_is_strictly_increasing() {
        let json = r#"[{"lat":46.0,"lon":14.5},{"lat":46.0,"lon":14.5},{"lat":46.0,"lon":14.5}]"#;
        let ts: Vec<u64> = parse_fix_payload(json, 999).unwrap().iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(ts, vec![999, 1_000, 1_001]);
    }

    #[test]
    fn test_parse_iso_timestamp() {
        let fixes = parse_fix_payload(r#"{"lat":46.0,"lon":14.5,"ts":"2026-01-05T12:53:20Z"}"#, 0).unwrap();
        assert_eq!(fixes[0].timestamp_ms, 1_767_617_600_000);

        assert_eq!(parse_iso_time("2026-01-05T12:53:20.250+00:00"), Some(1_767_617_600_250));
        assert_eq!(parse_iso_time("yesterday"), None);
    }

    #[test]
    fn test_bad_timestamp_skipped() {
        let fixes = parse_fix_payload(r#"{"lat":46.0,"lon":14.5,"ts":"soon"}"#, 0).unwrap();
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_malformed_payload() {
        assert!(parse_fix_payload("not json", 0).is_err());
        assert!(parse_fix_payload(r#"{"lat":46.0}"#, 0).is_err());
    }
}
