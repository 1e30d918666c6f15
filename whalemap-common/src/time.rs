//! Timestamp and duration utilities
//!
//! Canonical string encodings used by the query setters and by provider payloads:
//! - instants: RFC 3339 / ISO-8601 (`2025-01-21T17:50:00Z`), or a zone-less local
//!   time (`2025-01-21T09:50`) interpreted in a caller-supplied offset
//! - durations: ISO-8601 durations restricted to exact units (`P2D`, `PT12H`, `P1W`)
//! - offsets: `+HH:MM`, `-HHMM`, `Z`, `UTC`, `GMT`

use crate::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:[.,](\d+))?S)?)?$",
    )
    .expect("valid duration regex")
});

static OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-])(\d{2}):?(\d{2})?$").expect("valid offset regex"));

/// Naive local formats accepted by [`parse_instant`], most specific first
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse an ISO-8601 duration.
///
/// Calendar units (years, months) are rejected because they have no fixed length.
pub fn parse_iso_duration(value: &str) -> Result<Duration> {
    let upper = value.trim().to_ascii_uppercase();
    let caps = DURATION_RE
        .captures(&upper)
        .ok_or_else(|| Error::InvalidInput(format!("Not an ISO-8601 duration: {:?}", value)))?;

    let has_component = (1..=5).any(|i| caps.get(i).is_some());
    if !has_component || upper.ends_with('T') {
        return Err(Error::InvalidInput(format!(
            "ISO-8601 duration has no components: {:?}",
            value
        )));
    }

    let field = |i: usize| -> Result<i64> {
        caps.get(i)
            .map(|m| {
                m.as_str()
                    .parse::<i64>()
                    .map_err(|e| Error::InvalidInput(format!("Duration field {:?}: {}", m.as_str(), e)))
            })
            .transpose()
            .map(|v| v.unwrap_or(0))
    };

    let weeks = field(1)?;
    let days = field(2)?;
    let hours = field(3)?;
    let minutes = field(4)?;
    let seconds = field(5)?;
    let millis = caps
        .get(6)
        .map(|m| {
            // Fraction digits beyond milliseconds are truncated
            let digits: String = m.as_str().chars().chain("000".chars()).take(3).collect();
            digits.parse::<i64>().unwrap_or(0)
        })
        .unwrap_or(0);

    let total_ms = weeks
        .checked_mul(7)
        .and_then(|d| d.checked_add(days))
        .and_then(|d| d.checked_mul(24))
        .and_then(|h| h.checked_add(hours))
        .and_then(|h| h.checked_mul(60))
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(60_000))
        .and_then(|ms| ms.checked_add(seconds.checked_mul(1000)?))
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(|| Error::InvalidInput(format!("Duration out of range: {:?}", value)))?;

    Duration::try_milliseconds(total_ms)
        .ok_or_else(|| Error::InvalidInput(format!("Duration out of range: {:?}", value)))
}

/// Format a duration as a canonical ISO-8601 string (`P2D`, `PT12H`, `P1DT6H30M`).
///
/// Non-positive durations format as `PT0S`.
pub fn format_iso_duration(duration: Duration) -> String {
    let total_ms = duration.num_milliseconds();
    if total_ms <= 0 {
        return "PT0S".to_string();
    }

    let days = total_ms / 86_400_000;
    let hours = (total_ms % 86_400_000) / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || seconds > 0 || millis > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if millis > 0 {
            out.push_str(&format!("{}.{:03}S", seconds, millis));
        } else if seconds > 0 {
            out.push_str(&format!("{}S", seconds));
        }
    }
    out
}

/// Parse a fixed UTC offset (`+00:00`, `-08:00`, `-0800`, `Z`, `UTC`, `GMT`).
pub fn parse_fixed_offset(value: &str) -> Result<FixedOffset> {
    let trimmed = value.trim();
    if matches!(trimmed.to_ascii_uppercase().as_str(), "Z" | "UTC" | "GMT") {
        return FixedOffset::east_opt(0).ok_or_else(|| Error::Internal("zero offset".into()));
    }

    let caps = OFFSET_RE
        .captures(trimmed)
        .ok_or_else(|| Error::InvalidInput(format!("Not a UTC offset: {:?}", value)))?;
    let hours: i32 = caps[2]
        .parse()
        .map_err(|e| Error::InvalidInput(format!("Offset hours {:?}: {}", value, e)))?;
    let minutes: i32 = caps
        .get(3)
        .map(|m| m.as_str().parse())
        .transpose()
        .map_err(|e| Error::InvalidInput(format!("Offset minutes {:?}: {}", value, e)))?
        .unwrap_or(0);
    let seconds = hours * 3600 + minutes * 60;
    let signed = if &caps[1] == "-" { -seconds } else { seconds };

    FixedOffset::east_opt(signed)
        .ok_or_else(|| Error::InvalidInput(format!("UTC offset out of range: {:?}", value)))
}

/// Interpret a zone-less local timestamp in `offset`.
pub fn parse_naive_local(value: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| Error::Parse(format!("Unrecognized local timestamp: {:?}", value)))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::Parse(format!("Ambiguous local timestamp: {:?}", value)))
}

/// Parse an instant: RFC 3339 first, then a naive local time in `local_offset`.
pub fn parse_instant(value: &str, local_offset: FixedOffset) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    parse_naive_local(trimmed, local_offset)
}

/// Serde adapter storing a `FixedOffset` as its `+HH:MM` string
pub mod offset_serde {
    use chrono::FixedOffset;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(offset: &FixedOffset, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&offset.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<FixedOffset, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_fixed_offset(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter storing a `chrono::Duration` as an ISO-8601 string
pub mod duration_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_iso_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_iso_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_days_and_hours() {
        assert_eq!(parse_iso_duration("P2D").unwrap(), Duration::days(2));
        assert_eq!(parse_iso_duration("PT12H").unwrap(), Duration::hours(12));
        assert_eq!(parse_iso_duration("p1w").unwrap(), Duration::days(7));
        assert_eq!(
            parse_iso_duration("P1DT6H30M").unwrap(),
            Duration::days(1) + Duration::hours(6) + Duration::minutes(30)
        );
        assert_eq!(
            parse_iso_duration("PT1.5S").unwrap(),
            Duration::milliseconds(1500)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_iso_duration("").is_err());
        assert!(parse_iso_duration("P").is_err());
        assert!(parse_iso_duration("PT").is_err());
        assert!(parse_iso_duration("P1Y").is_err());
        assert!(parse_iso_duration("2 days").is_err());
        assert!(matches!(
            parse_iso_duration("P9000000000000000000W"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            parse_iso_duration("PT9223372036854775807S"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_format_round_trips_canonical_strings() {
        for s in ["P2D", "PT12H", "P1DT6H30M", "PT45S", "PT1.500S"] {
            assert_eq!(format_iso_duration(parse_iso_duration(s).unwrap()), s);
        }
        assert_eq!(format_iso_duration(Duration::zero()), "PT0S");
    }

    #[test]
    fn test_parse_fixed_offset() {
        assert_eq!(parse_fixed_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_fixed_offset("GMT").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_fixed_offset("-08:00").unwrap().local_minus_utc(), -8 * 3600);
        assert_eq!(parse_fixed_offset("+0530").unwrap().local_minus_utc(), 5 * 3600 + 1800);
        assert!(parse_fixed_offset("PST").is_err());
    }

    #[test]
    fn test_naive_local_in_offset() {
        let pst = parse_fixed_offset("-08:00").unwrap();
        let instant = parse_naive_local("2025-01-21 17:50:00", pst).unwrap();
        assert_eq!(instant.to_rfc3339(), "2025-01-22T01:50:00+00:00");
    }

    #[test]
    fn test_parse_instant_prefers_rfc3339() {
        let pst = parse_fixed_offset("-08:00").unwrap();
        let explicit = parse_instant("2025-01-21T10:00:00Z", pst).unwrap();
        assert_eq!(explicit.to_rfc3339(), "2025-01-21T10:00:00+00:00");

        let naive = parse_instant("2025-01-21T10:00", pst).unwrap();
        assert_eq!(naive.to_rfc3339(), "2025-01-21T18:00:00+00:00");
    }

    #[test]
    fn test_parse_instant_rejects_garbage() {
        let utc = parse_fixed_offset("UTC").unwrap();
        assert!(parse_instant("yesterday", utc).is_err());
    }
}
