//! RunTime/ValidTime normalization and LevelKey canonicalization.
//!
//! Mirrors `_parse_time`/`_normalize_level` in the original `routers/vector.py`:
//! both ISO8601-with-Z and the compact `YYYYMMDDTHHMMSSZ` key format are
//! accepted on input; output is always normalized to UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub const TIME_KEY_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const ISO_Z_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parses a timestamp in ISO8601 (with trailing `Z`) or the compact
/// `YYYYMMDDTHHMMSSZ` key format, normalizing to UTC at second resolution.
pub fn parse_time(value: &str, label: &str) -> Result<DateTime<Utc>, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err(format!("{label} must not be empty"));
    }

    if let Some(parsed) = try_parse_compact(raw) {
        return Ok(parsed);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc).trunc_seconds());
    }

    // Accept bare "YYYY-MM-DDTHH:MM:SS" (no zone) as implicitly UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S")
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(format!(
        "{label} must be an ISO8601 timestamp or YYYYMMDDTHHMMSSZ"
    ))
}

fn try_parse_compact(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, TIME_KEY_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

trait TruncSeconds {
    fn trunc_seconds(self) -> Self;
}

impl TruncSeconds for DateTime<Utc> {
    fn trunc_seconds(self) -> Self {
        Utc.timestamp_opt(self.timestamp(), 0).single().unwrap_or(self)
    }
}

/// Key format used for directories, cache keys, and ETag context:
/// `^[0-9]{8}T[0-9]{6}Z$`.
pub fn time_key(dt: DateTime<Utc>) -> String {
    dt.format(TIME_KEY_FORMAT).to_string()
}

/// Payload-metadata format: `YYYY-MM-DDTHH:MM:SSZ`.
pub fn iso_z(dt: DateTime<Utc>) -> String {
    dt.format(ISO_Z_FORMAT).to_string()
}

/// Parses a `time_key` string back into a UTC instant, returning `None` for
/// anything not matching `^[0-9]{8}T[0-9]{6}Z$`.
pub fn parse_time_key(value: &str) -> Option<DateTime<Utc>> {
    try_parse_compact(value)
}

/// Canonical vertical-level identifier.
///
/// Integer hPa values render as the bare integer (`850`); non-integer values
/// replace `.` with `p` (`0p5`). `sfc` is the reserved surface sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelKey {
    Surface,
    Numeric { key: String, value: f64 },
}

impl LevelKey {
    pub fn as_str(&self) -> &str {
        match self {
            LevelKey::Surface => "sfc",
            LevelKey::Numeric { key, .. } => key,
        }
    }

    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            LevelKey::Surface => None,
            LevelKey::Numeric { value, .. } => Some(*value),
        }
    }

    /// Parses `sfc`/`surface` (case-insensitive) or a numeric value with an
    /// optional `hPa` suffix, e.g. `850`, `850hPa`, `0.5`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let raw = value.trim();
        if raw.is_empty() {
            return Err("level must not be empty".to_string());
        }
        let lowered = raw.to_lowercase();
        if lowered == "sfc" || lowered == "surface" {
            return Ok(LevelKey::Surface);
        }

        let stripped = lowered.strip_suffix("hpa").unwrap_or(&lowered).trim();
        let numeric: f64 = stripped
            .parse()
            .map_err(|_| "level must be 'sfc' or a numeric pressure level".to_string())?;
        if !numeric.is_finite() {
            return Err("level must be a finite number".to_string());
        }
        Ok(Self::from_numeric(numeric))
    }

    pub fn from_numeric(value: f64) -> Self {
        if value.fract() == 0.0 {
            LevelKey::Numeric {
                key: format!("{}", value as i64),
                value,
            }
        } else {
            let key = format!("{value}").replace('.', "p");
            LevelKey::Numeric { key, value }
        }
    }
}

impl std::fmt::Display for LevelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `^[A-Za-z0-9_-]+$`, with `sfc` reserved for the surface sentinel.
pub fn is_valid_level_key_format(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_and_iso_equivalently() {
        let a = parse_time("20260101T000000Z", "run").unwrap();
        let b = parse_time("2026-01-01T00:00:00Z", "run").unwrap();
        assert_eq!(a, b);
        assert_eq!(time_key(a), "20260101T000000Z");
    }

    #[test]
    fn round_trips_time_key() {
        let dt = parse_time("20260315T061500Z", "run").unwrap();
        let key = time_key(dt);
        assert_eq!(parse_time_key(&key).unwrap(), dt);
    }

    #[test]
    fn level_key_stable_across_equivalent_inputs() {
        for input in ["850", "850.0", "850hPa", "850HPA"] {
            assert_eq!(LevelKey::parse(input).unwrap().as_str(), "850");
        }
        for input in ["sfc", "SFC", "surface", "Surface"] {
            assert_eq!(LevelKey::parse(input).unwrap(), LevelKey::Surface);
        }
        assert_eq!(LevelKey::parse("0.5").unwrap().as_str(), "0p5");
    }

    #[test]
    fn rejects_non_finite_or_empty_level() {
        assert!(LevelKey::parse("").is_err());
        assert!(LevelKey::parse("not-a-number").is_err());
    }
}
