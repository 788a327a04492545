//! Normalized scalar values shared by every data tree
//!
//! Values carry their own type so converters never have to guess. Text
//! rendering follows the conventions used on the wire by charging peers:
//! durations as `1m30s`, floats in shortest form, times as RFC 3339.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{AgentError, AgentResult};

/// Timezone keyword resolving to the host's local zone
pub const TZ_LOCAL: &str = "Local";
/// Time keyword resolving to the current instant
pub const META_NOW: &str = "*now";

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A scalar stored in a data tree or produced by a field expression
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Duration(Duration),
    Time(DateTime<Utc>),
    Ip(IpAddr),
    Bytes(Vec<u8>),
}

impl DataValue {
    /// Guess the most specific type for a textual value
    ///
    /// Integers, booleans, floats and unit-suffixed durations are recognized;
    /// anything else stays a string.
    pub fn from_str_guess(s: &str) -> DataValue {
        if let Ok(i) = s.parse::<i64>() {
            return DataValue::Int(i);
        }
        match s {
            "true" => return DataValue::Bool(true),
            "false" => return DataValue::Bool(false),
            _ => {}
        }
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return DataValue::Float(f);
            }
        }
        if s.chars().any(|c| c.is_ascii_alphabetic()) {
            if let Ok(d) = parse_go_duration(s) {
                return DataValue::Duration(d);
            }
        }
        DataValue::Str(s.to_string())
    }

    /// True for an empty string value
    pub fn is_empty(&self) -> bool {
        match self {
            DataValue::Str(s) => s.is_empty(),
            DataValue::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }

    /// Interpret the value as a floating point number
    pub fn as_f64(&self) -> AgentResult<f64> {
        match self {
            DataValue::Int(i) => Ok(*i as f64),
            DataValue::Uint(u) => Ok(*u as f64),
            DataValue::Float(f) => Ok(*f),
            DataValue::Duration(d) => Ok(d.as_nanos() as f64),
            DataValue::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| AgentError::conversion(s, "float64")),
            other => Err(AgentError::conversion(other, "float64")),
        }
    }

    /// Interpret the value as a signed integer
    pub fn as_i64(&self) -> AgentResult<i64> {
        match self {
            DataValue::Int(i) => Ok(*i),
            DataValue::Uint(u) => i64::try_from(*u).map_err(|_| AgentError::conversion(u, "int64")),
            DataValue::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            DataValue::Duration(d) => {
                i64::try_from(d.as_nanos()).map_err(|_| AgentError::conversion(self, "int64"))
            }
            DataValue::Bool(b) => Ok(i64::from(*b)),
            DataValue::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| AgentError::conversion(s, "int64")),
            other => Err(AgentError::conversion(other, "int64")),
        }
    }

    /// Interpret the value as a duration
    ///
    /// Bare integers count nanoseconds.
    pub fn as_duration(&self) -> AgentResult<Duration> {
        match self {
            DataValue::Duration(d) => Ok(*d),
            DataValue::Int(i) if *i >= 0 => Ok(Duration::from_nanos(*i as u64)),
            DataValue::Uint(u) => Ok(Duration::from_nanos(*u)),
            DataValue::Float(f) if *f >= 0.0 => Ok(Duration::from_nanos(*f as u64)),
            DataValue::Str(s) => parse_duration_with_nanos(s),
            other => Err(AgentError::conversion(other, "duration")),
        }
    }

    /// Interpret the value as a point in time
    pub fn as_time(&self, timezone: &str) -> AgentResult<DateTime<Utc>> {
        match self {
            DataValue::Time(t) => Ok(*t),
            DataValue::Int(i) => Utc
                .timestamp_opt(*i, 0)
                .single()
                .ok_or_else(|| AgentError::conversion(i, "time")),
            DataValue::Str(s) => parse_time_detect_layout(s, timezone),
            other => Err(AgentError::conversion(other, "time")),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Str(s) => f.write_str(s),
            DataValue::Int(i) => write!(f, "{i}"),
            DataValue::Uint(u) => write!(f, "{u}"),
            DataValue::Float(v) => write!(f, "{v}"),
            DataValue::Bool(b) => write!(f, "{b}"),
            DataValue::Duration(d) => f.write_str(&format_duration(*d)),
            DataValue::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            DataValue::Ip(ip) => write!(f, "{ip}"),
            DataValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => f.write_str(s),
                Err(_) => {
                    f.write_str("0x")?;
                    for byte in b {
                        write!(f, "{byte:02x}")?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::Str(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::Str(s)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<u64> for DataValue {
    fn from(v: u64) -> Self {
        DataValue::Uint(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Float(v)
    }
}

impl From<Duration> for DataValue {
    fn from(d: Duration) -> Self {
        DataValue::Duration(d)
    }
}

impl From<IpAddr> for DataValue {
    fn from(ip: IpAddr) -> Self {
        DataValue::Ip(ip)
    }
}

/// Parse a duration where a bare integer means nanoseconds
pub fn parse_duration_with_nanos(s: &str) -> AgentResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }
    if let Ok(n) = s.parse::<u64>() {
        return Ok(Duration::from_nanos(n));
    }
    parse_go_duration(s)
}

/// Parse a duration where a bare integer means seconds
pub fn parse_duration_with_secs(s: &str) -> AgentResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }
    if let Ok(n) = s.parse::<u64>() {
        return Ok(Duration::from_secs(n));
    }
    parse_go_duration(s)
}

/// Parse unit-suffixed duration text such as `1h2m3.5s` or `250ms`
pub fn parse_go_duration(s: &str) -> AgentResult<Duration> {
    let err = || AgentError::conversion(s, "duration");
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() || rest.starts_with('-') {
        return Err(err());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if num_len == 0 {
            return Err(err());
        }
        let (num, tail) = rest.split_at(num_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => return Err(err()),
        };

        let (whole, frac) = match num.split_once('.') {
            Some((w, f)) => (w, f),
            None => (num, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        total += whole * unit_nanos;
        let mut scale = unit_nanos;
        for digit in frac.chars() {
            scale /= 10;
            let d = digit.to_digit(10).ok_or_else(err)? as u128;
            total += d * scale;
        }
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| err())?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

/// Render a duration as `72h3m0.5s`, `1.5ms`, `0s`
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", fraction(nanos, 1_000, 3));
    }
    if nanos < NANOS_PER_SEC {
        return format!("{}ms", fraction(nanos, 1_000_000, 6));
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = fraction(
        u128::from(total_secs % 60) * NANOS_PER_SEC + u128::from(d.subsec_nanos()),
        NANOS_PER_SEC,
        9,
    );
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

fn fraction(value: u128, unit: u128, width: usize) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let frac = format!("{rem:0width$}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Parse a timestamp by detecting its layout
///
/// Recognized: `*now`, RFC 3339, `2006-01-02 15:04:05`,
/// `2006-01-02T15:04:05`, `20060102150405` and unix seconds. Layouts
/// without an offset are read in `timezone` (`UTC`, `Local` or `+HH:MM`).
pub fn parse_time_detect_layout(s: &str, timezone: &str) -> AgentResult<DateTime<Utc>> {
    let s = s.trim();
    let err = || AgentError::conversion(s, "time");
    if s.is_empty() {
        return Err(err());
    }
    if s == META_NOW {
        return Ok(Utc::now());
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if s.len() == 14 && s.chars().all(|c| c.is_ascii_digit()) {
        let naive = NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S").map_err(|_| err())?;
        return localize(naive, timezone).ok_or_else(err);
    }
    if let Ok(secs) = s.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single().ok_or_else(err);
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return localize(naive, timezone).ok_or_else(err);
        }
    }
    Err(err())
}

fn localize(naive: NaiveDateTime, timezone: &str) -> Option<DateTime<Utc>> {
    match timezone {
        "" | "UTC" => Some(Utc.from_utc_datetime(&naive)),
        TZ_LOCAL => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
        offset => {
            let probe = format!("2000-01-01 00:00:00 {offset}");
            let fixed: FixedOffset = *DateTime::parse_from_str(&probe, "%Y-%m-%d %H:%M:%S %:z")
                .ok()?
                .offset();
            fixed
                .from_local_datetime(&naive)
                .single()
                .map(|t| t.with_timezone(&Utc))
        }
    }
}
