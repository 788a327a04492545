//! Value converters applied after a field reference resolves
//!
//! Converters run strictly in declared order and never infer a unit from
//! context: `*duration_seconds` always yields float seconds,
//! `*duration_nanoseconds` always yields integer nanoseconds.

use std::net::IpAddr;

use chrono::DateTime;

use crate::error::{AgentError, AgentResult};
use crate::value::DataValue;

pub const META_DURATION_SECONDS: &str = "*duration_seconds";
pub const META_DURATION_NANOSECONDS: &str = "*duration_nanoseconds";
pub const META_DURATION_MINUTES: &str = "*duration_minutes";
pub const META_DURATION: &str = "*duration";
pub const META_DURATION_FORMAT: &str = "*duration_format";
pub const META_ROUND: &str = "*round";
pub const META_MULTIPLY: &str = "*multiply";
pub const META_DIVIDE: &str = "*divide";
pub const META_LEN: &str = "*len";
pub const META_FLOAT64: &str = "*float64";
pub const META_IP2HEX: &str = "*ip2hex";
pub const META_STRING2HEX: &str = "*string2hex";
pub const META_UNIXTIME: &str = "*unixtime";

/// Rounding direction for `*round`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMethod {
    Middle,
    Up,
    Down,
}

impl RoundingMethod {
    fn parse(s: &str) -> AgentResult<Self> {
        match s {
            "*middle" => Ok(Self::Middle),
            "*up" => Ok(Self::Up),
            "*down" => Ok(Self::Down),
            other => Err(AgentError::UnsupportedConverter(format!("{META_ROUND}:{other}"))),
        }
    }
}

/// Round `x` to `decimals` places
pub fn round(x: f64, decimals: i32, method: RoundingMethod) -> f64 {
    let pow = 10f64.powi(decimals);
    let scaled = x * pow;
    let rounded = match method {
        RoundingMethod::Middle => scaled.round(),
        RoundingMethod::Up => scaled.ceil(),
        RoundingMethod::Down => scaled.floor(),
    };
    rounded / pow
}

/// One step of a conversion chain
#[derive(Debug, Clone, PartialEq)]
pub enum DataConverter {
    DurationSeconds,
    DurationNanoseconds,
    DurationMinutes,
    Duration,
    DurationFormat(String),
    Round { decimals: i32, method: RoundingMethod },
    Multiply(f64),
    Divide(f64),
    Len,
    Float64,
    Ip2Hex,
    String2Hex,
    UnixTime,
}

impl DataConverter {
    /// Build a converter from its rule, e.g. `*round:2:*up`
    pub fn parse(params: &str) -> AgentResult<Self> {
        let unsupported = || AgentError::UnsupportedConverter(params.to_string());
        let (name, args) = match params.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (params, None),
        };
        let conv = match (name, args) {
            (META_DURATION_SECONDS, None) => Self::DurationSeconds,
            (META_DURATION_NANOSECONDS, None) => Self::DurationNanoseconds,
            (META_DURATION_MINUTES, None) => Self::DurationMinutes,
            (META_DURATION, None) => Self::Duration,
            (META_DURATION_FORMAT, layout) => {
                Self::DurationFormat(layout.unwrap_or("%H:%M:%S").to_string())
            }
            (META_ROUND, None) => Self::Round {
                decimals: 0,
                method: RoundingMethod::Middle,
            },
            (META_ROUND, Some(args)) => {
                let (dec, method) = match args.split_once(':') {
                    Some((d, m)) => (d, RoundingMethod::parse(m)?),
                    None => (args, RoundingMethod::Middle),
                };
                Self::Round {
                    decimals: dec.parse().map_err(|_| unsupported())?,
                    method,
                }
            }
            (META_MULTIPLY, Some(v)) => Self::Multiply(v.parse().map_err(|_| unsupported())?),
            (META_DIVIDE, Some(v)) => Self::Divide(v.parse().map_err(|_| unsupported())?),
            (META_LEN, None) => Self::Len,
            (META_FLOAT64, None) => Self::Float64,
            (META_IP2HEX, None) => Self::Ip2Hex,
            (META_STRING2HEX, None) => Self::String2Hex,
            (META_UNIXTIME, None) => Self::UnixTime,
            _ => return Err(unsupported()),
        };
        Ok(conv)
    }

    /// Apply the converter
    pub fn convert(&self, input: DataValue) -> AgentResult<DataValue> {
        match self {
            Self::DurationSeconds => Ok(DataValue::Float(input.as_duration()?.as_secs_f64())),
            Self::DurationNanoseconds => {
                let nanos = input.as_duration()?.as_nanos();
                i64::try_from(nanos)
                    .map(DataValue::Int)
                    .map_err(|_| AgentError::conversion(nanos, "int64"))
            }
            Self::DurationMinutes => Ok(DataValue::Float(input.as_duration()?.as_secs_f64() / 60.0)),
            Self::Duration => Ok(DataValue::Duration(input.as_duration()?)),
            Self::DurationFormat(layout) => {
                let d = input.as_duration()?;
                let secs = i64::try_from(d.as_secs()).map_err(|_| AgentError::conversion(&input, "time"))?;
                let t = DateTime::from_timestamp(secs, d.subsec_nanos())
                    .ok_or_else(|| AgentError::conversion(&input, "time"))?;
                Ok(DataValue::Str(t.format(layout).to_string()))
            }
            Self::Round { decimals, method } => {
                Ok(DataValue::Float(round(input.as_f64()?, *decimals, *method)))
            }
            Self::Multiply(v) => Ok(DataValue::Float(input.as_f64()? * v)),
            Self::Divide(v) => Ok(DataValue::Float(input.as_f64()? / v)),
            Self::Len => Ok(DataValue::Int(input.to_string().len() as i64)),
            Self::Float64 => Ok(DataValue::Float(input.as_f64()?)),
            Self::Ip2Hex => Ok(DataValue::Str(ip_to_hex(&input))),
            Self::String2Hex => {
                let hex = to_hex(input.to_string().as_bytes());
                if hex.is_empty() {
                    Ok(DataValue::Str(hex))
                } else {
                    Ok(DataValue::Str(format!("0x{hex}")))
                }
            }
            Self::UnixTime => Ok(DataValue::Int(input.as_time("")?.timestamp())),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// IPv4 addresses render as `0x` plus eight hex digits
fn ip_to_hex(input: &DataValue) -> String {
    let ip = match input {
        DataValue::Ip(ip) => Some(*ip),
        other => other.to_string().parse::<IpAddr>().ok(),
    };
    match ip {
        Some(IpAddr::V4(v4)) => format!("0x{}", to_hex(&v4.octets())),
        Some(IpAddr::V6(v6)) => {
            let hex = to_hex(&v6.octets());
            format!("0x{}", &hex[hex.len() - 8..])
        }
        None => String::new(),
    }
}

/// Parse a `&`-separated converter chain
pub fn parse_converters(rules: &str) -> AgentResult<Vec<DataConverter>> {
    rules
        .split('&')
        .filter(|r| !r.is_empty())
        .map(DataConverter::parse)
        .collect()
}

/// Run `input` through every converter in order
pub fn convert_all(converters: &[DataConverter], input: DataValue) -> AgentResult<DataValue> {
    converters.iter().try_fold(input, |v, c| c.convert(v))
}
