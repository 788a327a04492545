//! Conversion between AVP payloads, agent values and template text
//!
//! Decoding assigns dictionary types to the raw payloads produced by the
//! codec. Encoding parses the textual result of a template into the type
//! the dictionary declares for the target AVP.

use std::net::IpAddr;

use bytes::{Buf, Bytes};
use cgr_agent::value::parse_time_detect_layout;
use cgr_agent::DataValue;
use chrono::{DateTime, TimeZone, Utc};

use crate::avp::{Avp, AvpData};
use crate::dict::{AvpDef, AvpType, Dictionary};
use crate::error::{DiameterError, DiameterResult};

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Unix time of an NTP timestamp; values with the high bit clear belong
/// to the era starting in 2036 (RFC 5905)
pub fn ntp_to_utc(secs: u32) -> Option<DateTime<Utc>> {
    let mut ntp = secs as i64;
    if secs & 0x8000_0000 == 0 {
        ntp += 1 << 32;
    }
    Utc.timestamp_opt(ntp - NTP_UNIX_OFFSET, 0).single()
}

/// First NTP second [`ntp_to_utc`] maps back, 1968-01-20T03:14:08Z
const NTP_WINDOW_START: i64 = 1 << 31;

/// NTP timestamp of `t`
///
/// Only the window [`ntp_to_utc`] decodes (1968-01-20 up to 2104-02-26)
/// fits the 32 bit field; anything else is `None`.
pub fn utc_to_ntp(t: &DateTime<Utc>) -> Option<u32> {
    let ntp = t.timestamp() + NTP_UNIX_OFFSET;
    if !(NTP_WINDOW_START..NTP_WINDOW_START + (1 << 32)).contains(&ntp) {
        return None;
    }
    Some((ntp & 0xFFFF_FFFF) as u32)
}

/// Type every AVP of `avps` (recursively) using the dictionary of `app_id`
///
/// AVPs the dictionary does not know, and payloads that do not fit their
/// declared type, are left raw; reading them later reports the problem.
pub fn expand_avps(avps: &mut [Avp], dict: &Dictionary, app_id: u32) {
    for avp in avps {
        let raw = match &mut avp.data {
            AvpData::Raw(raw) => raw,
            AvpData::Grouped(children) => {
                expand_avps(children, dict, app_id);
                continue;
            }
            _ => continue,
        };
        let Some(def) = dict.find_avp_by_code(app_id, avp.code, avp.vendor_id.unwrap_or(0)) else {
            log::debug!("AVP {} (vendor {:?}) not in dictionary", avp.code, avp.vendor_id);
            continue;
        };
        match decode_data(def, raw.clone()) {
            Ok(AvpData::Grouped(mut children)) => {
                expand_avps(&mut children, dict, app_id);
                avp.data = AvpData::Grouped(children);
            }
            Ok(data) => avp.data = data,
            Err(e) => log::debug!("AVP <{}> left undecoded: {e}", def.name),
        }
    }
}

/// Decode a raw payload as the type declared by `def`
pub fn decode_data(def: &AvpDef, mut raw: Bytes) -> DiameterResult<AvpData> {
    let len = raw.len();
    let bad_len = |want: &str| {
        DiameterError::InvalidAvp(format!("<{}> expects {want} bytes, got {len}", def.name))
    };
    let data = match def.avp_type {
        AvpType::OctetString => AvpData::OctetString(raw),
        AvpType::Utf8String => AvpData::Utf8String(utf8(def, &raw)?),
        AvpType::DiameterIdentity => AvpData::DiameterIdentity(utf8(def, &raw)?),
        AvpType::DiameterUri => AvpData::DiameterUri(utf8(def, &raw)?),
        AvpType::IpFilterRule => AvpData::IpFilterRule(utf8(def, &raw)?),
        AvpType::Integer32 | AvpType::Enumerated => {
            if raw.len() != 4 {
                return Err(bad_len("4"));
            }
            let v = raw.get_i32();
            if def.avp_type == AvpType::Enumerated {
                AvpData::Enumerated(v)
            } else {
                AvpData::Integer32(v)
            }
        }
        AvpType::Integer64 if raw.len() == 8 => AvpData::Integer64(raw.get_i64()),
        AvpType::Unsigned32 if raw.len() == 4 => AvpData::Unsigned32(raw.get_u32()),
        AvpType::Unsigned64 if raw.len() == 8 => AvpData::Unsigned64(raw.get_u64()),
        AvpType::Float32 if raw.len() == 4 => AvpData::Float32(raw.get_f32()),
        AvpType::Float64 if raw.len() == 8 => AvpData::Float64(raw.get_f64()),
        AvpType::Time if raw.len() == 4 => AvpData::Time(raw.get_u32()),
        AvpType::Integer64 | AvpType::Unsigned64 | AvpType::Float64 => return Err(bad_len("8")),
        AvpType::Unsigned32 | AvpType::Float32 | AvpType::Time => return Err(bad_len("4")),
        AvpType::Address => {
            if raw.len() < 2 {
                return Err(bad_len("at least 2"));
            }
            match (raw.get_u16(), raw.len()) {
                (1, 4) => {
                    let mut octets = [0u8; 4];
                    raw.copy_to_slice(&mut octets);
                    AvpData::Address(IpAddr::from(octets))
                }
                (2, 16) => {
                    let mut octets = [0u8; 16];
                    raw.copy_to_slice(&mut octets);
                    AvpData::Address(IpAddr::from(octets))
                }
                (family, _) => {
                    return Err(DiameterError::InvalidAvp(format!(
                        "<{}> unsupported address family {family}",
                        def.name
                    )))
                }
            }
        }
        AvpType::Grouped => {
            let mut children = Vec::new();
            while raw.has_remaining() {
                children.push(Avp::decode(&mut raw)?);
            }
            AvpData::Grouped(children)
        }
        AvpType::Unsupported => return Err(unsupported(&def.name, def.avp_type)),
    };
    Ok(data)
}

fn utf8(def: &AvpDef, raw: &Bytes) -> DiameterResult<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| DiameterError::InvalidAvp(format!("<{}> is not valid UTF-8", def.name)))
}

fn unsupported(avp: &str, datatype: impl ToString) -> DiameterError {
    DiameterError::UnsupportedType {
        avp: avp.to_string(),
        datatype: datatype.to_string(),
    }
}

/// Scalar value of a typed AVP
pub fn avp_value(avp: &Avp, name: &str) -> DiameterResult<DataValue> {
    let value = match &avp.data {
        AvpData::OctetString(b) => match std::str::from_utf8(b) {
            Ok(s) => DataValue::Str(s.to_string()),
            Err(_) => DataValue::Bytes(b.to_vec()),
        },
        AvpData::Utf8String(s)
        | AvpData::DiameterIdentity(s)
        | AvpData::DiameterUri(s)
        | AvpData::IpFilterRule(s) => DataValue::Str(s.clone()),
        AvpData::Integer32(v) | AvpData::Enumerated(v) => DataValue::Int(*v as i64),
        AvpData::Integer64(v) => DataValue::Int(*v),
        AvpData::Unsigned32(v) => DataValue::Uint(*v as u64),
        AvpData::Unsigned64(v) => DataValue::Uint(*v),
        AvpData::Float32(v) => DataValue::Float(*v as f64),
        AvpData::Float64(v) => DataValue::Float(*v),
        AvpData::Address(ip) => DataValue::Ip(*ip),
        AvpData::Time(secs) => DataValue::Time(
            ntp_to_utc(*secs)
                .ok_or_else(|| DiameterError::InvalidAvp(format!("<{name}> time out of range")))?,
        ),
        AvpData::Grouped(_) => return Err(unsupported(name, AvpType::Grouped)),
        AvpData::Raw(_) => return Err(unsupported(name, "raw")),
    };
    Ok(value)
}

/// Parse template text into the payload type `def` declares
pub fn data_from_str(def: &AvpDef, value: &str, timezone: &str) -> DiameterResult<AvpData> {
    let bad = || {
        DiameterError::Encoding(format!(
            "cannot encode <{value}> as {} for <{}>",
            def.avp_type, def.name
        ))
    };
    let trimmed = value.trim();
    let data = match def.avp_type {
        AvpType::OctetString => AvpData::OctetString(Bytes::copy_from_slice(value.as_bytes())),
        AvpType::Utf8String => AvpData::Utf8String(value.to_string()),
        AvpType::DiameterIdentity => AvpData::DiameterIdentity(value.to_string()),
        AvpType::DiameterUri => AvpData::DiameterUri(value.to_string()),
        AvpType::IpFilterRule => AvpData::IpFilterRule(value.to_string()),
        AvpType::Enumerated => AvpData::Enumerated(trimmed.parse().map_err(|_| bad())?),
        AvpType::Integer32 => AvpData::Integer32(trimmed.parse().map_err(|_| bad())?),
        AvpType::Integer64 => AvpData::Integer64(trimmed.parse().map_err(|_| bad())?),
        AvpType::Unsigned32 => AvpData::Unsigned32(trimmed.parse().map_err(|_| bad())?),
        AvpType::Unsigned64 => AvpData::Unsigned64(trimmed.parse().map_err(|_| bad())?),
        AvpType::Float32 => {
            let v: f32 = trimmed.parse().map_err(|_| bad())?;
            if !v.is_finite() {
                return Err(bad());
            }
            AvpData::Float32(v)
        }
        AvpType::Float64 => {
            let v: f64 = trimmed.parse().map_err(|_| bad())?;
            if !v.is_finite() {
                return Err(bad());
            }
            AvpData::Float64(v)
        }
        AvpType::Address => AvpData::Address(trimmed.parse().map_err(|_| bad())?),
        AvpType::Time => {
            let t = parse_time_detect_layout(trimmed, timezone).map_err(|_| bad())?;
            AvpData::Time(utc_to_ntp(&t).ok_or_else(bad)?)
        }
        AvpType::Grouped => {
            return Err(DiameterError::Encoding(format!(
                "<{}> is grouped and cannot hold a value",
                def.name
            )))
        }
        AvpType::Unsupported => return Err(unsupported(&def.name, def.avp_type)),
    };
    Ok(data)
}
