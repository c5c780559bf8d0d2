//! Datapoint types -- the encoding a group address expects for its value.
//!
//! A [`DatapointType`] is parsed from either the numeric `main.sub` form (`"5.010"`,
//! `"9.001"`) or one of the named aliases that gateway configurations commonly use
//! (`"percent"`, `"temperature"`, `"1byte_unsigned"`, ...). [`DatapointType::encode`]
//! turns a [`DptValue`] into the [`Payload`] carried by a `GroupValueWrite`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KnxError, Result};

/// Named aliases and the DPT they stand for.
const ALIASES: &[(&str, u16, u16)] = &[
    ("switch", 1, 1),
    ("binary", 1, 2),
    ("bool", 1, 2),
    ("percent", 5, 1),
    ("angle", 5, 3),
    ("1byte_unsigned", 5, 10),
    ("pulse", 5, 10),
    ("1byte_signed", 6, 10),
    ("counter_pulses", 6, 10),
    ("2byte_unsigned", 7, 1),
    ("pulse_2byte", 7, 1),
    ("2byte_signed", 8, 1),
    ("temperature", 9, 1),
    ("illuminance", 9, 4),
    ("wind_speed_ms", 9, 5),
    ("humidity", 9, 7),
    ("ppm", 9, 8),
    ("2byte_float", 9, 0),
    ("4byte_unsigned", 12, 1),
    ("4byte_signed", 13, 1),
    ("4byte_float", 14, 0),
    ("string", 16, 0),
    ("latin_1", 16, 1),
    ("scene_number", 17, 1),
];

const SUPPORTED_MAIN: &[u16] = &[1, 5, 6, 7, 8, 9, 12, 13, 14, 16, 17];

/// Largest magnitude representable by the KNX 2-byte float (DPT 9).
const FLOAT16_MAX: f64 = 670_760.96;
const FLOAT16_MIN: f64 = -671_088.64;

/// Maximum character count of a DPT 16 string.
const STRING_LEN: usize = 14;

/// A KNX datapoint type, `main.sub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatapointType {
    main: u16,
    sub: u16,
}

impl DatapointType {
    /// Build a datapoint type, rejecting main numbers this crate cannot encode.
    pub fn new(main: u16, sub: u16) -> Result<Self> {
        if !SUPPORTED_MAIN.contains(&main) {
            return Err(KnxError::UnknownDpt(format!("{}.{:03}", main, sub)));
        }
        Ok(Self { main, sub })
    }

    pub const fn main(self) -> u16 {
        self.main
    }

    pub const fn sub(self) -> u16 {
        self.sub
    }

    /// Encode a value for this datapoint type.
    ///
    /// # Errors
    /// Returns `KnxError::InvalidValue` when the value has the wrong shape or is out
    /// of range for the DPT.
    pub fn encode(self, value: &DptValue) -> Result<Payload> {
        let invalid = |reason: &str| KnxError::InvalidValue {
            dpt: self.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match (self.main, self.sub) {
            (1, _) => {
                let on = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
                Ok(Payload::Compact(u8::from(on)))
            }
            (5, 1) => {
                let pct = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(invalid("percent must be within 0..=100"));
                }
                Ok(Payload::Bytes(vec![(pct * 255.0 / 100.0).round() as u8]))
            }
            (5, 3) => {
                let deg = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !(0.0..=360.0).contains(&deg) {
                    return Err(invalid("angle must be within 0..=360"));
                }
                Ok(Payload::Bytes(vec![(deg * 255.0 / 360.0).round() as u8]))
            }
            (5, _) => {
                let v = integer_in(value, 0, u8::MAX as i64)
                    .ok_or_else(|| invalid("expected 0..=255"))?;
                Ok(Payload::Bytes(vec![v as u8]))
            }
            (6, _) => {
                let v = integer_in(value, i8::MIN as i64, i8::MAX as i64)
                    .ok_or_else(|| invalid("expected -128..=127"))?;
                Ok(Payload::Bytes(vec![(v as i8) as u8]))
            }
            (7, _) => {
                let v = integer_in(value, 0, u16::MAX as i64)
                    .ok_or_else(|| invalid("expected 0..=65535"))?;
                Ok(Payload::Bytes((v as u16).to_be_bytes().to_vec()))
            }
            (8, _) => {
                let v = integer_in(value, i16::MIN as i64, i16::MAX as i64)
                    .ok_or_else(|| invalid("expected -32768..=32767"))?;
                Ok(Payload::Bytes((v as i16).to_be_bytes().to_vec()))
            }
            (9, _) => {
                let v = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                let raw = encode_float16(v).ok_or_else(|| invalid("out of 2-byte float range"))?;
                Ok(Payload::Bytes(raw.to_vec()))
            }
            (12, _) => {
                let v = integer_in(value, 0, u32::MAX as i64)
                    .ok_or_else(|| invalid("expected 0..=4294967295"))?;
                Ok(Payload::Bytes((v as u32).to_be_bytes().to_vec()))
            }
            (13, _) => {
                let v = integer_in(value, i32::MIN as i64, i32::MAX as i64)
                    .ok_or_else(|| invalid("expected a 32-bit signed integer"))?;
                Ok(Payload::Bytes((v as i32).to_be_bytes().to_vec()))
            }
            (14, _) => {
                let v = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !v.is_finite() || v.abs() > f32::MAX as f64 {
                    return Err(invalid("out of 4-byte float range"));
                }
                Ok(Payload::Bytes((v as f32).to_be_bytes().to_vec()))
            }
            (16, sub) => {
                let text = value.as_text();
                encode_string(&text, sub == 1)
                    .map(Payload::Bytes)
                    .ok_or_else(|| invalid("expected at most 14 encodable characters"))
            }
            (17, _) => {
                let scene = integer_in(value, 1, 64)
                    .ok_or_else(|| invalid("expected a scene 1..=64"))?;
                Ok(Payload::Bytes(vec![(scene - 1) as u8]))
            }
            _ => Err(KnxError::UnknownDpt(self.to_string())),
        }
    }
}

impl FromStr for DatapointType {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_ascii_lowercase().replace('-', "_");
        let unknown = || KnxError::UnknownDpt(s.to_string());

        // DPST-9-1 style, as exported by ETS.
        let tag = match (tag.strip_prefix("dpst_"), tag.strip_prefix("dpt_")) {
            (Some(rest), _) => rest.replacen('_', ".", 1),
            (None, Some(rest)) => rest.to_string(),
            (None, None) => tag.clone(),
        };

        if let Some((_, main, sub)) = ALIASES.iter().find(|(name, _, _)| *name == tag) {
            return Self::new(*main, *sub);
        }

        let (main, sub) = match tag.split_once('.') {
            Some((main, sub)) => (main, sub),
            None => (tag.as_str(), "0"),
        };
        let main = main.parse::<u16>().map_err(|_| unknown())?;
        let sub = sub.parse::<u16>().map_err(|_| unknown())?;
        Self::new(main, sub).map_err(|_| unknown())
    }
}

impl fmt::Display for DatapointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.main, self.sub)
    }
}

/// A configured value, before it is encoded for a particular DPT.
///
/// Deserializes from bare TOML/JSON scalars; strings are coerced when the DPT asks for
/// a number or boolean, so `value = "3"` and `value = 3` are equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DptValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DptValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(0) => Some(false),
            Self::Integer(1) => Some(true),
            Self::Text(t) => match t.trim().to_ascii_lowercase().as_str() {
                "1" | "on" | "true" | "yes" => Some(true),
                "0" | "off" | "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) if f.is_finite() => Some(*f),
            Self::Text(t) => t.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Text(t) => t.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for DptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(t) => f.write_str(t),
        }
    }
}

/// The data part of a `GroupValueWrite`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Up to 6 bits packed into the APCI octet (DPT 1).
    Compact(u8),
    /// Octets appended after the APCI.
    Bytes(Vec<u8>),
}

fn integer_in(value: &DptValue, min: i64, max: i64) -> Option<i64> {
    value.as_i64().filter(|v| (min..=max).contains(v))
}

/// Encode a KNX 2-byte float: `value = 0.01 * M * 2^E`, 12-bit two's complement M,
/// 4-bit E, laid out as `MEEEEMMM MMMMMMMM`.
pub fn encode_float16(value: f64) -> Option<[u8; 2]> {
    if !value.is_finite() || !(FLOAT16_MIN..=FLOAT16_MAX).contains(&value) {
        return None;
    }

    let mut mantissa = value * 100.0;
    let mut exponent: u16 = 0;
    while !(-2048.0..=2047.0).contains(&mantissa.round()) {
        mantissa /= 2.0;
        exponent += 1;
    }
    if exponent > 15 {
        return None;
    }

    let m = (mantissa.round() as i32 & 0x0fff) as u16;
    let raw = ((m & 0x0800) << 4) | (exponent << 11) | (m & 0x07ff);
    Some(raw.to_be_bytes())
}

fn encode_string(text: &str, latin1: bool) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(STRING_LEN);
    for c in text.chars() {
        let code = c as u32;
        let limit = if latin1 { 0xff } else { 0x7f };
        if code > limit {
            return None;
        }
        out.push(code as u8);
    }
    if out.len() > STRING_LEN {
        return None;
    }
    out.resize(STRING_LEN, 0);
    Some(out)
}
