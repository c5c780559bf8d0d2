//! KNX group and individual addresses.
//!
//! Group addresses are the multicast destinations a value is written to. They are
//! accepted in the three notations found in ETS exports and gateway configs:
//!
//! - 3-level `main/middle/sub` (5/3/8 bits) -- e.g. `"1/2/3"`
//! - 2-level `main/sub` (5/11 bits) -- e.g. `"1/515"`
//! - free, a bare 16-bit integer -- e.g. `"2563"`
//!
//! Individual addresses (`area.line.device`, 4/4/8 bits) identify the sender.

use std::fmt;
use std::str::FromStr;

use crate::error::{KnxError, Result};

/// A 16-bit KNX group address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress(u16);

impl GroupAddress {
    /// Build from the raw 16-bit wire value.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit wire value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Main group (top 5 bits).
    pub const fn main(self) -> u8 {
        (self.0 >> 11) as u8
    }

    /// Middle group of the 3-level notation.
    pub const fn middle(self) -> u8 {
        ((self.0 >> 8) & 0x07) as u8
    }

    /// Sub group of the 3-level notation.
    pub const fn sub(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || KnxError::InvalidGroupAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split('/').collect();

        let raw = match parts.as_slice() {
            [free] => free.parse::<u16>().map_err(|_| invalid())?,
            [main, sub] => {
                let main = parse_part(main, 31).ok_or_else(invalid)?;
                let sub = parse_part(sub, 2047).ok_or_else(invalid)?;
                (main << 11) | sub
            }
            [main, middle, sub] => {
                let main = parse_part(main, 31).ok_or_else(invalid)?;
                let middle = parse_part(middle, 7).ok_or_else(invalid)?;
                let sub = parse_part(sub, 255).ok_or_else(invalid)?;
                (main << 11) | (middle << 8) | sub
            }
            _ => return Err(invalid()),
        };

        // 0/0/0 is the broadcast address and never a valid write target.
        if raw == 0 {
            return Err(invalid());
        }
        Ok(Self(raw))
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

/// A 16-bit KNX individual (physical) address, `area.line.device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndividualAddress(u16);

impl IndividualAddress {
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl Default for IndividualAddress {
    /// `15.15.250`, the address commonly used by IP clients that do not own one.
    fn default() -> Self {
        Self((15 << 12) | (15 << 8) | 250)
    }
}

impl FromStr for IndividualAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || KnxError::InvalidIndividualAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [area, line, device] => {
                let area = parse_part(area, 15).ok_or_else(invalid)?;
                let line = parse_part(line, 15).ok_or_else(invalid)?;
                let device = parse_part(device, 255).ok_or_else(invalid)?;
                Ok(Self((area << 12) | (line << 8) | device))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0 >> 12, (self.0 >> 8) & 0x0f, self.0 & 0xff)
    }
}

fn parse_part(part: &str, max: u16) -> Option<u16> {
    part.trim().parse::<u16>().ok().filter(|v| *v <= max)
}
