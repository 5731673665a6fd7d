//! Six-octet radio addresses.
//!
//! Both observed BSSIDs and catalog access-point patterns share this
//! representation. Parsing accepts the forms found in catalog files and
//! NetworkManager output: `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` and bare
//! `aabbccddeeff`. Display is always upper-case and colon-separated, which is
//! what NetworkManager expects back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BssidParseError {
    #[error("expected 12 hex digits, got {0}")]
    Length(usize),
    #[error("invalid hex digit in {0:?}")]
    Digit(String),
}

/// A 6-byte MAC-style address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bssid([u8; 6]);

impl Bssid {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for Bssid {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for Bssid {
    type Err = BssidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 {
            return Err(BssidParseError::Length(digits.len()));
        }
        // from_str_radix alone would accept a leading '+'
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BssidParseError::Digit(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let pair = &digits[i * 2..i * 2 + 2];
            *octet = u8::from_str_radix(pair, 16)
                .map_err(|_| BssidParseError::Digit(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl<'de> Deserialize<'de> for Bssid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A BSSID as reported by a scan, with the fastest rate the AP advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedBssid {
    pub address: Bssid,
    /// Maximum advertised bitrate in Mbit/s.
    pub max_bitrate: u32,
}
