//! Pool data models

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// A single proxy capability tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Http,
    Https,
    Socks5,
    Custom,
}

impl Capability {
    /// Stage order used by the validator
    pub const ALL: [Capability; 4] = [
        Capability::Http,
        Capability::Https,
        Capability::Socks5,
        Capability::Custom,
    ];

    pub fn mask(self) -> CapabilityMask {
        match self {
            Capability::Http => CapabilityMask::HTTP,
            Capability::Https => CapabilityMask::HTTPS,
            Capability::Socks5 => CapabilityMask::SOCKS5,
            Capability::Custom => CapabilityMask::CUSTOM,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Http => write!(f, "http"),
            Capability::Https => write!(f, "https"),
            Capability::Socks5 => write!(f, "socks5"),
            Capability::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Capability::Http),
            "https" => Ok(Capability::Https),
            "socks5" => Ok(Capability::Socks5),
            "custom" => Ok(Capability::Custom),
            other => Err(Error::Config(format!(
                "Invalid capability: {}. Use: http, https, socks5, custom",
                other
            ))),
        }
    }
}

/// Bit-set of capabilities a proxy has been verified to support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    pub const NONE: CapabilityMask = CapabilityMask(0);
    pub const HTTP: CapabilityMask = CapabilityMask(0x1);
    pub const HTTPS: CapabilityMask = CapabilityMask(0x10);
    pub const SOCKS5: CapabilityMask = CapabilityMask(0x100);
    pub const CUSTOM: CapabilityMask = CapabilityMask(0x1000);

    const KNOWN: u32 = 0x1111;

    /// Build a mask from raw bits, dropping bits that name no capability
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::KNOWN)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`
    pub fn contains(self, other: CapabilityMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.mask().0;
    }

    pub fn capabilities(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |c| self.contains(c.mask()))
    }
}

impl BitOr for CapabilityMask {
    type Output = CapabilityMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        CapabilityMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for CapabilityMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<Capability> for CapabilityMask {
    fn from(capability: Capability) -> Self {
        capability.mask()
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Accepts `0x11`, `17`, or names such as `http,https` / `http|socks5`
impl FromStr for CapabilityMask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let bits = u32::from_str_radix(hex, 16)
                .map_err(|_| Error::Config(format!("Invalid capability mask: {}", s)))?;
            return Ok(Self::from_bits(bits));
        }
        if let Ok(bits) = s.parse::<u32>() {
            return Ok(Self::from_bits(bits));
        }

        let mut mask = CapabilityMask::NONE;
        for name in s.split([',', '|']).filter(|n| !n.trim().is_empty()) {
            mask.insert(name.parse()?);
        }
        Ok(mask)
    }
}

/// A qualified proxy persisted in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub address: String,
    pub capabilities: CapabilityMask,
    pub location: String,
    pub check_count: u32,
    pub fail_count: u32,
    pub last_checked_at: DateTime<Utc>,
    pub last_status: bool,
}

impl ProxyRecord {
    /// Create the record for a freshly qualified candidate
    pub fn new(address: String, location: String, capabilities: CapabilityMask) -> Self {
        Self {
            address,
            capabilities,
            location,
            check_count: 1,
            fail_count: 0,
            last_checked_at: Utc::now(),
            last_status: true,
        }
    }

    /// Apply a successful re-check
    pub fn mark_passed(&mut self, now: DateTime<Utc>) {
        self.check_count += 1;
        self.last_checked_at = now;
        self.last_status = true;
        self.fail_count = self.fail_count.saturating_sub(1);
    }

    /// Apply a failed re-check
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.check_count += 1;
        self.last_checked_at = now;
        self.last_status = false;
        self.fail_count += 1;
    }

    /// Whether the record has failed more often than tolerated
    pub fn exceeds(&self, max_fail_count: u32) -> bool {
        self.fail_count > max_fail_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_bits() {
        let mask = CapabilityMask::HTTP | CapabilityMask::SOCKS5;
        assert_eq!(mask.bits(), 0x101);
        assert!(mask.contains(CapabilityMask::HTTP));
        assert!(!mask.contains(CapabilityMask::HTTPS));
        assert!(mask.contains(CapabilityMask::NONE));
        assert!(CapabilityMask::NONE.is_empty());
    }

    #[test]
    fn test_mask_from_bits_drops_unknown() {
        assert_eq!(CapabilityMask::from_bits(0xffff).bits(), 0x1111);
    }

    #[test]
    fn test_mask_parse() {
        assert_eq!("0x11".parse::<CapabilityMask>().unwrap().bits(), 0x11);
        assert_eq!("256".parse::<CapabilityMask>().unwrap(), CapabilityMask::SOCKS5);
        assert_eq!(
            "http,https".parse::<CapabilityMask>().unwrap(),
            CapabilityMask::HTTP | CapabilityMask::HTTPS
        );
        assert_eq!(
            "HTTP|custom".parse::<CapabilityMask>().unwrap(),
            CapabilityMask::HTTP | CapabilityMask::CUSTOM
        );
        assert!("ftp".parse::<CapabilityMask>().is_err());
    }

    #[test]
    fn test_mask_display() {
        let mask = CapabilityMask::HTTP | CapabilityMask::HTTPS;
        assert_eq!(mask.to_string(), "0x11");
        let names: Vec<String> = mask.capabilities().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["http", "https"]);
    }

    #[test]
    fn test_new_record() {
        let record = ProxyRecord::new("1.2.3.4:8080".to_string(), String::new(), CapabilityMask::HTTP);
        assert_eq!(record.check_count, 1);
        assert_eq!(record.fail_count, 0);
        assert!(record.last_status);
    }

    #[test]
    fn test_fail_count_floor() {
        let mut record = ProxyRecord::new("1.2.3.4:8080".to_string(), String::new(), CapabilityMask::HTTP);
        record.mark_failed(Utc::now());
        assert_eq!(record.fail_count, 1);
        assert!(!record.last_status);

        for _ in 0..3 {
            record.mark_passed(Utc::now());
        }
        assert_eq!(record.fail_count, 0);
        assert_eq!(record.check_count, 5);
        assert!(record.last_status);
    }

    #[test]
    fn test_exceeds_boundary() {
        let mut record = ProxyRecord::new("1.2.3.4:8080".to_string(), String::new(), CapabilityMask::HTTP);
        assert!(!record.exceeds(0));
        record.mark_failed(Utc::now());
        assert!(record.exceeds(0));
        assert!(!record.exceeds(1));
    }
}
