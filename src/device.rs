//! Beacon identity.
//!
//! A device is identified by its hardware address as reported by the scanner.
//! The identity is opaque: equality is an exact string match, so
//! `AA:BB:CC:DD:EE:FF` and `aa:bb:cc:dd:ee:ff` are different devices.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a beacon, used as the key for rate limiting,
/// interest filtering and remote paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Raw 6-byte hardware addresses are rendered the way BlueZ prints them.
impl From<[u8; 6]> for DeviceId {
    fn from(bytes: [u8; 6]) -> Self {
        Self(format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        ))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for DeviceId {
    fn from(addr: bluer::Address) -> Self {
        addr.0.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_from_bytes() {
        let id = DeviceId::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_display_with_zeros() {
        let id = DeviceId::from([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(id.as_str(), "00:01:02:03:04:05");
    }

    #[test]
    fn test_equality_is_exact() {
        assert_eq!(DeviceId::from("AA:11"), DeviceId::new("AA:11".to_string()));
        assert_ne!(DeviceId::from("AA:11"), DeviceId::from("aa:11"));
    }

    #[test]
    fn test_from_str_keeps_input() {
        let id: DeviceId = "not-a-mac".parse().unwrap();
        assert_eq!(id.as_str(), "not-a-mac");
    }

    #[test]
    fn test_serde_is_plain_string() {
        let id = DeviceId::from("AA:BB:CC:DD:EE:01");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:01\"");
        let back: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_hash_equality() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(DeviceId::from("AA:BB:CC:DD:EE:FF"), "test");
        assert_eq!(map.get(&DeviceId::from("AA:BB:CC:DD:EE:FF")), Some(&"test"));
    }
}
