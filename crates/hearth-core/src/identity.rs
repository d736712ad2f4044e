//! Peer identity
//!
//! Every peer is identified by a stable 32-byte public identifier. On the
//! wire it is carried as a lowercase hex string.

use std::fmt::Display;
use std::str::FromStr;

use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;

/// Stable public identifier for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create a peer ID from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer ID
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s)
            .map_err(|e| IdentityError::InvalidFormat(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }

    /// Short display form (first 8 hex chars, for logging)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for PeerId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = PeerId::new([0xAB; 32]);
        let hex = id.to_string();
        assert_eq!(hex.len(), 64);

        let parsed = PeerId::from_hex(&hex).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(PeerId::from_hex("not hex").is_err());
        assert!(PeerId::from_hex("ab12").is_err());
    }

    #[test]
    fn test_json_serde() {
        let id = PeerId::new([0x01; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));

        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_short_form() {
        let id = PeerId::new([0xFF; 32]);
        assert_eq!(id.short(), "ffffffff");
    }
}
