//! Value types shared between engines and the handle manager.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::EngineError;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary. Parsed from and displayed as
/// lowercase hex, so catalog hashes compare equal regardless of case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string.
    ///
    /// # Errors
    /// - `EngineError::InvalidInfoHash` - Not exactly 20 bytes of hex
    pub fn from_hex(value: &str) -> Result<Self, EngineError> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(value.trim(), &mut bytes).map_err(|_| {
            EngineError::InvalidInfoHash {
                value: value.to_string(),
            }
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for InfoHash {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TorrentFile {
    /// Path relative to the torrent root
    pub name: String,
    /// File size in bytes
    pub length: u64,
    /// Byte offset of the file within the concatenated torrent content
    pub offset: u64,
}

impl TorrentFile {
    pub fn new(name: impl Into<String>, length: u64, offset: u64) -> Self {
        Self {
            name: name.into(),
            length,
            offset,
        }
    }
}

/// Download priority for a piece.
///
/// Ordered so that a greater value is fetched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PiecePriority {
    /// Default for every piece, set once when a handle is created
    Background = 0,
    /// Far end of the lookahead window
    Low = 1,
    /// Middle of the lookahead window
    Normal = 2,
    /// Pieces just past the requested range
    High = 3,
    /// Pieces a reader is blocked on
    Critical = 4,
}

/// Per-add options forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOptions {
    pub max_web_conns: u32,
    pub skip_verify: bool,
    pub destroy_store_on_remove: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            max_web_conns: 20,
            skip_verify: false,
            destroy_store_on_remove: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_hex_roundtrip_is_lowercase() {
        let upper = "AABBCCDDEEFF00112233445566778899AABBCCDD";
        let hash = InfoHash::from_hex(upper).unwrap();
        assert_eq!(hash.to_string(), upper.to_lowercase());
        assert_eq!(hash, upper.to_lowercase().parse().unwrap());
    }

    #[test]
    fn test_info_hash_rejects_bad_input() {
        assert!(InfoHash::from_hex("abc").is_err());
        assert!(InfoHash::from_hex(&"zz".repeat(20)).is_err());
        assert!(InfoHash::from_hex(&"00".repeat(21)).is_err());
    }

    #[test]
    fn test_info_hash_serde_as_hex_string() {
        let hash = InfoHash::new([0xab; 20]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));

        let parsed: InfoHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PiecePriority::Critical > PiecePriority::High);
        assert!(PiecePriority::High > PiecePriority::Normal);
        assert!(PiecePriority::Low > PiecePriority::Background);
    }
}
