//! Algorithm-tagged content digests
//!
//! A digest is rendered as `<algorithm>:<hex>`, for example
//! `sha256:9f86d08...`. This crate only produces sha256 digests but accepts
//! any algorithm name when parsing.

use crate::error::{CacheGraphError, CacheGraphResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// Algorithm used by `Digest::from_bytes`
pub const CANONICAL_ALGORITHM: &str = "sha256";

/// Content digest such as `sha256:<hex>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Hash `data` with sha256
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        let hash = hex::encode(hasher.finalize());
        Self(format!("{}:{}", CANONICAL_ALGORITHM, hash))
    }

    /// Parse and validate a digest string
    pub fn parse(s: &str) -> CacheGraphResult<Self> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| CacheGraphError::InvalidDigest(s.to_string()))?;

        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '+' || c == '.');
        let encoded_ok = !encoded.is_empty()
            && encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));

        if !algorithm_ok || !encoded_ok {
            return Err(CacheGraphError::InvalidDigest(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The algorithm part, e.g. `sha256`
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    /// The hex-encoded hash part
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = CacheGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = CacheGraphError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_is_deterministic() {
        let a = Digest::from_bytes(b"hello");
        let b = Digest::from_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.algorithm(), "sha256");
        assert_eq!(a.encoded().len(), 64);
        assert_ne!(a, Digest::from_bytes(b"world"));
    }

    #[test]
    fn parse_accepts_valid() {
        let d = Digest::parse("sha256:abc123").unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded(), "abc123");
        assert_eq!(d.to_string(), "sha256:abc123");
    }

    #[test]
    fn parse_rejects_invalid() {
        for bad in ["", "sha256", "sha256:", ":abc", "sha256:XYZ", "SHA256:abc", "res-1"] {
            assert!(Digest::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn serde_validates() {
        let d: Digest = serde_json::from_str("\"sha256:00ff\"").unwrap();
        assert_eq!(d.as_str(), "sha256:00ff");
        assert!(serde_json::from_str::<Digest>("\"nope\"").is_err());
    }
}
