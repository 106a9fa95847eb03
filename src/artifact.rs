//! Result handles and transportable artifact references

use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque backend-issued reference to a materialized result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheResult {
    /// Result id, unique within a result storage
    pub id: String,
    /// When the result was materialized
    pub created_at: DateTime<Utc>,
}

impl CacheResult {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }
}

/// In-process handle to a loaded result
///
/// Implemented by whatever the execution engine produces; the cache core
/// only needs its identity and size.
pub trait BuildResult: Send + Sync + fmt::Debug {
    /// Stable id of the result content
    fn id(&self) -> String;

    /// Byte size of the result (0 when unknown)
    fn size(&self) -> u64;
}

/// One content-addressed blob of a remote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Media type of the blob
    pub media_type: String,
    /// Content digest of the blob
    pub digest: Digest,
    /// Blob size in bytes
    #[serde(default)]
    pub size: u64,
    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Transportable reference to a result's content
///
/// Descriptors form a chain ordered base first; the last descriptor is the
/// one the result itself corresponds to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Remote {
    pub descriptors: Vec<Descriptor>,
}

impl Remote {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        Self { descriptors }
    }

    /// The descriptor of the result itself
    pub fn top(&self) -> Option<&Descriptor> {
        self.descriptors.last()
    }
}

/// Compression algorithm for exported blobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Uncompressed,
    #[default]
    Gzip,
    Zstd,
    Estargz,
}

impl CompressionType {
    /// Media type suffix used to recognise blobs of this compression
    pub fn media_type_suffix(&self) -> &'static str {
        match self {
            Self::Uncompressed => ".tar",
            Self::Gzip | Self::Estargz => ".tar+gzip",
            Self::Zstd => ".tar+zstd",
        }
    }

    /// Whether a media type carries this compression
    pub fn matches_media_type(&self, media_type: &str) -> bool {
        media_type.ends_with(self.media_type_suffix())
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uncompressed => "uncompressed",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Estargz => "estargz",
        };
        write!(f, "{}", name)
    }
}

/// Compression preference forwarded to `ResultStorage::load_remotes`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub compression: CompressionType,
    /// Compression level, algorithm default when unset
    pub level: Option<i32>,
    /// Only accept blobs already in this compression
    pub force: bool,
}

impl CompressionConfig {
    pub fn new(compression: CompressionType) -> Self {
        Self {
            compression,
            level: None,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Sessions that may be used to locate or authorize remote content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGroup {
    pub session_ids: Vec<String>,
}

impl SessionGroup {
    pub fn new(session_ids: Vec<String>) -> Self {
        Self { session_ids }
    }

    /// A group holding one freshly generated session id
    pub fn local() -> Self {
        Self::new(vec![uuid::Uuid::new_v4().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(media_type: &str, data: &[u8]) -> Descriptor {
        Descriptor {
            media_type: media_type.to_string(),
            digest: Digest::from_bytes(data),
            size: data.len() as u64,
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn remote_top_is_last_descriptor() {
        let remote = Remote::new(vec![
            descriptor("application/vnd.oci.image.layer.v1.tar+gzip", b"base"),
            descriptor("application/vnd.oci.image.layer.v1.tar+gzip", b"app"),
        ]);
        assert_eq!(remote.top().unwrap().digest, Digest::from_bytes(b"app"));
        assert!(Remote::default().top().is_none());
    }

    #[test]
    fn compression_matches_media_type() {
        let gz = "application/vnd.oci.image.layer.v1.tar+gzip";
        assert!(CompressionType::Gzip.matches_media_type(gz));
        assert!(!CompressionType::Zstd.matches_media_type(gz));
        assert!(CompressionType::Uncompressed
            .matches_media_type("application/vnd.oci.image.layer.v1.tar"));
    }

    #[test]
    fn compression_deserializes_lowercase() {
        let cfg: CompressionConfig =
            toml::from_str("compression = \"zstd\"\nforce = true").unwrap();
        assert_eq!(cfg.compression, CompressionType::Zstd);
        assert!(cfg.force);
        assert_eq!(cfg.level, None);
    }
}
