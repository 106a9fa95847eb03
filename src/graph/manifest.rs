//! Graph manifest schema
//!
//! A manifest declares keys bottom-up. Dependencies may only name keys
//! declared earlier, so every manifest describes an acyclic graph.

use crate::artifact::Remote;
use crate::error::{CacheGraphError, CacheGraphResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Root manifest document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphManifest {
    #[serde(default)]
    pub keys: Vec<KeySpec>,

    /// Result ids released from key storage after loading
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub released: Vec<String>,
}

/// One cache key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySpec {
    pub id: String,

    /// Vertex label, hashed into the vertex digest
    pub vtx: String,

    #[serde(default)]
    pub output: usize,

    /// Dependency slots, each a list of alternatives
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<Vec<DepSpec>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultSpec>,

    /// Edges known only to the key storage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepSpec {
    pub key: String,
    #[serde(default)]
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSpec {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
}

/// Backend edge from an undeclared source into a key's input slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Source label, hashed into the source digest
    pub source: String,
    #[serde(default)]
    pub input: usize,
    #[serde(default)]
    pub selector: String,
}

/// Serialization of a manifest file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Json,
}

impl ManifestFormat {
    /// Pick the format from a file extension; anything but `.json` is TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl GraphManifest {
    /// Read, parse and validate a manifest file
    pub async fn load(path: &Path) -> CacheGraphResult<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CacheGraphError::io(format!("reading manifest {}", path.display()), e))?;

        let manifest = Self::parse(&content, ManifestFormat::from_path(path), path)?;
        debug!(
            "Loaded manifest {} with {} key(s)",
            path.display(),
            manifest.keys.len()
        );
        Ok(manifest)
    }

    /// Parse and validate manifest text; `path` is only used in errors
    pub fn parse(content: &str, format: ManifestFormat, path: &Path) -> CacheGraphResult<Self> {
        let invalid = |reason: String| CacheGraphError::GraphInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let manifest: Self = match format {
            ManifestFormat::Toml => toml::from_str(content).map_err(|e| invalid(e.to_string()))?,
            ManifestFormat::Json => {
                serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?
            }
        };
        manifest.validate().map_err(invalid)?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), String> {
        let mut declared = HashSet::new();
        let mut result_ids = HashSet::new();

        for key in &self.keys {
            if key.id.is_empty() {
                return Err("key with empty id".to_string());
            }
            for (slot, alternatives) in key.deps.iter().enumerate() {
                if alternatives.is_empty() {
                    return Err(format!("key '{}' has empty dependency slot {}", key.id, slot));
                }
                for dep in alternatives {
                    if !declared.contains(dep.key.as_str()) {
                        return Err(format!(
                            "key '{}' depends on '{}', which is not declared before it",
                            key.id, dep.key
                        ));
                    }
                }
            }
            for link in &key.extra_links {
                if link.input >= key.deps.len() {
                    return Err(format!(
                        "extra link of key '{}' targets missing input slot {}",
                        key.id, link.input
                    ));
                }
            }
            for res in &key.results {
                result_ids.insert(res.id.as_str());
            }
            if !declared.insert(key.id.as_str()) {
                return Err(format!("duplicate key id '{}'", key.id));
            }
        }

        for id in &self.released {
            if !result_ids.contains(id.as_str()) {
                return Err(format!("released result '{}' is not declared", id));
            }
        }
        Ok(())
    }

    pub fn key(&self, id: &str) -> Option<&KeySpec> {
        self.keys.iter().find(|k| k.id == id)
    }
}
