//! Configuration schema for cachegraph
//!
//! Configuration is stored at `~/.config/cachegraph/config.toml`

use crate::artifact::CompressionType;
use crate::export::CacheExportMode;
use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Export defaults
    pub export: ExportConfig,

    /// Cache manager settings
    pub cache: CacheSettings,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Defaults applied to `cachegraph export`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// "min" exports keys and links, "max" also attaches remotes
    pub mode: CacheExportMode,

    /// Attach results to keys without dependencies
    pub export_roots: bool,

    /// Skip edges known only to the key storage
    pub ignore_backlinks: bool,

    /// Preferred compression of exported layers
    pub compression: Option<CompressionType>,

    /// Drop remotes not already in the preferred compression
    pub force_compression: bool,

    /// Abort an export after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: CacheExportMode::Min,
            export_roots: true,
            ignore_backlinks: false,
            compression: None,
            force_compression: false,
            timeout_secs: None,
        }
    }
}

/// Cache manager identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Manager id keys are registered under
    pub manager_id: String,

    /// Tie-break priority of this manager's records (lower wins)
    pub priority: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            manager_id: "local".to_string(),
            priority: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[export]"));
        assert!(toml.contains("mode = \"min\""));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.manager_id, "local");
        assert!(config.export.export_roots);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [export]
            mode = "max"
            compression = "zstd"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.export.mode, CacheExportMode::Max);
        assert_eq!(config.export.compression, Some(CompressionType::Zstd));
        assert_eq!(config.general.log_format, "text"); // default preserved
    }
}
