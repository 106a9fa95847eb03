//! CLI argument definitions using clap derive

use crate::artifact::CompressionType;
use crate::export::CacheExportMode;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// cachegraph - build cache provenance export
///
/// Loads a cache key graph from a manifest and exports it as a
/// deduplicated cache configuration.
#[derive(Parser, Debug)]
#[command(name = "cachegraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CACHEGRAPH_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a key's cache graph from a manifest
    Export(ExportArgs),

    /// Summarize an exported cache configuration
    Inspect(InspectArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the export command
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Graph manifest (.toml or .json)
    pub manifest: PathBuf,

    /// Id of the key to export
    #[arg(short, long)]
    pub key: String,

    /// Export mode (defaults to export.mode from config)
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Export keys without dependencies as metadata only
    #[arg(long)]
    pub no_roots: bool,

    /// Skip edges known only to the key storage
    #[arg(long)]
    pub ignore_backlinks: bool,

    /// Preferred layer compression
    #[arg(long, value_enum)]
    pub compression: Option<CompressionArg>,

    /// Drop remotes not in the preferred compression
    #[arg(long, requires = "compression")]
    pub force_compression: bool,

    /// Write the cache configuration here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Abort the export after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Exported cache configuration (JSON)
    pub file: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for inspect command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Keys and links only
    Min,
    /// Keys, links and remotes
    Max,
}

impl From<ModeArg> for CacheExportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Min => Self::Min,
            ModeArg::Max => Self::Max,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompressionArg {
    Uncompressed,
    Gzip,
    Zstd,
    Estargz,
}

impl From<CompressionArg> for CompressionType {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Uncompressed => Self::Uncompressed,
            CompressionArg::Gzip => Self::Gzip,
            CompressionArg::Zstd => Self::Zstd,
            CompressionArg::Estargz => Self::Estargz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_export_flags() {
        let cli = Cli::try_parse_from([
            "cachegraph",
            "-vv",
            "export",
            "graph.toml",
            "--key",
            "app",
            "--mode",
            "max",
            "--compression",
            "zstd",
            "--force-compression",
            "--no-roots",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Export(args) => {
                assert_eq!(args.key, "app");
                assert!(matches!(args.mode, Some(ModeArg::Max)));
                assert!(args.no_roots);
                assert!(args.force_compression);
                assert_eq!(
                    args.compression.map(CompressionType::from),
                    Some(CompressionType::Zstd)
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn force_compression_requires_compression() {
        let res = Cli::try_parse_from([
            "cachegraph",
            "export",
            "graph.toml",
            "--key",
            "app",
            "--force-compression",
        ]);
        assert!(res.is_err());
    }
}
