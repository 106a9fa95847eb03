//! Export command - export a key's cache graph from a manifest

use crate::artifact::{CompressionConfig, SessionGroup};
use crate::cli::args::ExportArgs;
use crate::config::schema::ExportConfig;
use crate::config::Config;
use crate::context::Context;
use crate::error::{CacheGraphError, CacheGraphResult};
use crate::export::{CacheChains, CacheExportOpt};
use crate::graph::{GraphManifest, LoadedGraph};
use crate::ui::{self, UiContext};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Execute the export command
pub async fn execute(args: ExportArgs, config: &Config) -> CacheGraphResult<()> {
    let manifest = GraphManifest::load(&args.manifest).await?;
    let graph =
        LoadedGraph::build(&manifest, &config.cache.manager_id, config.cache.priority).await?;
    let key = graph.exporter(&args.key)?;

    let opt = export_options(&args, &config.export);
    debug!("Export options: {:?}", opt);

    let (ctx, handle) = Context::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    let ctx = match args.timeout.or(config.export.timeout_secs) {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    };

    let mut chains = CacheChains::new();
    key.exporter.export_to(&ctx, &mut chains, &opt).await?;

    let cache_config = chains.marshal();
    let json = serde_json::to_string_pretty(&cache_config)?;

    match &args.output {
        Some(path) => {
            fs::write(path, json).await.map_err(|e| {
                CacheGraphError::io(format!("writing cache config to {}", path.display()), e)
            })?;
            let summary = cache_config.summary();
            ui::step_ok_detail(
                &UiContext::detect(),
                &format!(
                    "Exported {} record(s) and {} layer(s)",
                    summary.records, summary.layers
                ),
                &path.display().to_string(),
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Merge command line flags over the configured export defaults
fn export_options(args: &ExportArgs, defaults: &ExportConfig) -> CacheExportOpt {
    let compression = args
        .compression
        .map(Into::into)
        .or(defaults.compression)
        .map(|c| {
            CompressionConfig::new(c)
                .with_force(args.force_compression || defaults.force_compression)
        });

    CacheExportOpt {
        resolve_remotes: None,
        mode: args.mode.map(Into::into).unwrap_or(defaults.mode),
        session: Some(SessionGroup::local()),
        compression,
        export_roots: defaults.export_roots && !args.no_roots,
        ignore_backlinks: args.ignore_backlinks || defaults.ignore_backlinks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::CompressionType;
    use crate::cli::args::{CompressionArg, ModeArg};
    use crate::export::CacheExportMode;
    use std::path::PathBuf;

    fn args() -> ExportArgs {
        ExportArgs {
            manifest: PathBuf::from("graph.toml"),
            key: "app".to_string(),
            mode: None,
            no_roots: false,
            ignore_backlinks: false,
            compression: None,
            force_compression: false,
            output: None,
            timeout: None,
        }
    }

    #[test]
    fn config_defaults_apply_without_flags() {
        let defaults = ExportConfig {
            mode: CacheExportMode::Max,
            compression: Some(CompressionType::Zstd),
            ..Default::default()
        };

        let opt = export_options(&args(), &defaults);
        assert_eq!(opt.mode, CacheExportMode::Max);
        assert!(opt.export_roots);
        assert_eq!(
            opt.compression,
            Some(CompressionConfig::new(CompressionType::Zstd))
        );
        assert!(opt.session.is_some());
    }

    #[test]
    fn flags_override_defaults() {
        let mut a = args();
        a.mode = Some(ModeArg::Min);
        a.no_roots = true;
        a.compression = Some(CompressionArg::Gzip);
        a.force_compression = true;

        let defaults = ExportConfig {
            mode: CacheExportMode::Max,
            ..Default::default()
        };
        let opt = export_options(&a, &defaults);

        assert_eq!(opt.mode, CacheExportMode::Min);
        assert!(!opt.export_roots);
        let compression = opt.compression.unwrap();
        assert_eq!(compression.compression, CompressionType::Gzip);
        assert!(compression.force);
    }
}
