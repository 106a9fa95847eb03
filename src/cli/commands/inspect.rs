//! Inspect command - summarize an exported cache configuration

use crate::cli::args::{InspectArgs, OutputFormat};
use crate::error::{CacheGraphError, CacheGraphResult};
use crate::export::{CacheConfig, CacheConfigSummary};
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;
use tokio::fs;

/// Execute the inspect command
pub async fn execute(args: InspectArgs) -> CacheGraphResult<()> {
    let config = read_cache_config(&args.file).await?;
    let summary = config.summary();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => print_table(&args.file, &config, &summary),
    }

    Ok(())
}

async fn read_cache_config(path: &Path) -> CacheGraphResult<CacheConfig> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        CacheGraphError::io(format!("reading cache config {}", path.display()), e)
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn print_table(path: &Path, config: &CacheConfig, summary: &CacheConfigSummary) {
    let ctx = UiContext::detect();
    ui::section(&ctx, &format!("Cache config {}", path.display()));

    ui::key_value(&ctx, "records", &summary.records.to_string());
    ui::key_value(&ctx, "layers", &summary.layers.to_string());
    ui::key_value(&ctx, "results", &summary.results.to_string());
    ui::key_value(&ctx, "links", &summary.links.to_string());
    ui::key_value(&ctx, "roots", &summary.roots.to_string());

    if config.records.is_empty() {
        return;
    }

    println!();
    println!(
        "{:<6} {:<20} {:<8} {:<8}",
        style("INDEX").bold(),
        style("DIGEST").bold(),
        style("RESULTS").bold(),
        style("INPUTS").bold()
    );
    println!("{}", "-".repeat(45));

    for (index, record) in config.records.iter().enumerate() {
        let digest = record.digest.as_str();
        let short = digest.get(..19).unwrap_or(digest);
        let inputs: usize = record.inputs.iter().map(Vec::len).sum();
        println!(
            "{:<6} {:<20} {:<8} {:<8}",
            index,
            short,
            record.results.len(),
            inputs
        );
    }
}
