//! `index` and `header` commands.

use anyhow::{Context, Result};
use rowscout_core::rag::RagMode;
use rowscout_core::Table;
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::loader::load_sheet;
use crate::session;

/// Open or build the index for `path` and print a summary.
pub async fn run_index(config: &Config, path: &Path, mode: RagMode, force: bool) -> Result<()> {
    let (loaded, catalog) = session::open_catalog(config, path, mode, force).await?;
    let table = catalog.table();
    let vectors = catalog.index().vectors();

    println!("Index {}", catalog.key());
    println!("  File:        {}", loaded.sheet.name);
    println!(
        "  Status:      {}",
        if catalog.was_loaded() { "loaded from store" } else { "built and saved" }
    );
    println!("  Mode:        {}", catalog.mode());
    println!("  Header row:  {}", catalog.header_row());
    println!("  Rows:        {}", table.len());
    println!("  Columns:     {}", table.columns().join(", "));
    println!("  Embedded:    {}", vectors.text_columns().join(", "));
    println!("  Model:       {} ({} dims)", vectors.model(), vectors.dims());
    if let Some(graph) = catalog.index().graph() {
        println!("  Edges:       {}", graph.edges().len());
    }
    Ok(())
}

/// Detected header row and the column names it yields.
#[derive(Debug, Serialize)]
pub struct HeaderReport {
    pub file: String,
    pub header_row: usize,
    pub columns: Vec<String>,
    pub rows: usize,
}

pub async fn header(config: &Config, path: &Path) -> Result<HeaderReport> {
    let loaded = load_sheet(path)?;
    let header_row = session::detect_header_row(config, &loaded).await?;
    let table = Table::from_sheet(&loaded.sheet, header_row)
        .with_context(|| format!("Failed to read table from {}", path.display()))?;
    Ok(HeaderReport {
        file: loaded.sheet.name,
        header_row,
        columns: table.columns().to_vec(),
        rows: table.len(),
    })
}

pub async fn run_header(config: &Config, path: &Path) -> Result<()> {
    let report = header(config, path).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_csv_header_is_first_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prices.csv");
        std::fs::write(&path, "Item Description,Code,Code\nGauge,PG-1,X\n,,\n").unwrap();
        let mut cfg = Config::default();
        cfg.store.dir = tmp.path().join("store");

        let report = header(&cfg, &path).await.unwrap();
        assert_eq!(report.header_row, 0);
        assert_eq!(report.columns, vec!["item_description", "code", "code_1"]);
        assert_eq!(report.rows, 1);
    }
}
