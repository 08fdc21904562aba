//! Per-process wiring from [`Config`] to the core crate.
//!
//! Commands build only what they need: the lexical `fuzzy` command never
//! creates providers, so it works without API keys or a running model
//! server.

use anyhow::{Context, Result};
use rowscout_core::rag::RagMode;
use rowscout_core::schema::SchemaDetector;
use rowscout_core::store::IndexStore;
use rowscout_core::{Catalog, OpenOptions, RawSheet, Services};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::completion::create_completer;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::fs_store::FsIndexStore;
use crate::loader::{load_sheet, LoadedSheet};

/// The on-disk store configured by `[store]`.
pub fn open_store(config: &Config) -> Arc<FsIndexStore> {
    Arc::new(FsIndexStore::new(
        config.store.dir.clone(),
        Duration::from_secs(config.store.lock_timeout_secs),
    ))
}

/// Embedding and completion providers configured by `[embedding]` and
/// `[completion]`.
pub fn services(config: &Config) -> Result<Services> {
    let embedder =
        create_provider(&config.embedding).context("Failed to create embedding provider")?;
    let completer =
        create_completer(&config.completion).context("Failed to create completion provider")?;
    Ok(Services::new(embedder, completer))
}

/// Load `path` and open (or build) its index.
pub async fn open_catalog(
    config: &Config,
    path: &Path,
    mode: RagMode,
    force_rebuild: bool,
) -> Result<(LoadedSheet, Catalog)> {
    let loaded = load_sheet(path)?;
    let store: Arc<dyn IndexStore> = open_store(config);
    let options = OpenOptions {
        mode,
        force_rebuild,
        header_row: loaded.format.default_header_row(),
    };
    let catalog = Catalog::open(
        &loaded.sheet,
        services(config)?,
        store,
        config.settings(),
        &options,
    )
    .await
    .with_context(|| format!("Failed to open index for {}", path.display()))?;
    Ok((loaded, catalog))
}

/// Header row for `loaded`, asking the reasoning service when the format
/// needs detection.
pub async fn detect_header_row(config: &Config, loaded: &LoadedSheet) -> Result<usize> {
    if let Some(row) = loaded.format.default_header_row() {
        return Ok(row);
    }
    let completer =
        create_completer(&config.completion).context("Failed to create completion provider")?;
    let detector = SchemaDetector::new(completer, open_store(config));
    Ok(detector.detect_header(&loaded.sheet).await)
}

/// Header row for `sheet` without any capability call: the format default,
/// else a still-valid cached detection, else row 0.
pub async fn known_header_row(config: &Config, loaded: &LoadedSheet) -> usize {
    if let Some(row) = loaded.format.default_header_row() {
        return row;
    }
    let sheet: &RawSheet = &loaded.sheet;
    match open_store(config).load_header(&sheet.stem).await {
        Ok(Some(record)) if record.file_hash == sheet.fingerprint => {
            info!(file = %sheet.name, row = record.header_row_index, "using cached header row");
            record.header_row_index
        }
        Ok(_) => {
            warn!(
                file = %sheet.name,
                "no header detection cached for this file; assuming row 0 (run `rowscout header` first)"
            );
            0
        }
        Err(e) => {
            warn!(file = %sheet.name, error = %e, "failed to read header cache; assuming row 0");
            0
        }
    }
}
