//! `fuzzy`, `search` and `ask` commands.
//!
//! All three print JSON to stdout; logs go to stderr.
//!
//! | Command | Capabilities used |
//! |---------|-------------------|
//! | `fuzzy` | none (lexical only) |
//! | `search` | embedding; completion unless the exact-match fast path hits |
//! | `ask` | embedding and completion (two ranking passes) |

use anyhow::{bail, Context, Result};
use rowscout_core::lexical::{self, LexicalRequest};
use rowscout_core::models::normalize_column_name;
use rowscout_core::rag::RagMode;
use rowscout_core::ranker::BestMatch;
use rowscout_core::retriever::{SmartSearchOutcome, SmartSearchRequest};
use rowscout_core::{SearchResult, Table};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::loader::load_sheet;
use crate::session;

/// Options of the `fuzzy` command; `None` falls back to `[retrieval]`.
#[derive(Debug, Default, Clone)]
pub struct FuzzyOptions {
    pub columns: Vec<String>,
    pub limit: Option<usize>,
    pub cutoff: Option<f64>,
}

fn normalized_columns(columns: &[String]) -> Vec<String> {
    columns.iter().map(|c| normalize_column_name(c)).collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Lexical search over `path` without any capability call.
pub async fn fuzzy(
    config: &Config,
    path: &Path,
    query: &str,
    options: &FuzzyOptions,
) -> Result<Vec<SearchResult>> {
    let settings = config.settings();
    let cutoff = options.cutoff.unwrap_or(settings.score_cutoff);
    if !(0.0..=100.0).contains(&cutoff) {
        bail!("--cutoff must be in [0, 100]");
    }

    let loaded = load_sheet(path)?;
    let header_row = session::known_header_row(config, &loaded).await;
    let table = Table::from_sheet(&loaded.sheet, header_row)
        .with_context(|| format!("Failed to read table from {}", path.display()))?;

    let columns = normalized_columns(&options.columns);
    let results = lexical::search(
        &table,
        &LexicalRequest {
            query,
            columns: (!columns.is_empty()).then_some(columns.as_slice()),
            limit: options.limit.unwrap_or(settings.fuzzy_limit),
            score_cutoff: cutoff,
        },
    );
    info!(query, results = results.len(), "fuzzy search complete");
    Ok(results)
}

pub async fn run_fuzzy(
    config: &Config,
    path: &Path,
    query: &str,
    options: &FuzzyOptions,
) -> Result<()> {
    let results = fuzzy(config, path, query, options).await?;
    print_json(&results)
}

/// Fuzzy-first smart search over `path`.
pub async fn smart_search(
    config: &Config,
    path: &Path,
    query: &str,
    columns: &[String],
) -> Result<SmartSearchOutcome> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let (_, catalog) = session::open_catalog(config, path, RagMode::Flat, false).await?;
    let columns = normalized_columns(columns);
    let mut req = SmartSearchRequest::new(query, catalog.settings());
    if !columns.is_empty() {
        req = req.with_columns(&columns);
    }
    Ok(catalog.smart_search(&req).await?)
}

pub async fn run_search(config: &Config, path: &Path, query: &str, columns: &[String]) -> Result<()> {
    let outcome = smart_search(config, path, query, columns).await?;
    print_json(&outcome)
}

/// RAG answer over `path` with the given strategy.
pub async fn ask(
    config: &Config,
    path: &Path,
    query: &str,
    mode: RagMode,
    top_k: Option<usize>,
) -> Result<BestMatch> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    if top_k == 0 {
        bail!("--top-k must be >= 1");
    }
    let (_, catalog) = session::open_catalog(config, path, mode, false).await?;
    Ok(catalog.ask(query, top_k).await?)
}

pub async fn run_ask(
    config: &Config,
    path: &Path,
    query: &str,
    mode: RagMode,
    top_k: Option<usize>,
    output: Option<&Path>,
) -> Result<()> {
    let best = ask(config, path, query, mode, top_k).await?;
    if let Some(out) = output {
        let saved = serde_json::json!({ "best_match": best.best_match });
        std::fs::write(out, serde_json::to_string_pretty(&saved)?)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        info!(path = %out.display(), "best match saved");
    }
    print_json(&best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.store.dir = dir.join("store");
        cfg
    }

    #[tokio::test]
    async fn test_fuzzy_needs_no_providers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prices.csv");
        std::fs::write(
            &path,
            "Description,Product Code\nPressure Gauge A,PG-100\nBall Valve,BV-20\n",
        )
        .unwrap();
        let cfg = config_in(tmp.path());

        let results = fuzzy(
            &cfg,
            &path,
            "pg-100",
            &FuzzyOptions {
                columns: vec!["Product Code".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 100.0);
        assert_eq!(results[0].data["description"], "Pressure Gauge A");
        assert_eq!(results[0].matched_column.as_deref(), Some("product_code"));
    }

    #[tokio::test]
    async fn test_fuzzy_rejects_bad_cutoff() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("p.csv");
        std::fs::write(&path, "a\nb\n").unwrap();
        let opts = FuzzyOptions {
            cutoff: Some(150.0),
            ..Default::default()
        };
        assert!(fuzzy(&config_in(tmp.path()), &path, "b", &opts).await.is_err());
    }

    #[tokio::test]
    async fn test_search_with_disabled_embedder_fails_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prices.csv");
        std::fs::write(&path, "Description\nGauge\n").unwrap();
        let err = smart_search(&config_in(tmp.path()), &path, "gauge", &[])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("embedding"));
    }
}
