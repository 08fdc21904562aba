//! `quote` command: match the products requested in an enquiry email.

use anyhow::{Context, Result};
use rowscout_core::quote::{extract_line_items, match_line_items, QuoteLine};
use rowscout_core::rag::RagMode;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::session;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteReport {
    pub company_name: String,
    pub lines: Vec<QuoteLine>,
}

pub async fn quote(config: &Config, catalog_path: &Path, email_path: &Path) -> Result<QuoteReport> {
    let email = std::fs::read_to_string(email_path)
        .with_context(|| format!("Failed to read {}", email_path.display()))?;
    let (_, catalog) = session::open_catalog(config, catalog_path, RagMode::Flat, false).await?;

    let quotation = extract_line_items(catalog.services().completer.as_ref(), &email).await?;
    let lines = match_line_items(&catalog, &quotation).await?;

    let matched = lines.iter().filter(|l| l.outcome.is_some()).count();
    info!(lines = lines.len(), matched, "quotation matched");
    Ok(QuoteReport {
        company_name: quotation.company_name,
        lines,
    })
}

pub async fn run_quote(config: &Config, catalog_path: &Path, email_path: &Path) -> Result<()> {
    let report = quote(config, catalog_path, email_path).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
