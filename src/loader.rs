//! Source file loading: CSV and XLSX into a [`RawSheet`].
//!
//! The whole file is read once; its bytes give the content fingerprint
//! that keys the header cache and the persisted index.

use anyhow::{bail, Context, Result};
use rowscout_core::RawSheet;
use std::path::Path;
use tracing::debug;

use crate::xlsx;

/// Supported source formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(SheetFormat::Csv),
            "xlsx" => Ok(SheetFormat::Xlsx),
            "" => bail!("{} has no file extension; expected .csv or .xlsx", path.display()),
            other => bail!("unsupported file type '.{}'; expected .csv or .xlsx", other),
        }
    }

    /// Header row to use without asking the reasoning service.
    ///
    /// CSV exports carry their header on the first line; spreadsheets often
    /// have title rows above it and go through detection.
    pub fn default_header_row(self) -> Option<usize> {
        match self {
            SheetFormat::Csv => Some(0),
            SheetFormat::Xlsx => None,
        }
    }
}

/// A loaded source file.
#[derive(Debug, Clone)]
pub struct LoadedSheet {
    pub format: SheetFormat,
    pub sheet: RawSheet,
}

/// Read `path` into a [`RawSheet`].
pub fn load_sheet(path: &Path) -> Result<LoadedSheet> {
    let format = SheetFormat::from_path(path)?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let rows = match format {
        SheetFormat::Csv => parse_csv(&bytes),
        SheetFormat::Xlsx => xlsx::read_first_sheet(&bytes).map_err(anyhow::Error::from),
    }
    .with_context(|| format!("Failed to parse {}", path.display()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!(file = %name, rows = rows.len(), ?format, "sheet loaded");
    Ok(LoadedSheet {
        format,
        sheet: RawSheet {
            name,
            stem,
            fingerprint: rowscout_core::fingerprint(&bytes),
            rows,
        },
    })
}

/// Parse CSV bytes into rows. Records may have different lengths; invalid
/// UTF-8 is replaced rather than rejected.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Vec<Option<String>>>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.context("malformed CSV record")?;
        let row = record
            .iter()
            .map(|field| {
                let value = String::from_utf8_lossy(field);
                if value.trim().is_empty() {
                    None
                } else {
                    Some(value.into_owned())
                }
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}
