//! Header-row detection and schema understanding.
//!
//! Spreadsheets exported from quoting tools usually carry a preamble (company
//! name, address, validity dates) above the real column header. The
//! [`SchemaDetector`] asks the reasoning service which row is the header and
//! caches the answer per file stem, keyed by the file's content fingerprint.
//!
//! Header detection fails open: any problem yields row `0`. Schema analysis
//! does not: its output drives graph construction, so a reply that does not
//! match [`SchemaUnderstanding`] is an [`Error::SchemaResponse`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::completion::{complete_json, CompletionProvider};
use crate::error::{Error, Result};
use crate::models::{RawSheet, Table};
use crate::store::IndexStore;

/// Rows shown to the reasoning service when locating the header.
pub const HEADER_PREVIEW_ROWS: usize = 50;
/// Columns shown to the reasoning service when locating the header.
pub const HEADER_PREVIEW_COLS: usize = 5;
/// Rows sampled for schema analysis.
pub const SCHEMA_SAMPLE_ROWS: usize = 50;

const PREVIEW_CELL_WIDTH: usize = 24;

const HEADER_SYSTEM_PROMPT: &str = "You are a data analysis assistant. Return only JSON.";

const SCHEMA_SYSTEM_PROMPT: &str = "You are a data structure analyzer. You must return ONLY a valid \
JSON object with the exact structure requested, no additional text or markdown.";

const SCHEMA_SHAPE: &str = r#"{
  "column_analysis": {
    "columns": {
      "column_name": {
        "type": "string/number/etc",
        "description": "what this column contains",
        "format": "any special format noticed"
      }
    },
    "primary_keys": ["columns that uniquely identify rows"],
    "value_columns": ["columns containing values or metrics"]
  },
  "relationships": [
    {"from": "column_name", "to": "column_name", "type": "relationship type"}
  ],
  "data_patterns": {"pattern_name": "pattern description"},
  "query_examples": [
    {"type": "query type", "example": "example query", "columns_used": ["columns"]}
  ]
}"#;

/// Cached header position of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub header_row_index: usize,
    /// Content fingerprint of the file the index was detected for.
    pub file_hash: String,
}

#[derive(Debug, Deserialize)]
struct HeaderReply {
    header_row_index: usize,
    #[serde(default)]
    column_names: Vec<serde_json::Value>,
}

/// Per-column description produced by schema analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAnalysis {
    pub columns: BTreeMap<String, ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub value_columns: Vec<String>,
}

/// A column pair whose equal values link rows in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExample {
    #[serde(rename = "type")]
    pub kind: String,
    pub example: String,
    pub columns_used: Vec<String>,
}

/// Structured description of a table, produced once per dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaUnderstanding {
    pub column_analysis: ColumnAnalysis,
    pub relationships: Vec<Relationship>,
    pub data_patterns: BTreeMap<String, String>,
    pub query_examples: Vec<QueryExample>,
}

impl SchemaUnderstanding {
    /// Resolve a column name from the reasoning service against `table`,
    /// accepting raw (un-normalized) header spellings.
    pub fn resolve_column<'t>(table: &'t Table, name: &str) -> Option<&'t str> {
        let normalized = crate::models::normalize_column_name(name);
        table
            .columns()
            .iter()
            .find(|c| c.as_str() == name || **c == normalized)
            .map(String::as_str)
    }
}

/// Render the top-left corner of a sheet as a fixed-width grid.
pub fn render_preview(sheet: &RawSheet) -> String {
    let cols = sheet.width().min(HEADER_PREVIEW_COLS);
    let mut out = String::new();
    for (i, row) in sheet.rows.iter().take(HEADER_PREVIEW_ROWS).enumerate() {
        let cells: Vec<String> = (0..cols)
            .map(|c| {
                let text = row.get(c).cloned().flatten().unwrap_or_default();
                let text: String = text.chars().take(PREVIEW_CELL_WIDTH).collect();
                format!("{:<width$}", text, width = PREVIEW_CELL_WIDTH)
            })
            .collect();
        out.push_str(&format!("{:>3}  {}\n", i, cells.join(" ").trim_end()));
    }
    out
}

/// Detects header rows and analyses table schemas.
pub struct SchemaDetector {
    completer: Arc<dyn CompletionProvider>,
    store: Arc<dyn IndexStore>,
}

impl SchemaDetector {
    pub fn new(completer: Arc<dyn CompletionProvider>, store: Arc<dyn IndexStore>) -> Self {
        Self { completer, store }
    }

    /// Return the 0-based header row of `sheet`.
    ///
    /// A cached record is reused only while its `file_hash` equals the
    /// sheet's fingerprint. Never fails: store and reasoning problems are
    /// logged and the answer falls back to row `0`.
    pub async fn detect_header(&self, sheet: &RawSheet) -> usize {
        match self.store.load_header(&sheet.stem).await {
            Ok(Some(record)) if record.file_hash == sheet.fingerprint => {
                debug!(file = %sheet.name, row = record.header_row_index, "header cache hit");
                return record.header_row_index;
            }
            Ok(Some(_)) => info!(file = %sheet.name, "file changed since header detection"),
            Ok(None) => {}
            Err(e) => warn!(file = %sheet.name, error = %e, "failed to read header cache"),
        }

        if sheet.rows.is_empty() {
            return 0;
        }

        let cols = sheet.width().min(HEADER_PREVIEW_COLS);
        let prompt = format!(
            "Spreadsheet preview (first {} rows, showing {} columns, row index on the left):\n{}\n\
             Return JSON with the header row index (0-based) and column names. Format:\n\
             {{\"header_row_index\": N, \"column_names\": [\"col1\", \"col2\", ...]}}",
            HEADER_PREVIEW_ROWS,
            cols,
            render_preview(sheet)
        );

        let reply: HeaderReply = match complete_json(
            self.completer.as_ref(),
            HEADER_SYSTEM_PROMPT,
            &prompt,
            Error::SchemaResponse,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(file = %sheet.name, error = %e, "header detection failed; using row 0");
                return 0;
            }
        };

        let row = if reply.header_row_index < sheet.rows.len() {
            reply.header_row_index
        } else {
            warn!(
                file = %sheet.name,
                row = reply.header_row_index,
                rows = sheet.rows.len(),
                "detected header row out of range; using row 0"
            );
            0
        };
        info!(
            file = %sheet.name,
            row,
            names = reply.column_names.len(),
            "detected header row"
        );

        let record = HeaderRecord {
            header_row_index: row,
            file_hash: sheet.fingerprint.clone(),
        };
        if let Err(e) = self.store.save_header(&sheet.stem, &record).await {
            warn!(file = %sheet.name, error = %e, "failed to cache header row");
        }
        row
    }

    /// Ask the reasoning service for a [`SchemaUnderstanding`] of `table`.
    pub async fn analyze_schema(&self, table: &Table) -> Result<SchemaUnderstanding> {
        let mut sample = String::new();
        for row in table.rows().iter().take(SCHEMA_SAMPLE_ROWS) {
            sample.push_str(&serde_json::to_string(row)?);
            sample.push('\n');
        }

        let prompt = format!(
            "Analyze this spreadsheet data structure and return a valid JSON object with the \
             exact structure shown below.\n\nColumns: {:?}\nSample data (first {} rows):\n{}\n\
             Return ONLY a valid JSON object with exactly this structure:\n{}",
            table.columns(),
            SCHEMA_SAMPLE_ROWS.min(table.len()),
            sample,
            SCHEMA_SHAPE
        );

        let schema: SchemaUnderstanding = complete_json(
            self.completer.as_ref(),
            SCHEMA_SYSTEM_PROMPT,
            &prompt,
            Error::SchemaResponse,
        )
        .await?;

        info!(
            columns = schema.column_analysis.columns.len(),
            relationships = schema.relationships.len(),
            "schema analysed"
        );
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryIndexStore;
    use crate::testing::ScriptedCompleter;

    fn sheet(bytes_tag: &str) -> RawSheet {
        let rows = vec![
            vec![Some("ACME Instruments".to_string()), None],
            vec![Some("Quotation valid 30 days".to_string()), None],
            vec![Some("Description".to_string()), Some("Code".to_string())],
            vec![Some("Pressure Gauge A".to_string()), Some("PG-100".to_string())],
        ];
        RawSheet {
            name: "prices.xlsx".into(),
            stem: "prices".into(),
            fingerprint: crate::fingerprint(bytes_tag.as_bytes()),
            rows,
        }
    }

    fn detector(replies: Vec<&str>) -> (SchemaDetector, Arc<ScriptedCompleter>, Arc<InMemoryIndexStore>) {
        let completer = Arc::new(ScriptedCompleter::new(
            replies.into_iter().map(String::from).collect(),
        ));
        let store = Arc::new(InMemoryIndexStore::new());
        (
            SchemaDetector::new(completer.clone(), store.clone()),
            completer,
            store,
        )
    }

    #[tokio::test]
    async fn test_detect_header_caches_by_fingerprint() {
        let (d, completer, _) = detector(vec![
            r#"{"header_row_index": 2, "column_names": ["Description", "Code"]}"#,
            r#"{"header_row_index": 2, "column_names": []}"#,
        ]);
        let s = sheet("v1");
        assert_eq!(d.detect_header(&s).await, 2);
        assert_eq!(d.detect_header(&s).await, 2);
        assert_eq!(completer.call_count(), 1);

        // One changed byte, same stem: cache miss.
        let changed = sheet("v2");
        assert_eq!(d.detect_header(&changed).await, 2);
        assert_eq!(completer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_detect_header_fails_open_without_caching() {
        let (d, completer, store) = detector(vec!["not json"]);
        let s = sheet("v1");
        assert_eq!(d.detect_header(&s).await, 0);
        assert_eq!(completer.call_count(), 1);
        assert!(store.load_header("prices").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detect_header_out_of_range_falls_back() {
        let (d, _, store) = detector(vec![r#"{"header_row_index": 40}"#]);
        let s = sheet("v1");
        assert_eq!(d.detect_header(&s).await, 0);
        let cached = store.load_header("prices").await.unwrap().unwrap();
        assert_eq!(cached.header_row_index, 0);
    }

    #[tokio::test]
    async fn test_detect_header_prompt_shows_preview() {
        let (d, completer, _) = detector(vec![r#"{"header_row_index": 2}"#]);
        d.detect_header(&sheet("v1")).await;
        let call = &completer.calls()[0];
        assert!(call.json_mode);
        assert!(call.user_prompt.contains("  2  Description"));
    }

    #[test]
    fn test_render_preview_limits_columns() {
        let s = RawSheet {
            name: "w.csv".into(),
            stem: "w".into(),
            fingerprint: String::new(),
            rows: vec![(0..8).map(|i| Some(format!("c{}", i))).collect()],
        };
        let preview = render_preview(&s);
        assert!(preview.contains("c4"));
        assert!(!preview.contains("c5"));
    }

    fn table() -> Table {
        let mut row = crate::models::RowData::new();
        row.insert("code".into(), "PG-100".into());
        Table::new(vec!["code".into(), "make".into()], vec![row]).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_schema_parses_contract() {
        let reply = r#"{
            "column_analysis": {
                "columns": {"code": {"type": "string", "description": "item code", "format": "XX-NNN"}},
                "primary_keys": ["code"],
                "value_columns": []
            },
            "relationships": [{"from": "Make", "to": "code", "type": "same_make"}],
            "data_patterns": {"codes": "two letters then digits"},
            "query_examples": [{"type": "lookup", "example": "PG-100", "columns_used": ["code"]}]
        }"#;
        let (d, _, _) = detector(vec![reply]);
        let t = table();
        let schema = d.analyze_schema(&t).await.unwrap();
        assert_eq!(schema.column_analysis.primary_keys, vec!["code"]);
        assert_eq!(schema.relationships[0].kind, "same_make");
        assert_eq!(
            SchemaUnderstanding::resolve_column(&t, &schema.relationships[0].from),
            Some("make")
        );
    }

    #[tokio::test]
    async fn test_analyze_schema_rejects_missing_keys() {
        let (d, _, _) = detector(vec![r#"{"column_analysis": {"columns": {}}}"#]);
        let err = d.analyze_schema(&table()).await.unwrap_err();
        assert!(matches!(err, Error::SchemaResponse(_)));
    }
}
