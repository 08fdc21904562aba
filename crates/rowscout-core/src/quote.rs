//! Line-item extraction from enquiry emails and per-line catalog matching.
//!
//! An enquiry email names a buyer and a list of wanted products. The
//! reasoning service extracts them as a typed [`Quotation`], then each line
//! is matched against a [`Catalog`] with the fuzzy-first smart search:
//! by product code when the line has one, else by description, make and
//! range.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::completion::{complete_json, CompletionProvider};
use crate::error::{Error, Result};
use crate::retriever::{SmartSearchOutcome, SmartSearchRequest};

const EXTRACT_SYSTEM_PROMPT: &str =
    "You extract structured quotation requests from emails. Return only valid JSON.";

const EXTRACT_PROMPT: &str = r#"Extract product and company details from the email below and output them as JSON with these fields:

- companyName: the recipient company's name mentioned in the email.
- products: an array of product objects, each containing:
  - srNo: a sequential number starting at 1.
  - description: the product description.
  - make: the manufacturer's name.
  - code: the product code.
  - range: the measurement range.
  - rate: leave empty for manual entry.
  - remark: any additional remarks.

Structure:
{
  "companyName": "extracted company name",
  "products": [
    {"srNo": 1, "description": "", "make": "", "code": "", "range": "", "rate": "", "remark": ""}
  ]
}

Email:
"#;

/// One requested product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub sr_no: u32,
    pub description: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub range: String,
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub remark: String,
}

impl LineItem {
    /// Text used to search the catalog for this line.
    pub fn search_query(&self) -> String {
        let code = self.code.trim();
        if !code.is_empty() {
            return code.to_string();
        }
        [&self.description, &self.make, &self.range]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Products requested in one enquiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotation {
    pub company_name: String,
    pub products: Vec<LineItem>,
}

/// A line item with its match, or the reason nothing matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteLine {
    pub item: LineItem,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SmartSearchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ask the reasoning service for the line items in `email`.
pub async fn extract_line_items(
    completer: &dyn CompletionProvider,
    email: &str,
) -> Result<Quotation> {
    let prompt = format!("{}{}", EXTRACT_PROMPT, email.trim());
    let quotation: Quotation =
        complete_json(completer, EXTRACT_SYSTEM_PROMPT, &prompt, Error::ExtractionResponse).await?;
    info!(
        company = %quotation.company_name,
        lines = quotation.products.len(),
        "line items extracted"
    );
    Ok(quotation)
}

/// Smart-search `catalog` for every line, in input order.
///
/// A line without candidates is reported on that line; any other failure
/// aborts the whole request.
pub async fn match_line_items(catalog: &Catalog, quotation: &Quotation) -> Result<Vec<QuoteLine>> {
    let mut lines = Vec::with_capacity(quotation.products.len());
    for item in &quotation.products {
        let query = item.search_query();
        let (outcome, error) = if query.is_empty() {
            warn!(sr_no = item.sr_no, "line item has nothing to search for");
            (None, Some("line item has no code or description".to_string()))
        } else {
            let req = SmartSearchRequest::new(&query, catalog.settings());
            match catalog.smart_search(&req).await {
                Ok(outcome) => (Some(outcome), None),
                Err(Error::NoCandidates(q)) => {
                    warn!(sr_no = item.sr_no, query = %q, "no catalog match for line item");
                    (None, Some(format!("no candidates found for '{}'", q)))
                }
                Err(e) => return Err(e),
            }
        };
        lines.push(QuoteLine {
            item: item.clone(),
            query,
            outcome,
            error,
        });
    }
    Ok(lines)
}
