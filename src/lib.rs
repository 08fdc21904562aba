//! # rowscout
//!
//! Finds the single best-matching row of a price list or product catalog
//! for a free-text query. Exact and near-exact text wins immediately;
//! everything else goes through embeddings and an LLM judge.
//!
//! This crate is the application around [`rowscout_core`]: configuration,
//! spreadsheet loading, HTTP providers, on-disk storage and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌──────────────────┐
//! │ CSV / XLSX │──▶│ rowscout-core │──▶│ store.dir        │
//! │  loader    │   │ Catalog::open │   │ headers/ indexes/│
//! └────────────┘   └──────┬────────┘   └──────────────────┘
//!                         │
//!            ┌────────────┴────────────┐
//!            ▼                         ▼
//!     ┌─────────────┐          ┌───────────────┐
//!     │ embeddings  │          │ completions   │
//!     │ OpenAI/     │          │ OpenAI/Ollama │
//!     │ Ollama/local│          │               │
//!     └─────────────┘          └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rowscout index prices.xlsx                 # detect header, embed, persist
//! rowscout fuzzy prices.xlsx "PG-100"        # lexical only, no API calls
//! rowscout search prices.xlsx "pressure gauge 0-10 bar"
//! rowscout ask prices.xlsx "gauge for steam lines" --mode graph
//! rowscout quote prices.xlsx enquiry.txt
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | CSV/XLSX loading and content fingerprinting |
//! | [`xlsx`] | First-worksheet XLSX reader |
//! | [`http`] | JSON POST with bounded retry |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Completion providers |
//! | [`fs_store`] | Filesystem index store |
//! | [`session`] | Config → providers, store, catalog |
//! | [`index_cmd`] | `index` and `header` commands |
//! | [`search`] | `fuzzy`, `search` and `ask` commands |
//! | [`quote_cmd`] | `quote` command |

pub mod completion;
pub mod config;
pub mod embedding;
pub mod fs_store;
pub mod http;
pub mod index_cmd;
pub mod loader;
pub mod quote_cmd;
pub mod search;
pub mod session;
pub mod xlsx;
