//! Search layer facade.
//!
//! - **[`sanitize`]**: turns raw user input into a safe FTS5 expression.
//! - **[`index`]**: the `issues_fts` table, its write-path hooks and the maintenance gate.
//! - **[`query`]**: ranked retrieval with highlighted snippets.
//! - **[`snippet`]**: token windowing and delimiter rendering for highlights.
//! - **[`maintenance`]**: drop, rebuild and consistency check.

pub mod index;
pub mod maintenance;
pub mod query;
pub mod sanitize;
pub mod snippet;

pub use index::SearchIndex;
pub use query::{SearchClient, SearchError, SearchRequest};
pub use sanitize::{SanitizedQuery, sanitize_query};
