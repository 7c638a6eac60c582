use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::num::IntErrorKind;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

use crate::model::types::{IssueStatus, Priority, SearchResult};
use crate::search::index::SearchIndex;
use crate::search::sanitize::{SanitizedQuery, sanitize_query};
use crate::search::snippet::{MATCH_END, MATCH_START, build_snippet};
use crate::storage::sqlite::open_readonly;

pub const DEFAULT_LIMIT: usize = 20;
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 100;

/// Errors surfaced by [`SearchClient`]. "No results" is never an error.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Index storage unreachable or corrupted. Not retried here.
    #[error("search unavailable: {0}")]
    SearchUnavailable(#[source] rusqlite::Error),

    #[error("search index maintenance in progress, retry shortly")]
    MaintenanceInProgress,
}

/// Search request as received from the routing layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub q: String,
    #[serde(default)]
    pub limit: Option<String>,
}

impl SearchRequest {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }
}

/// Page size actually used for a raw `limit` parameter.
///
/// Missing, empty or non-numeric input gives [`DEFAULT_LIMIT`]; numbers are
/// clamped into `[MIN_LIMIT, MAX_LIMIT]`, including ones too large to parse.
///
/// ```
/// use tracker_search::search::query::effective_limit;
///
/// assert_eq!(effective_limit(None), 20);
/// assert_eq!(effective_limit(Some("9999")), 100);
/// assert_eq!(effective_limit(Some("0")), 1);
/// assert_eq!(effective_limit(Some("abc")), 20);
/// ```
pub fn effective_limit(raw: Option<&str>) -> usize {
    let Some(raw) = raw else {
        return DEFAULT_LIMIT;
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n < MIN_LIMIT as i64 => MIN_LIMIT,
        Ok(n) if n > MAX_LIMIT as i64 => MAX_LIMIT,
        Ok(n) => n as usize,
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => MAX_LIMIT,
            IntErrorKind::NegOverflow => MIN_LIMIT,
            _ => DEFAULT_LIMIT,
        },
    }
}

/// Ranked retrieval joined back to the issue table. Highlight sentinels are
/// bound as ?2/?3 and turned into display snippets afterwards.
const SEARCH_SQL: &str = r"SELECT
    issues_fts.rowid,
    i.number,
    i.title,
    i.status,
    i.priority,
    highlight(issues_fts, 0, ?2, ?3),
    highlight(issues_fts, 1, ?2, ?3),
    bm25(issues_fts) AS score
FROM issues_fts
LEFT JOIN issues i ON i.id = issues_fts.rowid
WHERE issues_fts MATCH ?1
ORDER BY score
LIMIT ?4";

struct RawHit {
    id: i64,
    issue: Option<(i64, String, IssueStatus, Priority)>,
    title_marked: String,
    description_marked: String,
    rank: f64,
}

pub struct SearchClient {
    conn: Connection,
    index: SearchIndex,
}

impl SearchClient {
    /// Open a read-only client on an existing database file.
    pub fn open(db_path: &Path, index: SearchIndex) -> Result<Self, SearchError> {
        let conn = open_readonly(db_path).map_err(SearchError::SearchUnavailable)?;
        Ok(Self { conn, index })
    }

    pub fn new(conn: Connection, index: SearchIndex) -> Self {
        Self { conn, index }
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        self.query(&request.q, request.limit.as_deref())
    }

    /// Sanitize, execute, and annotate. Blank queries return no results
    /// without touching the index.
    pub fn query(&self, raw: &str, limit: Option<&str>) -> Result<Vec<SearchResult>, SearchError> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = effective_limit(limit);
        let sanitized = sanitize_query(raw);
        if sanitized.is_empty() {
            tracing::debug!(query = raw, "search_query_sanitized_to_empty");
            return Ok(Vec::new());
        }

        let _active = self
            .index
            .enter()
            .ok_or(SearchError::MaintenanceInProgress)?;

        let start = Instant::now();
        let hits = self
            .execute(&sanitized, limit)
            .map_err(SearchError::SearchUnavailable)?;

        let cfg = self.index.snippet_config();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some((number, title, status, priority)) = hit.issue else {
                tracing::warn!(issue_id = hit.id, "search_hit_without_issue_skipped");
                continue;
            };
            results.push(SearchResult {
                id: hit.id,
                number,
                title,
                status,
                priority,
                title_snippet: build_snippet(&hit.title_marked, cfg),
                description_snippet: build_snippet(&hit.description_marked, cfg),
                rank: hit.rank,
            });
        }

        tracing::info!(
            terms = sanitized.term_count(),
            limit = limit,
            hits = results.len(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "search_complete"
        );
        Ok(results)
    }

    fn execute(&self, query: &SanitizedQuery, limit: usize) -> rusqlite::Result<Vec<RawHit>> {
        let mut stmt = self.conn.prepare(SEARCH_SQL)?;
        let rows = stmt.query_map(
            rusqlite::params![
                query.as_str(),
                MATCH_START.to_string(),
                MATCH_END.to_string(),
                limit as i64
            ],
            |row| {
                let number: Option<i64> = row.get(1)?;
                let issue = match number {
                    Some(number) => Some((number, row.get(2)?, row.get(3)?, row.get(4)?)),
                    None => None,
                };
                Ok(RawHit {
                    id: row.get(0)?,
                    issue,
                    title_marked: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    description_marked: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    rank: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }
}
