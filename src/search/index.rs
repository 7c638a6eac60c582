//! FTS5 shadow index over issue text and the write-path hooks feeding it.
//!
//! `issues_fts` lives in the same SQLite file as `issues`, keyed by
//! `rowid = issues.id`. The hooks below are only reachable through
//! [`crate::storage::sqlite::SqliteStorage`]'s write methods, which call them
//! on the same [`Transaction`] as the primary write. Whether hooks are
//! installed is persisted in `meta`, so a dropped index stays dropped across
//! restarts until it is rebuilt.

use crate::model::types::IndexedDocument;
use crate::search::snippet::SnippetConfig;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const FTS_TABLE: &str = "issues_fts";

const HOOKS_META_KEY: &str = "search_hooks";

pub(crate) const CREATE_FTS_TABLE: &str = r"
CREATE VIRTUAL TABLE IF NOT EXISTS issues_fts USING fts5(
    title,
    description,
    tokenize='porter unicode61'
);";

/// Token characters of the `unicode61` tokenizer: letters, numbers and
/// private-use code points (L*, N*, Co). `is_alphanumeric` is slightly wider
/// than L*/N*; the extra marks only ever produce empty phrases.
pub fn is_token_char(c: char) -> bool {
    c.is_alphanumeric()
        || matches!(
            c,
            '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}'
        )
}

/// Which hook was running when an index write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for IndexOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexOp::Insert => "insert",
            IndexOp::Update => "update",
            IndexOp::Delete => "delete",
        })
    }
}

/// Which indexed columns an update rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexedFields {
    pub title: bool,
    pub description: bool,
}

impl IndexedFields {
    pub fn any(self) -> bool {
        self.title || self.description
    }
}

#[derive(Debug, Default)]
struct Inner {
    gate: RwLock<()>,
    maintenance: AtomicBool,
    snippet: SnippetConfig,
}

/// Shared handle to the search index.
///
/// Clone it into every storage and search client that opens the same database
/// file so they all observe one maintenance gate.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    inner: Arc<Inner>,
}

/// Exclusive hold on the index for drop/rebuild. Released on drop.
pub struct MaintenanceGuard<'a> {
    _lock: RwLockWriteGuard<'a, ()>,
    flag: &'a AtomicBool,
}

impl Drop for MaintenanceGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl fmt::Debug for MaintenanceGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceGuard").finish_non_exhaustive()
    }
}

impl SearchIndex {
    pub fn new(snippet: SnippetConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                snippet,
                ..Inner::default()
            }),
        }
    }

    pub fn snippet_config(&self) -> &SnippetConfig {
        &self.inner.snippet
    }

    /// Shared access for one write or search. `None` while maintenance runs.
    pub fn enter(&self) -> Option<RwLockReadGuard<'_, ()>> {
        if self.inner.maintenance.load(Ordering::Acquire) {
            return None;
        }
        self.inner.gate.try_read()
    }

    /// Exclusive access for maintenance. Waits for in-flight operations to
    /// finish; `None` if another maintenance run already holds the gate.
    pub fn begin_maintenance(&self) -> Option<MaintenanceGuard<'_>> {
        if self.inner.maintenance.swap(true, Ordering::AcqRel) {
            return None;
        }
        let lock = self.inner.gate.write();
        Some(MaintenanceGuard {
            _lock: lock,
            flag: &self.inner.maintenance,
        })
    }

    pub fn is_under_maintenance(&self) -> bool {
        self.inner.maintenance.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Write-path hooks
    // ---------------------------------------------------------------------

    /// Index a freshly inserted issue. Returns `false` when hooks are dropped.
    pub(crate) fn on_insert(
        &self,
        tx: &Transaction<'_>,
        doc: &IndexedDocument,
    ) -> rusqlite::Result<bool> {
        if !hooks_installed(tx)? {
            return Ok(false);
        }
        write_document(tx, doc)?;
        Ok(true)
    }

    /// Rewrite only the indexed columns that changed.
    ///
    /// A missing document while hooks are installed means the index has
    /// drifted; that surfaces as `QueryReturnedNoRows` so the caller rolls back.
    pub(crate) fn on_update(
        &self,
        tx: &Transaction<'_>,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> rusqlite::Result<IndexedFields> {
        let mut written = IndexedFields::default();
        if (title.is_none() && description.is_none()) || !hooks_installed(tx)? {
            return Ok(written);
        }

        if let Some(title) = title {
            let rows = tx.execute(
                "UPDATE issues_fts SET title = ?1 WHERE rowid = ?2",
                params![title, id],
            )?;
            if rows == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            written.title = true;
        }
        if let Some(description) = description {
            let rows = tx.execute(
                "UPDATE issues_fts SET description = ?1 WHERE rowid = ?2",
                params![description, id],
            )?;
            if rows == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            written.description = true;
        }
        Ok(written)
    }

    /// Remove the document for a deleted issue. Returns rows removed.
    pub(crate) fn on_delete(&self, tx: &Transaction<'_>, id: i64) -> rusqlite::Result<usize> {
        if !hooks_installed(tx)? {
            return Ok(0);
        }
        let rows = tx.execute("DELETE FROM issues_fts WHERE rowid = ?1", [id])?;
        if rows == 0 {
            tracing::warn!(issue_id = id, "index_delete_found_no_document");
        }
        Ok(rows)
    }

    /// All indexed documents ordered by id.
    pub fn documents(&self, conn: &Connection) -> rusqlite::Result<Vec<IndexedDocument>> {
        let mut stmt =
            conn.prepare("SELECT rowid, title, description FROM issues_fts ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(IndexedDocument {
                id: row.get(0)?,
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?;
        rows.collect()
    }
}

// -------------------------------------------------------------------------
// Schema helpers shared by migrations and maintenance
// -------------------------------------------------------------------------

pub fn hooks_installed(conn: &Connection) -> rusqlite::Result<bool> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [HOOKS_META_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.as_deref() == Some("installed"))
}

pub(crate) fn install_hooks(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta(key, value) VALUES(?1, 'installed')",
        [HOOKS_META_KEY],
    )?;
    Ok(())
}

/// Returns whether hooks were present.
pub(crate) fn remove_hooks(conn: &Connection) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM meta WHERE key = ?1", [HOOKS_META_KEY])?;
    Ok(rows > 0)
}

pub fn table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [FTS_TABLE],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Replace-or-insert so re-indexing an existing id never duplicates it.
pub(crate) fn write_document(conn: &Connection, doc: &IndexedDocument) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM issues_fts WHERE rowid = ?1", [doc.id])?;
    conn.execute(
        "INSERT INTO issues_fts(rowid, title, description) VALUES(?1, ?2, ?3)",
        params![doc.id, doc.title, doc.description],
    )?;
    Ok(())
}
