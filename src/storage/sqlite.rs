//! `SQLite` backend: schema, pragmas, migrations, and the issue write path.
//!
//! Every mutation of `issues` goes through [`SqliteStorage::create_issue`],
//! [`SqliteStorage::update_issue`] or [`SqliteStorage::delete_issue`]. Each of
//! these opens one transaction, performs the row change, runs the matching
//! search-index hook on the same transaction, and commits both or neither.

use crate::model::types::{IndexedDocument, Issue, IssueUpdate, NewIssue};
use crate::search::index::{self, IndexOp, IndexedFields, SearchIndex};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the primary store and its index hooks.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The index half of a write failed; the whole transaction was rolled back.
    #[error("search index {op} failed, write rolled back: {source}")]
    IndexWriteFailed {
        op: IndexOp,
        #[source]
        source: rusqlite::Error,
    },

    /// Drop/rebuild holds the index; retry after a short delay.
    #[error("search index maintenance in progress, retry shortly")]
    MaintenanceInProgress,

    #[error("issue {0} not found")]
    IssueNotFound(i64),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(i64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

fn index_failed(op: IndexOp) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |source| StorageError::IndexWriteFailed { op, source }
}

/// Public schema version constant for external checks.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

const SCHEMA_VERSION: i64 = CURRENT_SCHEMA_VERSION;

const NUMBER_SEQ_KEY: &str = "issue_number_seq";

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY,
    number INTEGER NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'backlog',
    priority TEXT NOT NULL DEFAULT 'none',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
CREATE INDEX IF NOT EXISTS idx_issues_updated ON issues(updated_at DESC);
";

// Search index plus backfill; the hook flag is set in the same transaction.
const MIGRATION_V2_BACKFILL: &str = r"
DELETE FROM issues_fts;
INSERT INTO issues_fts(rowid, title, description)
SELECT id, title, description FROM issues;
";

/// Outcome of [`SqliteStorage::update_issue`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub issue: Issue,
    /// Indexed columns rewritten by the hook; empty when only non-indexed
    /// fields changed or hooks are dropped.
    pub reindexed: IndexedFields,
}

/// Issue store. Its connection is never handed out for writing: the methods
/// below are the only way to change `issues` or `issues_fts`.
///
/// ```compile_fail
/// use tracker_search::search::SearchIndex;
/// use tracker_search::storage::sqlite::SqliteStorage;
///
/// let storage = SqliteStorage::open_in_memory(SearchIndex::default()).unwrap();
/// storage.raw().execute("DELETE FROM issues", []).unwrap();
/// ```
pub struct SqliteStorage {
    conn: Connection,
    index: SearchIndex,
}

impl SqliteStorage {
    pub fn open(path: &Path, index: SearchIndex) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        init_meta(&conn)?;
        migrate(&mut conn)?;

        info!(path = %path.display(), "issue_store_opened");
        Ok(Self { conn, index })
    }

    /// Private in-memory store; handy for tests and dry runs.
    pub fn open_in_memory(index: SearchIndex) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_common_pragmas(&conn)?;
        init_meta(&conn)?;
        migrate(&mut conn)?;
        Ok(Self { conn, index })
    }

    pub(crate) fn raw(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Documents currently held by the search index, in id order.
    pub fn indexed_documents(&self) -> Result<Vec<IndexedDocument>> {
        Ok(self.index.documents(&self.conn)?)
    }

    pub fn schema_version(&self) -> Result<i64> {
        Ok(read_schema_version(&self.conn)?.unwrap_or(0))
    }

    // -------------------------------------------------------------------------
    // Write path (primary row + index hook, one transaction)
    // -------------------------------------------------------------------------

    pub fn create_issue(&mut self, new: &NewIssue) -> Result<Issue> {
        let _active = self
            .index
            .enter()
            .ok_or(StorageError::MaintenanceInProgress)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Self::now_millis();
        let number = next_issue_number(&tx)?;
        tx.execute(
            "INSERT INTO issues(number, title, description, status, priority, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                number,
                new.title,
                new.description,
                new.status,
                new.priority,
                now
            ],
        )?;
        let issue = Issue {
            id: tx.last_insert_rowid(),
            number,
            title: new.title.clone(),
            description: new.description.clone(),
            status: new.status,
            priority: new.priority,
            created_at: now,
            updated_at: now,
        };

        let indexed = self
            .index
            .on_insert(&tx, &IndexedDocument::from(&issue))
            .map_err(index_failed(IndexOp::Insert))?;
        tx.commit()?;

        debug!(issue_id = issue.id, number, indexed, "issue_created");
        Ok(issue)
    }

    pub fn update_issue(&mut self, id: i64, update: &IssueUpdate) -> Result<UpdateOutcome> {
        let _active = self
            .index
            .enter()
            .ok_or(StorageError::MaintenanceInProgress)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = fetch_issue(&tx, id)?.ok_or(StorageError::IssueNotFound(id))?;
        if update.is_empty() {
            return Ok(UpdateOutcome {
                issue: current,
                reindexed: IndexedFields::default(),
            });
        }

        let mut next = current.clone();
        if let Some(title) = &update.title {
            next.title.clone_from(title);
        }
        if let Some(description) = &update.description {
            next.description.clone_from(description);
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(priority) = update.priority {
            next.priority = priority;
        }
        next.updated_at = Self::now_millis().max(current.updated_at);

        tx.execute(
            "UPDATE issues SET title = ?1, description = ?2, status = ?3, priority = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                next.title,
                next.description,
                next.status,
                next.priority,
                next.updated_at,
                id
            ],
        )?;

        let title_changed = next.title != current.title;
        let description_changed = next.description != current.description;
        let reindexed = self
            .index
            .on_update(
                &tx,
                id,
                title_changed.then_some(next.title.as_str()),
                description_changed.then_some(next.description.as_str()),
            )
            .map_err(index_failed(IndexOp::Update))?;
        tx.commit()?;

        debug!(
            issue_id = id,
            title = reindexed.title,
            description = reindexed.description,
            "issue_updated"
        );
        Ok(UpdateOutcome {
            issue: next,
            reindexed,
        })
    }

    pub fn delete_issue(&mut self, id: i64) -> Result<()> {
        let _active = self
            .index
            .enter()
            .ok_or(StorageError::MaintenanceInProgress)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = tx.execute("DELETE FROM issues WHERE id = ?1", [id])?;
        if rows == 0 {
            return Err(StorageError::IssueNotFound(id));
        }
        let removed = self
            .index
            .on_delete(&tx, id)
            .map_err(index_failed(IndexOp::Delete))?;
        tx.commit()?;

        debug!(issue_id = id, removed, "issue_deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        Ok(fetch_issue(&self.conn, id)?)
    }

    pub fn list_issues(&self) -> Result<Vec<Issue>> {
        let mut stmt = self.conn.prepare(&format!("{ISSUE_COLUMNS} ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_issue)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Get current time as milliseconds since epoch.
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Open a read-only connection with the same busy/cache settings as the store.
pub fn open_readonly(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    apply_common_pragmas(&conn)?;
    Ok(conn)
}

const ISSUE_COLUMNS: &str = "SELECT id, number, title, description, status, priority, created_at, updated_at FROM issues";

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        number: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn fetch_issue(conn: &Connection, id: i64) -> rusqlite::Result<Option<Issue>> {
    conn.query_row(&format!("{ISSUE_COLUMNS} WHERE id = ?1"), [id], row_to_issue)
        .optional()
}

/// Next display number. The high-water mark lives in `meta`, so numbers of
/// hard-deleted issues are never handed out again.
fn next_issue_number(tx: &Transaction<'_>) -> rusqlite::Result<i64> {
    let number: i64 = tx.query_row(
        "SELECT MAX(
             COALESCE((SELECT CAST(value AS INTEGER) FROM meta WHERE key = ?1), 0),
             COALESCE((SELECT MAX(number) FROM issues), 0)
         ) + 1",
        [NUMBER_SEQ_KEY],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT OR REPLACE INTO meta(key, value) VALUES(?1, ?2)",
        params![NUMBER_SEQ_KEY, number.to_string()],
    )?;
    Ok(number)
}

/// Every issue as an index document, in id order. Used by rebuild.
pub(crate) fn indexable_documents(tx: &Transaction<'_>) -> rusqlite::Result<Vec<IndexedDocument>> {
    let mut stmt = tx.prepare("SELECT id, title, description FROM issues ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(IndexedDocument {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
        })
    })?;
    rows.collect()
}

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;
    apply_common_pragmas(conn)
}

fn apply_common_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn init_meta(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    if read_schema_version(conn)?.is_none() {
        // Start at version 0 so migrate() applies the full schema on first open.
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', '0')",
            [],
        )?;
    }
    Ok(())
}

fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
    )
    .optional()
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current = read_schema_version(conn)?.unwrap_or(0);
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    match current {
        0 => {
            tx.execute_batch(MIGRATION_V1)?;
            migrate_v2(&tx)?;
        }
        1 => migrate_v2(&tx)?,
        v => return Err(StorageError::UnsupportedSchema(v)),
    }
    tx.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;

    info!(from = current, to = SCHEMA_VERSION, "schema_migrated");
    Ok(())
}

fn migrate_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(index::CREATE_FTS_TABLE)?;
    tx.execute_batch(MIGRATION_V2_BACKFILL)?;
    index::install_hooks(tx)
}
