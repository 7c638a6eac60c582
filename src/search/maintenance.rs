//! Out-of-band index repair: drop, rebuild, and consistency check.
//!
//! Both destructive operations hold the index's maintenance gate for their
//! whole run and apply their DDL/DML in a single IMMEDIATE transaction, so
//! readers on other connections see either the old index or the new one.

use crate::search::index::{self, SearchIndex};
use crate::storage::sqlite::{Result, SqliteStorage, StorageError, indexable_documents};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub removed_table: bool,
    pub removed_hooks: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub documents: usize,
    pub elapsed_ms: u64,
}

/// Differences between the index and the issue table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub hooks_installed: bool,
    pub table_present: bool,
    pub issues: usize,
    pub documents: usize,
    /// Issues with no document.
    pub missing: Vec<i64>,
    /// Documents with no issue.
    pub orphaned: Vec<i64>,
    /// Documents whose title/description differ from the issue.
    pub mismatched: Vec<i64>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.hooks_installed
            && self.table_present
            && self.missing.is_empty()
            && self.orphaned.is_empty()
            && self.mismatched.is_empty()
    }
}

fn gate(index: &SearchIndex) -> Result<index::MaintenanceGuard<'_>> {
    index
        .begin_maintenance()
        .ok_or(StorageError::MaintenanceInProgress)
}

/// Remove the hooks and every indexed document. A no-op when already dropped.
pub fn drop_index(storage: &mut SqliteStorage) -> Result<DropReport> {
    let index = storage.index().clone();
    let _guard = gate(&index)?;

    let tx = storage
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    let report = DropReport {
        removed_hooks: index::remove_hooks(&tx)?,
        removed_table: index::table_exists(&tx)?,
    };
    tx.execute_batch("DROP TABLE IF EXISTS issues_fts;")?;
    tx.commit()?;

    info!(
        removed_table = report.removed_table,
        removed_hooks = report.removed_hooks,
        "search_index_dropped"
    );
    Ok(report)
}

/// Recreate the index from the issue table and reinstall the hooks.
///
/// Runs as one transaction: an interrupted rebuild rolls back to whatever was
/// there before, and running it again simply replaces every document.
pub fn rebuild_index(storage: &mut SqliteStorage) -> Result<RebuildReport> {
    let index = storage.index().clone();
    let _guard = gate(&index)?;
    let start = Instant::now();

    let tx = storage
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch("DROP TABLE IF EXISTS issues_fts;")?;
    tx.execute_batch(index::CREATE_FTS_TABLE)?;

    let docs = indexable_documents(&tx)?;
    for doc in &docs {
        index::write_document(&tx, doc)?;
    }
    index::install_hooks(&tx)?;
    tx.commit()?;

    let report = RebuildReport {
        documents: docs.len(),
        elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(
        documents = report.documents,
        elapsed_ms = report.elapsed_ms,
        "search_index_rebuilt"
    );
    Ok(report)
}

/// Compare the index against the issue table without modifying either.
pub fn check_consistency(storage: &SqliteStorage) -> Result<ConsistencyReport> {
    let conn = storage.raw();
    let mut report = ConsistencyReport {
        hooks_installed: index::hooks_installed(conn)?,
        table_present: index::table_exists(conn)?,
        issues: storage.count_issues()?,
        ..ConsistencyReport::default()
    };
    if !report.table_present {
        report.missing = storage.list_issues()?.into_iter().map(|i| i.id).collect();
        return Ok(report);
    }

    let ids = |sql: &str| -> rusqlite::Result<Vec<i64>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    };

    report.documents = storage.index().documents(conn)?.len();
    report.missing =
        ids("SELECT id FROM issues WHERE id NOT IN (SELECT rowid FROM issues_fts) ORDER BY id")?;
    report.orphaned =
        ids("SELECT rowid FROM issues_fts WHERE rowid NOT IN (SELECT id FROM issues) ORDER BY rowid")?;
    report.mismatched = ids(
        "SELECT i.id FROM issues i JOIN issues_fts f ON f.rowid = i.id
         WHERE f.title IS NOT i.title OR f.description IS NOT i.description
         ORDER BY i.id",
    )?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::NewIssue;

    fn seeded() -> SqliteStorage {
        let mut storage = SqliteStorage::open_in_memory(SearchIndex::default()).unwrap();
        for title in ["one", "two", "three"] {
            storage.create_issue(&NewIssue::new(title)).unwrap();
        }
        storage
    }

    #[test]
    fn drop_is_idempotent() {
        let mut storage = seeded();
        let first = drop_index(&mut storage).unwrap();
        assert_eq!(
            first,
            DropReport {
                removed_table: true,
                removed_hooks: true
            }
        );
        let second = drop_index(&mut storage).unwrap();
        assert_eq!(second, DropReport::default());
    }

    #[test]
    fn rebuild_restores_dropped_index() {
        let mut storage = seeded();
        drop_index(&mut storage).unwrap();
        assert!(!check_consistency(&storage).unwrap().is_consistent());

        let report = rebuild_index(&mut storage).unwrap();
        assert_eq!(report.documents, 3);
        assert!(check_consistency(&storage).unwrap().is_consistent());
    }

    #[test]
    fn check_reports_drift() {
        let storage = seeded();
        let conn = storage.raw();
        conn.execute("DELETE FROM issues_fts WHERE rowid = 1", []).unwrap();
        conn.execute("UPDATE issues_fts SET title = 'stale' WHERE rowid = 2", [])
            .unwrap();
        conn.execute(
            "INSERT INTO issues_fts(rowid, title, description) VALUES(77, 'ghost', '')",
            [],
        )
        .unwrap();

        let report = check_consistency(&storage).unwrap();
        assert_eq!(report.missing, vec![1]);
        assert_eq!(report.mismatched, vec![2]);
        assert_eq!(report.orphaned, vec![77]);
        assert!(!report.is_consistent());
    }

    #[test]
    fn concurrent_maintenance_is_refused() {
        let mut storage = seeded();
        let index = storage.index().clone();
        let _guard = index.begin_maintenance().unwrap();
        assert!(matches!(
            rebuild_index(&mut storage),
            Err(StorageError::MaintenanceInProgress)
        ));
        assert!(matches!(
            drop_index(&mut storage),
            Err(StorageError::MaintenanceInProgress)
        ));
    }
}
