mod util;

use tracker_search::model::types::{IssueStatus, IssueUpdate, NewIssue, Priority};
use tracker_search::search::SearchIndex;
use tracker_search::search::index::IndexOp;
use tracker_search::search::maintenance::check_consistency;
use tracker_search::storage::sqlite::{SqliteStorage, StorageError};
use util::Tracker;

fn assert_in_sync(storage: &SqliteStorage) {
    let report = check_consistency(storage).unwrap();
    assert!(report.is_consistent(), "index drifted: {report:?}");
    assert_eq!(report.issues, report.documents);
}

#[test]
fn index_tracks_mixed_write_sequence() {
    let mut storage = SqliteStorage::open_in_memory(SearchIndex::default()).unwrap();
    let mut live = Vec::new();

    for round in 0..30_i64 {
        let issue = storage
            .create_issue(
                &NewIssue::new(format!("issue {round}"))
                    .with_description(format!("round {round} text")),
            )
            .unwrap();
        live.push(issue.id);

        match round % 5 {
            1 => {
                let id = live[live.len() / 2];
                storage
                    .update_issue(id, &IssueUpdate::title(format!("retitled {round}")))
                    .unwrap();
            }
            2 => {
                let id = live.remove(0);
                storage.delete_issue(id).unwrap();
            }
            3 => {
                let id = *live.last().unwrap();
                storage
                    .update_issue(id, &IssueUpdate::status(IssueStatus::Done))
                    .unwrap();
            }
            4 => {
                let id = live[0];
                storage
                    .update_issue(id, &IssueUpdate::description(format!("edited {round}")))
                    .unwrap();
            }
            _ => {}
        }
        assert_in_sync(&storage);
    }
    assert_eq!(storage.count_issues().unwrap(), live.len());
}

#[test]
fn failed_index_insert_rolls_back_issue() {
    let mut t = Tracker::new();
    t.create("kept", "");
    // Hooks stay installed while the table is gone, so every hook fails.
    t.side_connection()
        .execute_batch("DROP TABLE issues_fts")
        .unwrap();

    let err = t.storage.create_issue(&NewIssue::new("lost")).unwrap_err();
    assert!(matches!(
        err,
        StorageError::IndexWriteFailed {
            op: IndexOp::Insert,
            ..
        }
    ));
    assert_eq!(t.storage.count_issues().unwrap(), 1);
}

#[test]
fn failed_index_delete_keeps_issue() {
    let mut t = Tracker::new();
    let issue = t.create("survivor", "");
    t.side_connection()
        .execute_batch("DROP TABLE issues_fts")
        .unwrap();

    let err = t.storage.delete_issue(issue.id).unwrap_err();
    assert!(matches!(
        err,
        StorageError::IndexWriteFailed {
            op: IndexOp::Delete,
            ..
        }
    ));
    assert!(t.storage.get_issue(issue.id).unwrap().is_some());
}

#[test]
fn update_against_missing_document_rolls_back() {
    let mut t = Tracker::new();
    let issue = t.create("before", "");
    t.side_connection()
        .execute("DELETE FROM issues_fts WHERE rowid = ?1", [issue.id])
        .unwrap();

    let err = t
        .storage
        .update_issue(issue.id, &IssueUpdate::title("after"))
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::IndexWriteFailed {
            op: IndexOp::Update,
            ..
        }
    ));
    assert_eq!(t.storage.get_issue(issue.id).unwrap().unwrap().title, "before");
}

#[test]
fn non_text_update_leaves_index_untouched() {
    let mut storage = SqliteStorage::open_in_memory(SearchIndex::default()).unwrap();
    let issue = storage.create_issue(&NewIssue::new("steady")).unwrap();
    let update = IssueUpdate {
        priority: Some(Priority::High),
        status: Some(IssueStatus::InProgress),
        ..IssueUpdate::default()
    };
    let outcome = storage.update_issue(issue.id, &update).unwrap();
    assert!(!outcome.reindexed.any());
    assert_eq!(outcome.issue.priority, Priority::High);
    assert_in_sync(&storage);
}

#[test]
fn committed_writes_are_visible_to_separate_reader() {
    let mut t = Tracker::new();
    let issue = t.create("Visible across connections", "");
    let reopened = SqliteStorage::open(&t.db_path(), SearchIndex::default()).unwrap();
    assert_eq!(reopened.get_issue(issue.id).unwrap().unwrap().title, issue.title);
    assert_eq!(t.search_ids("connections"), vec![issue.id]);
}

#[test]
fn writes_blocked_while_maintenance_holds_shared_handle() {
    let mut t = Tracker::new();
    let issue = t.create("guarded", "");
    let index = t.storage.index().clone();
    let guard = index.begin_maintenance().unwrap();

    assert!(matches!(
        t.storage.create_issue(&NewIssue::new("nope")),
        Err(StorageError::MaintenanceInProgress)
    ));
    assert!(matches!(
        t.storage.delete_issue(issue.id),
        Err(StorageError::MaintenanceInProgress)
    ));
    drop(guard);
    t.storage.delete_issue(issue.id).unwrap();
}
