use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tempfile::TempDir;
use tracker_search::model::types::{Issue, NewIssue, SearchResult};
use tracker_search::search::{SearchClient, SearchIndex};
use tracker_search::storage::sqlite::SqliteStorage;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || CaptureWriter(writer.clone()))
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

#[allow(dead_code)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A file-backed store plus a search client sharing one index handle.
#[allow(dead_code)]
pub struct Tracker {
    pub dir: TempDir,
    pub storage: SqliteStorage,
    pub client: SearchClient,
}

#[allow(dead_code)]
impl Tracker {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db_path = dir.path().join("tracker.db");
        let index = SearchIndex::default();
        let storage = SqliteStorage::open(&db_path, index.clone()).expect("open storage");
        let client = SearchClient::open(&db_path, index).expect("open client");
        Self {
            dir,
            storage,
            client,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("tracker.db")
    }

    /// A second connection to the same file, for tampering with the index
    /// behind the store's back.
    pub fn side_connection(&self) -> Connection {
        Connection::open(self.db_path()).expect("open side connection")
    }

    pub fn create(&mut self, title: &str, description: &str) -> Issue {
        self.storage
            .create_issue(&NewIssue::new(title).with_description(description))
            .expect("create issue")
    }

    pub fn search(&self, q: &str) -> Vec<SearchResult> {
        self.client.query(q, None).expect("search")
    }

    pub fn search_ids(&self, q: &str) -> Vec<i64> {
        self.search(q).into_iter().map(|r| r.id).collect()
    }
}

/// Deterministic issue text: `count` titles sharing `common`, each with a
/// unique `tokN` word.
#[allow(dead_code)]
pub fn seed_issues(tracker: &mut Tracker, count: usize, common: &str) -> Vec<Issue> {
    (0..count)
        .map(|i| {
            tracker.create(
                &format!("{common} issue tok{i}"),
                &format!("details for {common} number {i}"),
            )
        })
        .collect()
}
