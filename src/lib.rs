pub mod config;
pub mod model;
pub mod search;
pub mod storage;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use config::Config;
use model::types::{Issue, IssueStatus, IssueUpdate, NewIssue, Priority, SearchResult};
use search::maintenance::{self, ConsistencyReport};
use search::{SearchClient, SearchIndex, SearchRequest};
use storage::sqlite::SqliteStorage;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "tracker",
    version,
    about = "Issue store with transactional full-text search"
)]
pub struct Cli {
    /// Path to the SQLite database (defaults to platform data dir)
    #[arg(long, env = "TRACKER_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Config file (defaults to platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Full-text search over issue titles and descriptions
    Search {
        /// Free-form query; operators are treated as literal text
        query: String,

        /// Maximum results (1-100, default 20)
        #[arg(long)]
        limit: Option<String>,
    },
    /// Create an issue
    Create {
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, value_parser = parse_status)]
        status: Option<IssueStatus>,

        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
    },
    /// Update fields of an existing issue
    Update {
        id: i64,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, value_parser = parse_status)]
        status: Option<IssueStatus>,

        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
    },
    /// Delete an issue permanently
    Delete { id: i64 },
    /// Search index maintenance
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    /// Remove the index and stop indexing writes
    Drop,
    /// Recreate the index from all issues
    Rebuild,
    /// Compare the index with the issue table (exit 1 on drift)
    Check,
}

fn parse_status(s: &str) -> Result<IssueStatus, String> {
    IssueStatus::parse(s).ok_or_else(|| {
        format!("unknown status `{s}` (backlog, todo, in_progress, done, canceled)")
    })
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::parse(s)
        .ok_or_else(|| format!("unknown priority `{s}` (none, urgent, high, medium, low)"))
}

pub async fn run() -> Result<()> {
    run_with(Cli::parse())
}

pub fn run_with(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tracker", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Man => {
            let man = clap_mangen::Man::new(Cli::command());
            man.render(&mut std::io::stdout())?;
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load(cli.config.as_deref())?;
    let db_path = config.resolve_db_path(cli.db);
    let index = SearchIndex::new(config.search.snippet_config());
    let mut storage = SqliteStorage::open(&db_path, index.clone())
        .with_context(|| format!("opening database {}", db_path.display()))?;
    tracing::debug!(db = %db_path.display(), "database_opened");

    match cli.command {
        Commands::Search { query, limit } => {
            let mut request = SearchRequest::new(query);
            request.limit = limit;
            let hits = search_with(&db_path, index, &request)?;
            if cli.json {
                print_json(&hits)
            } else {
                print_hits(&hits);
                Ok(())
            }
        }
        Commands::Create {
            title,
            description,
            status,
            priority,
        } => {
            let new = NewIssue {
                title,
                description,
                status: status.unwrap_or_default(),
                priority: priority.unwrap_or_default(),
            };
            let issue = storage.create_issue(&new)?;
            emit_issue(&issue, cli.json)
        }
        Commands::Update {
            id,
            title,
            description,
            status,
            priority,
        } => {
            let update = IssueUpdate {
                title,
                description,
                status,
                priority,
            };
            let outcome = storage.update_issue(id, &update)?;
            emit_issue(&outcome.issue, cli.json)
        }
        Commands::Delete { id } => {
            storage.delete_issue(id)?;
            if cli.json {
                print_json(&serde_json::json!({ "deleted": id }))
            } else {
                println!("deleted issue {id}");
                Ok(())
            }
        }
        Commands::Index { action } => run_index(&mut storage, action, cli.json),
        Commands::Completions { .. } | Commands::Man => Ok(()),
    }
}

fn search_with(
    db_path: &Path,
    index: SearchIndex,
    request: &SearchRequest,
) -> Result<Vec<SearchResult>> {
    let client = SearchClient::open(db_path, index)?;
    Ok(client.search(request)?)
}

fn run_index(storage: &mut SqliteStorage, action: IndexAction, json: bool) -> Result<()> {
    match action {
        IndexAction::Drop => {
            let report = maintenance::drop_index(storage)?;
            if json {
                return print_json(&report);
            }
            if report.removed_table || report.removed_hooks {
                println!("search index dropped; writes are no longer indexed");
            } else {
                println!("search index already absent");
            }
            Ok(())
        }
        IndexAction::Rebuild => {
            let report = maintenance::rebuild_index(storage)?;
            if json {
                return print_json(&report);
            }
            println!(
                "rebuilt search index: {} documents in {} ms",
                report.documents, report.elapsed_ms
            );
            Ok(())
        }
        IndexAction::Check => {
            let report = maintenance::check_consistency(storage)?;
            if json {
                print_json(&report)?;
            } else {
                print_consistency(&report);
            }
            if !report.is_consistent() {
                bail!("search index is out of sync; run `tracker index rebuild`");
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn emit_issue(issue: &Issue, json: bool) -> Result<()> {
    if json {
        return print_json(issue);
    }
    println!(
        "#{} [{}] [{}] {}",
        issue.number,
        issue.status.as_str(),
        issue.priority.as_str(),
        issue.title
    );
    Ok(())
}

fn print_hits(hits: &[SearchResult]) {
    if hits.is_empty() {
        println!("no matches");
        return;
    }
    for hit in hits {
        println!("#{} [{}] {}", hit.number, hit.status.as_str(), hit.title_snippet);
        if !hit.description_snippet.is_empty() {
            println!("    {}", hit.description_snippet);
        }
    }
}

fn print_consistency(report: &ConsistencyReport) {
    println!("hooks installed: {}", report.hooks_installed);
    println!("index present:   {}", report.table_present);
    println!("issues:          {}", report.issues);
    println!("documents:       {}", report.documents);
    for (label, ids) in [
        ("missing", &report.missing),
        ("orphaned", &report.orphaned),
        ("mismatched", &report.mismatched),
    ] {
        if !ids.is_empty() {
            println!("{label}: {ids:?}");
        }
    }
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("tracker.db")
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "issue-tracker", "tracker").map_or_else(
        || PathBuf::from("."),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn status_and_priority_parsers() {
        assert_eq!(parse_status("in_progress"), Ok(IssueStatus::InProgress));
        assert!(parse_status("started").unwrap_err().contains("backlog"));
        assert_eq!(parse_priority("urgent"), Ok(Priority::Urgent));
        assert!(parse_priority("p0").is_err());
    }

    #[test]
    fn index_subcommands_parse() {
        let cli = Cli::try_parse_from(["tracker", "--db", "x.db", "index", "rebuild"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index {
                action: IndexAction::Rebuild
            }
        ));
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
    }
}
