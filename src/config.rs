//! TOML configuration for the `tracker` binary.
//!
//! Lookup order: `--config <path>`, then `<config dir>/config.toml`, then
//! built-in defaults. The database path can additionally be overridden by
//! `--db` / `TRACKER_DB`, which always win over the file.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::search::snippet::SnippetConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub db_path: Option<PathBuf>,
    pub search: SearchSection,
}

/// `[search]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSection {
    pub snippet_tokens: usize,
    pub highlight_open: String,
    pub highlight_close: String,
    pub ellipsis: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        let snippet = SnippetConfig::default();
        Self {
            snippet_tokens: snippet.tokens,
            highlight_open: snippet.open,
            highlight_close: snippet.close,
            ellipsis: snippet.ellipsis,
        }
    }
}

impl SearchSection {
    pub fn snippet_config(&self) -> SnippetConfig {
        SnippetConfig {
            tokens: self.snippet_tokens,
            open: self.highlight_open.clone(),
            close: self.highlight_close.clone(),
            ellipsis: self.ellipsis.clone(),
        }
    }
}

impl Config {
    /// Load from an explicit path (must exist) or the default location
    /// (optional).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => {
                    tracing::debug!("config_file_absent_using_defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config_loaded");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.search.snippet_tokens == 0 {
            bail!("search.snippet_tokens must be at least 1");
        }
        Ok(())
    }

    /// Database path: command line / environment, then file, then default.
    pub fn resolve_db_path(&self, cli_db: Option<PathBuf>) -> PathBuf {
        cli_db
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(crate::default_db_path)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "issue-tracker", "tracker")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
