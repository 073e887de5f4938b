/*!
common/src/lib.rs

Shared configuration types and DB helper functions for the research agent.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an optional override file
- A helper to initialize the SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_DB_PATH: &str = "data/research_history.db";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/research_history.db")
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

/// HTTP listener and browser access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    /// Origins allowed to call the API from a browser. `"*"` allows any origin.
    pub allowed_origins: Option<Vec<String>>,
}

/// Search engine results page settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// Upper bound applied to the `num_results` a client may request
    pub max_results: Option<usize>,
    pub user_agent: Option<String>,
}

/// Target page fetching and extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: Option<u64>,
    pub max_content_length: Option<usize>,
    pub user_agent: Option<String>,
}

/// Remote LLM config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    /// Name of an environment variable that overrides `model` when set
    pub model_env: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// LLM top-level config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
}

/// Prompt shaping for the summarizer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub max_items: Option<usize>,
    pub excerpt_chars: Option<usize>,
}

/// History persistence policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// When true a failed save fails the whole research request; otherwise it is logged.
    pub fail_on_save_error: Option<bool>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub server: Option<ServerConfig>,
    pub search: Option<SearchConfig>,
    pub fetch: Option<FetchConfig>,
    pub llm: Option<LlmConfig>,
    pub summary: Option<SummaryConfig>,
    pub history: Option<HistoryConfig>,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.server
            .as_ref()
            .and_then(|s| s.allowed_origins.clone())
            .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()])
    }

    pub fn search_max_results(&self) -> usize {
        self.search
            .as_ref()
            .and_then(|s| s.max_results)
            .unwrap_or(20)
            .max(1)
    }

    pub fn fail_on_save_error(&self) -> bool {
        self.history
            .as_ref()
            .and_then(|h| h.fail_on_save_error)
            .unwrap_or(false)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and returns a configured `SqlitePool`
/// (WAL journal, at most 5 connections). Connections are acquired per query and
/// returned to the pool when the query completes.
///
/// Example:
///   let pool = init_db_pool("data/research_history.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
