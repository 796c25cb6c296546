// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::session::SessionSettings;
use crate::store::{FileStore, TokenStore, DEFAULT_STORAGE_KEY};

/// Session and token lifecycle client for the clinical REST backend.
#[derive(Debug, Parser)]
#[command(name = "neuroauth", version, about)]
pub struct Config {
    /// Base URL of the identity backend (e.g. https://api.example.org).
    #[arg(long, env = "NEUROAUTH_API_URL", default_value = "http://localhost:8080/api")]
    pub api_url: String,

    /// Directory holding persisted tokens.
    #[arg(long, env = "NEUROAUTH_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Storage key for the token pair.
    #[arg(long, env = "NEUROAUTH_STORAGE_KEY", default_value = DEFAULT_STORAGE_KEY)]
    pub storage_key: String,

    /// Refresh this many seconds before the access token expires.
    #[arg(long, env = "NEUROAUTH_REFRESH_BUFFER_SECS", default_value = "300")]
    pub refresh_buffer_secs: u64,

    /// Minimum seconds between consecutive proactive refreshes.
    #[arg(long, env = "NEUROAUTH_MIN_REFRESH_INTERVAL_SECS", default_value = "30")]
    pub min_refresh_interval_secs: u64,

    /// Per-request timeout in milliseconds.
    #[arg(long, env = "NEUROAUTH_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "NEUROAUTH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "NEUROAUTH_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Sign in and persist the token pair.
    Login {
        #[arg(long, env = "NEUROAUTH_USERNAME")]
        username: String,
        #[arg(long, env = "NEUROAUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and clear persisted tokens.
    Logout,
    /// Restore the persisted session and print it as JSON.
    Status,
    /// Print a valid access token, refreshing if needed.
    Token,
    /// Exit 0 when the session holds every listed permission.
    Can {
        #[arg(required = true)]
        permissions: Vec<String>,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_url.trim().is_empty() {
            anyhow::bail!("--api-url must not be empty");
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("--request-timeout-ms must be greater than zero");
        }
        if self.storage_key.trim().is_empty() {
            anyhow::bail!("--storage-key must not be empty");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            refresh_buffer: Duration::from_secs(self.refresh_buffer_secs),
            min_refresh_interval: Duration::from_secs(self.min_refresh_interval_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Explicit `--state-dir`, else [`state_dir`].
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(state_dir)
    }

    /// File-backed token store under the resolved state directory.
    pub fn token_store(&self) -> TokenStore {
        let backend = Arc::new(FileStore::new(self.resolved_state_dir()));
        TokenStore::with_key(backend, self.storage_key.clone())
    }
}

/// Default state directory when `--state-dir` is unset.
///
/// `$XDG_STATE_HOME/neuroauth`, then `$HOME/.local/state/neuroauth`.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("neuroauth");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/neuroauth");
    }
    PathBuf::from(".neuroauth")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
