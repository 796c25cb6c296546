// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error};

use neuroauth::config::{Command, Config};
use neuroauth::gateway::http::HttpIdentityGateway;
use neuroauth::{Clock, Credentials, SessionManager, SessionState, SessionUser, SystemClock};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

/// Session summary printed to stdout. Token values are left out.
#[derive(Debug, Serialize)]
struct StatusReport {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<SessionState> for StatusReport {
    fn from(state: SessionState) -> Self {
        Self {
            authenticated: state.is_authenticated,
            user: state.user,
            expires_at: state.tokens.map(|t| t.expires_at),
            error: state.error,
        }
    }
}

fn print_state(state: SessionState) -> anyhow::Result<i32> {
    let code = if state.is_authenticated { 0 } else { 1 };
    println!("{}", serde_json::to_string_pretty(&StatusReport::from(state))?);
    Ok(code)
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway =
        HttpIdentityGateway::new(&config.api_url, config.request_timeout(), Arc::clone(&clock))?;
    let store = config.token_store();
    debug!(state_dir = %config.resolved_state_dir().display(), key = store.key(), "using token store");

    let manager = SessionManager::builder(Arc::new(gateway))
        .store(Arc::new(store))
        .clock(clock)
        .settings(config.session_settings())
        .build();

    match config.command {
        Command::Login { username, password } => {
            print_state(manager.login(&Credentials::new(username, password)).await)
        }
        Command::Logout => print_state(manager.logout().await).map(|_| 0),
        Command::Status => print_state(manager.initialize().await),
        Command::Token => {
            let state = manager.initialize().await;
            if !state.is_authenticated {
                return print_state(state);
            }
            match manager.ensure_valid_token().await {
                Some(token) => {
                    println!("{token}");
                    Ok(0)
                }
                None => Ok(1),
            }
        }
        Command::Can { permissions } => {
            let state = manager.initialize().await;
            if !state.is_authenticated {
                return print_state(state);
            }
            // Settle any pending renewal first; the process exits right after.
            if manager.ensure_valid_token().await.is_none() {
                return Ok(1);
            }
            Ok(if manager.has_permission(&permissions) { 0 } else { 1 })
        }
    }
}
