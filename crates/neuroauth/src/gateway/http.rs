// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST identity gateway over reqwest.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | call | request |
//! |---|---|
//! | login | `POST /auth/login` `{username, password}` |
//! | logout | `POST /auth/logout` with bearer token |
//! | refresh | `POST /auth/refresh` `{refresh_token}` |
//! | current user | `GET /auth/me` with bearer token |

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::clock::Clock;
use crate::error::GatewayError;
use crate::gateway::IdentityGateway;
use crate::token::{Credentials, SessionUser, TokenPair};

/// Longest backend error text carried into a [`GatewayError`].
const MAX_ERROR_DETAIL: usize = 256;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Token response from the login and refresh endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(alias = "refreshToken")]
    refresh_token: String,
    /// Lifetime in seconds.
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<u64>,
    /// Absolute expiry in epoch milliseconds, when the backend sends one.
    #[serde(default, alias = "expiresAt")]
    expires_at: Option<u64>,
}

impl TokenResponse {
    fn into_pair(self, now_ms: u64) -> Result<TokenPair, GatewayError> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => now_ms.saturating_add(secs.saturating_mul(1000)),
            (None, None) => {
                return Err(GatewayError::InvalidResponse("token response without expiry".into()))
            }
        };
        let pair = TokenPair::new(self.access_token, self.refresh_token, expires_at);
        if !pair.is_well_formed() {
            return Err(GatewayError::InvalidResponse("token response with empty token".into()));
        }
        Ok(pair)
    }
}

/// Error body shapes commonly returned by the backend.
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// [`IdentityGateway`] backed by the REST identity API.
pub struct HttpIdentityGateway {
    base_url: String,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl HttpIdentityGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        ensure_crypto_provider();
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { base_url, http, clock })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn token_pair(&self, resp: reqwest::Response) -> Result<TokenPair, GatewayError> {
        let token: TokenResponse = decode(check(resp).await?).await?;
        token.into_pair(self.clock.now_ms())
    }
}

#[async_trait]
impl IdentityGateway for HttpIdentityGateway {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, GatewayError> {
        debug!(username = %credentials.username, "login request");
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(credentials)
            .send()
            .await
            .map_err(transport_error)?;
        self.token_pair(resp).await
    }

    async fn logout(&self, access_token: &str) -> Result<(), GatewayError> {
        let resp = self
            .http
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;
        check(resp).await?;
        Ok(())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, GatewayError> {
        let resp = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(transport_error)?;
        self.token_pair(resp).await
    }

    async fn current_user(&self, access_token: &str) -> Result<SessionUser, GatewayError> {
        let resp = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(check(resp).await?).await
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// Map a non-success status onto a [`GatewayError`].
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = error_detail(&body);
    Err(match status.as_u16() {
        401 | 403 => GatewayError::Unauthorized(message),
        429 => GatewayError::RateLimited,
        s if s >= 500 => GatewayError::Server { status: s, message },
        s => GatewayError::Rejected { status: s, message },
    })
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
    let body = resp.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn error_detail(body: &str) -> String {
    let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let detail = match (parsed.error, parsed.message) {
        (Some(error), Some(message)) => format!("{error}: {message}"),
        (Some(text), None) | (None, Some(text)) => text,
        (None, None) => body.trim().to_owned(),
    };
    detail.chars().take(MAX_ERROR_DETAIL).collect()
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
