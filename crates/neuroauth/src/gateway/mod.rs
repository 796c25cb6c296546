// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity backend boundary.
//!
//! The session core never talks HTTP directly; it consumes an
//! [`IdentityGateway`]. [`http::HttpIdentityGateway`] is the REST
//! implementation used by the binary.

pub mod http;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::token::{Credentials, SessionUser, TokenPair};

/// Network calls the session core depends on.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Exchange credentials for a token pair.
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, GatewayError>;

    /// Revoke the session server-side. Best-effort from the core's view.
    async fn logout(&self, access_token: &str) -> Result<(), GatewayError>;

    /// Exchange a refresh token for a new pair.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, GatewayError>;

    /// Fetch the user owning `access_token`. Fails with
    /// [`GatewayError::Unauthorized`] when the token is rejected.
    async fn current_user(&self, access_token: &str) -> Result<SessionUser, GatewayError>;
}
