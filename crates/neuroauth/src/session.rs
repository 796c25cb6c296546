// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session orchestration: the one type the application talks to.
//!
//! ```text
//! Unauthenticated ──login──▶ Authenticated ──refresh ok──▶ Authenticated
//!        ▲                        │
//!        ├──── logout ────────────┤  (emits logout-complete)
//!        └──── refresh failed ────┘  (clears tokens, emits session-expired)
//! ```
//!
//! No public method returns an error. Failures surface as a [`SessionState`]
//! with `error` set, or as `None`/`false`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ErrorCategory;
use crate::events::{EventBus, EventNotifier, SessionEvent};
use crate::expiry::{ExpiryPolicy, TokenStatus};
use crate::gateway::IdentityGateway;
use crate::refresh::{RefreshCoordinator, RefreshTiming};
use crate::store::TokenStore;
use crate::token::{Credentials, SessionUser, TokenPair};

/// Error text for a session that could not be renewed.
pub const SESSION_EXPIRED: &str = "Session expired";

/// Immutable snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user: Option<SessionUser>,
    pub tokens: Option<TokenPair>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    pub fn unauthenticated() -> Self {
        Self { user: None, tokens: None, is_authenticated: false, is_loading: false, error: None }
    }

    /// Placeholder while an operation is in progress.
    pub fn loading() -> Self {
        Self { is_loading: true, ..Self::unauthenticated() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Self::unauthenticated() }
    }

    pub fn expired() -> Self {
        Self::failed(SESSION_EXPIRED)
    }

    pub fn authenticated(user: SessionUser, tokens: TokenPair) -> Self {
        Self {
            user: Some(user),
            tokens: Some(tokens),
            is_authenticated: true,
            is_loading: false,
            error: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

/// Permissions a caller requires. All must be granted.
pub trait RequiredPermissions {
    fn granted_by(&self, granted: &BTreeSet<String>) -> bool;
}

impl RequiredPermissions for str {
    fn granted_by(&self, granted: &BTreeSet<String>) -> bool {
        granted.contains(self)
    }
}

impl RequiredPermissions for String {
    fn granted_by(&self, granted: &BTreeSet<String>) -> bool {
        granted.contains(self.as_str())
    }
}

impl<S: AsRef<str>> RequiredPermissions for [S] {
    fn granted_by(&self, granted: &BTreeSet<String>) -> bool {
        self.iter().all(|p| granted.contains(p.as_ref()))
    }
}

impl<S: AsRef<str>, const N: usize> RequiredPermissions for [S; N] {
    fn granted_by(&self, granted: &BTreeSet<String>) -> bool {
        self.as_slice().granted_by(granted)
    }
}

impl<S: AsRef<str>> RequiredPermissions for Vec<S> {
    fn granted_by(&self, granted: &BTreeSet<String>) -> bool {
        self.as_slice().granted_by(granted)
    }
}

/// Tunables for a [`SessionManager`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Refresh this long before expiry.
    pub refresh_buffer: Duration,
    /// Floor on the re-arm delay after a successful refresh.
    pub min_refresh_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let timing = RefreshTiming::default();
        Self { refresh_buffer: timing.buffer, min_refresh_interval: timing.min_interval }
    }
}

/// Builder for [`SessionManager`] with in-memory defaults.
pub struct SessionManagerBuilder {
    gateway: Arc<dyn IdentityGateway>,
    store: Option<Arc<TokenStore>>,
    events: Option<Arc<dyn EventNotifier>>,
    clock: Option<Arc<dyn Clock>>,
    settings: SessionSettings,
}

impl SessionManagerBuilder {
    pub fn store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventNotifier>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SessionManager {
        let store = self.store.unwrap_or_else(|| Arc::new(TokenStore::in_memory()));
        let events = self.events.unwrap_or_else(|| Arc::new(EventBus::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&self.gateway),
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&clock),
            RefreshTiming {
                buffer: self.settings.refresh_buffer,
                min_interval: self.settings.min_refresh_interval,
            },
        );
        SessionManager {
            gateway: self.gateway,
            store,
            events,
            policy: ExpiryPolicy::new(clock),
            coordinator,
            settings: self.settings,
            user: Mutex::new(None),
        }
    }
}

/// Owns the token lifecycle for one signed-in user.
pub struct SessionManager {
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<TokenStore>,
    events: Arc<dyn EventNotifier>,
    policy: ExpiryPolicy,
    coordinator: RefreshCoordinator,
    settings: SessionSettings,
    user: Mutex<Option<SessionUser>>,
}

impl SessionManager {
    pub fn builder(gateway: Arc<dyn IdentityGateway>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            gateway,
            store: None,
            events: None,
            clock: None,
            settings: SessionSettings::default(),
        }
    }

    pub fn events(&self) -> &Arc<dyn EventNotifier> {
        &self.events
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Snapshot of the current session without touching the network.
    pub fn state(&self) -> SessionState {
        let user = self.user.lock().clone();
        match (user, self.store.load()) {
            (Some(user), Some(tokens)) => SessionState::authenticated(user, tokens),
            _ => SessionState::unauthenticated(),
        }
    }

    /// Restore a persisted session.
    pub async fn initialize(&self) -> SessionState {
        let Some(pair) = self.store.load() else {
            debug!("no persisted session");
            return SessionState::unauthenticated();
        };

        if self.policy.classify(&pair, Duration::ZERO) == TokenStatus::Expired {
            debug!("persisted tokens expired, refreshing");
            let Some(renewed) = self.coordinator.refresh().await else {
                *self.user.lock() = None;
                return SessionState::expired();
            };
            return self.establish(renewed, false).await;
        }

        self.establish(pair, true).await
    }

    /// Fetch the user for `pair` and mark the session authenticated.
    ///
    /// With `retry`, an authorization failure gets one refresh-and-retry.
    async fn establish(&self, pair: TokenPair, retry: bool) -> SessionState {
        match self.gateway.current_user(&pair.access_token).await {
            Ok(user) => self.authenticated(user, pair),
            Err(e) if e.is_unauthorized() && retry => {
                info!("access token rejected, refreshing once");
                let Some(renewed) = self.coordinator.refresh().await else {
                    *self.user.lock() = None;
                    return SessionState::expired();
                };
                match self.gateway.current_user(&renewed.access_token).await {
                    Ok(user) => self.authenticated(user, renewed),
                    Err(e) => {
                        warn!(err = %e, "user lookup failed after refresh");
                        self.terminate()
                    }
                }
            }
            Err(e) if e.is_unauthorized() => {
                warn!(err = %e, "access token rejected");
                self.terminate()
            }
            Err(e) => {
                // Transient failure: keep the persisted tokens for the next attempt.
                warn!(err = %e, "user lookup failed");
                *self.user.lock() = None;
                SessionState::failed(e.category().user_message())
            }
        }
    }

    fn authenticated(&self, user: SessionUser, pair: TokenPair) -> SessionState {
        *self.user.lock() = Some(user.clone());
        self.coordinator.schedule_proactive_refresh();
        info!(user = %user.username, "session established");
        SessionState::authenticated(user, pair)
    }

    /// End the session after a failure.
    fn terminate(&self) -> SessionState {
        self.coordinator.invalidate();
        self.store.clear();
        *self.user.lock() = None;
        self.events.emit(SessionEvent::SessionExpired);
        SessionState::expired()
    }

    /// Sign in with `credentials`.
    pub async fn login(&self, credentials: &Credentials) -> SessionState {
        if credentials.is_blank() {
            return SessionState::failed(ErrorCategory::InvalidCredentials.user_message());
        }

        let pair = match self.gateway.login(credentials).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(username = %credentials.username, category = %e.category(), "login failed");
                return SessionState::failed(e.category().user_message());
            }
        };

        // A login supersedes whatever session existed before.
        self.coordinator.invalidate();
        self.store.save(&pair);

        match self.gateway.current_user(&pair.access_token).await {
            Ok(user) => self.authenticated(user, pair),
            Err(e) => {
                warn!(err = %e, "user lookup failed after login");
                self.store.clear();
                *self.user.lock() = None;
                SessionState::failed(e.category().user_message())
            }
        }
    }

    /// Sign out. Local state is cleared whether or not the backend agrees.
    pub async fn logout(&self) -> SessionState {
        if let Some(pair) = self.store.load() {
            if let Err(e) = self.gateway.logout(&pair.access_token).await {
                warn!(err = %e, "remote logout failed, clearing local session anyway");
            }
        }

        self.coordinator.invalidate();
        self.store.clear();
        *self.user.lock() = None;
        self.events.emit(SessionEvent::LogoutComplete);
        info!("logged out");
        SessionState::unauthenticated()
    }

    /// An access token that is not about to expire, refreshing if needed.
    pub async fn ensure_valid_token(&self) -> Option<String> {
        if let Some(pair) = self.store.load() {
            if self.policy.classify(&pair, self.settings.refresh_buffer) == TokenStatus::Valid {
                return Some(pair.access_token);
            }
        }
        self.coordinator.refresh().await.map(|pair| pair.access_token)
    }

    /// Whether the cached user holds every permission in `required`.
    ///
    /// Never blocks on the network. A token inside the refresh buffer triggers
    /// a background refresh; the answer still comes from cached permissions.
    pub fn has_permission<R: RequiredPermissions + ?Sized>(&self, required: &R) -> bool {
        let Some(pair) = self.store.load() else {
            return false;
        };

        match self.policy.classify(&pair, self.settings.refresh_buffer) {
            TokenStatus::Expired => return false,
            TokenStatus::Expiring => self.coordinator.refresh_in_background(),
            TokenStatus::Valid => {}
        }

        self.user.lock().as_ref().is_some_and(|user| required.granted_by(&user.permissions))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
