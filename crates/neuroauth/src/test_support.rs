// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scriptable gateway and polling helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::GatewayError;
use crate::events::{EventBus, EventNotifier, Listener, SessionEvent, SessionEventKind};
use crate::gateway::IdentityGateway;
use crate::token::{Credentials, SessionUser, TokenPair};

/// Build a user with the given permissions.
pub fn user_with(permissions: &[&str]) -> SessionUser {
    SessionUser {
        id: "u-1".to_owned(),
        username: "dr.rivera".to_owned(),
        email: "rivera@example.org".to_owned(),
        role: "clinician".to_owned(),
        permissions: permissions.iter().map(|p| (*p).to_owned()).collect(),
    }
}

/// [`IdentityGateway`] with scripted results and call counters.
///
/// Each operation returns its configured result on every call, except
/// `current_user`, which drains a queue before falling back to its default.
pub struct MockGateway {
    login: Mutex<Result<TokenPair, GatewayError>>,
    logout: Mutex<Result<(), GatewayError>>,
    refresh: Mutex<Result<TokenPair, GatewayError>>,
    user: Mutex<Result<SessionUser, GatewayError>>,
    user_queue: Mutex<VecDeque<Result<SessionUser, GatewayError>>>,
    refresh_gate: Option<Arc<Semaphore>>,
    pub login_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub user_calls: AtomicU32,
    /// Refresh tokens presented to `refresh_token`, in call order.
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    /// Access tokens presented to `current_user`, in call order.
    pub access_tokens_seen: Mutex<Vec<String>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            login: Mutex::new(Err(GatewayError::Unauthorized("no login scripted".into()))),
            logout: Mutex::new(Ok(())),
            refresh: Mutex::new(Err(GatewayError::Unauthorized("no refresh scripted".into()))),
            user: Mutex::new(Ok(user_with(&["patients:read"]))),
            user_queue: Mutex::new(VecDeque::new()),
            refresh_gate: None,
            login_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            user_calls: AtomicU32::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            access_tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_login(self, result: Result<TokenPair, GatewayError>) -> Self {
        *self.login.lock() = result;
        self
    }

    pub fn with_logout(self, result: Result<(), GatewayError>) -> Self {
        *self.logout.lock() = result;
        self
    }

    pub fn with_refresh(self, result: Result<TokenPair, GatewayError>) -> Self {
        *self.refresh.lock() = result;
        self
    }

    pub fn with_user(self, result: Result<SessionUser, GatewayError>) -> Self {
        *self.user.lock() = result;
        self
    }

    /// Results returned by the next `current_user` calls, in order.
    pub fn with_user_sequence(self, results: Vec<Result<SessionUser, GatewayError>>) -> Self {
        *self.user_queue.lock() = results.into();
        self
    }

    /// Hold every refresh until the returned semaphore gets a permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.refresh_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn set_refresh(&self, result: Result<TokenPair, GatewayError>) {
        *self.refresh.lock() = result;
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> u32 {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityGateway for MockGateway {
    async fn login(&self, _credentials: &Credentials) -> Result<TokenPair, GatewayError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().clone()
    }

    async fn logout(&self, _access_token: &str) -> Result<(), GatewayError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout.lock().clone()
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, GatewayError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen.lock().push(refresh_token.to_owned());
        if let Some(ref gate) = self.refresh_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.refresh.lock().clone()
    }

    async fn current_user(&self, access_token: &str) -> Result<SessionUser, GatewayError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.access_tokens_seen.lock().push(access_token.to_owned());
        if let Some(next) = self.user_queue.lock().pop_front() {
            return next;
        }
        self.user.lock().clone()
    }
}

/// Records every event emitted on an [`EventBus`].
pub struct EventRecorder {
    seen: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventRecorder {
    /// Attach to all three event kinds of `bus`.
    pub fn attach(bus: &EventBus) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            SessionEventKind::SessionExpired,
            SessionEventKind::TokensRefreshed,
            SessionEventKind::LogoutComplete,
        ] {
            let s = Arc::clone(&seen);
            let listener: Listener = Arc::new(move |e: &SessionEvent| s.lock().push(e.clone()));
            drop(bus.on(kind, listener));
        }
        Self { seen }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.seen.lock().clone()
    }

    pub fn count(&self, kind: SessionEventKind) -> usize {
        self.seen.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

/// Poll `cond` until it holds, giving spawned tasks a chance to run.
///
/// Returns `false` if it never held. Works under paused time.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
