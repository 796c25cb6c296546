// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use futures_util::future::join_all;

use super::*;
use crate::clock::ManualClock;
use crate::error::GatewayError;
use crate::events::SessionEventKind;
use crate::test_support::{user_with, wait_until, EventRecorder, MockGateway};

const NOW: u64 = 1_700_000_000_000;
const MINUTE: u64 = 60_000;

struct Harness {
    manager: SessionManager,
    mock: Arc<MockGateway>,
    store: Arc<TokenStore>,
    clock: Arc<ManualClock>,
    events: EventRecorder,
}

fn harness(mock: MockGateway) -> Harness {
    let mock = Arc::new(mock);
    let store = Arc::new(TokenStore::in_memory());
    let clock = Arc::new(ManualClock::new(NOW));
    let bus = Arc::new(EventBus::new());
    let events = EventRecorder::attach(&bus);
    let manager = SessionManager::builder(mock.clone())
        .store(Arc::clone(&store))
        .events(bus)
        .clock(clock.clone())
        .build();
    Harness { manager, mock, store, clock, events }
}

fn stored() -> TokenPair {
    TokenPair::new("access-old", "refresh-old", NOW + 60 * MINUTE)
}

fn renewed() -> TokenPair {
    TokenPair::new("access-new", "refresh-new", NOW + 120 * MINUTE)
}

fn rejected() -> GatewayError {
    GatewayError::Unauthorized("token revoked".into())
}

fn credentials() -> Credentials {
    Credentials::new("dr.rivera", "correct horse")
}

#[tokio::test]
async fn initialize_without_tokens_is_unauthenticated() {
    let h = harness(MockGateway::new());

    assert_eq!(h.manager.initialize().await, SessionState::unauthenticated());
    assert_eq!(h.mock.user_count(), 0);
    assert_eq!(h.mock.refresh_count(), 0);
}

#[tokio::test]
async fn initialize_restores_valid_session() {
    let h = harness(MockGateway::new());
    h.store.save(&stored());

    let state = h.manager.initialize().await;

    assert!(state.is_authenticated);
    assert_eq!(state.tokens, Some(stored()));
    assert_eq!(state.user, Some(user_with(&["patients:read"])));
    assert_eq!(state.error, None);
    assert_eq!(h.mock.refresh_count(), 0);
    assert!(h.manager.coordinator().has_pending_timer());
}

#[tokio::test]
async fn initialize_refreshes_expired_tokens() {
    let h = harness(MockGateway::new().with_refresh(Ok(renewed())));
    h.store.save(&TokenPair::new("access-old", "refresh-old", NOW - 10_000));

    let state = h.manager.initialize().await;

    assert!(state.is_authenticated);
    assert_eq!(state.tokens.map(|t| t.access_token), Some("access-new".to_owned()));
    assert_eq!(h.store.load(), Some(renewed()));
    assert_eq!(*h.mock.access_tokens_seen.lock(), vec!["access-new".to_owned()]);
}

#[tokio::test]
async fn initialize_with_failed_refresh_expires_session() {
    let h = harness(MockGateway::new().with_refresh(Err(rejected())));
    h.store.save(&TokenPair::new("access-old", "refresh-old", NOW - 10_000));

    let state = h.manager.initialize().await;

    assert!(!state.is_authenticated);
    assert_eq!(state.error.as_deref(), Some(SESSION_EXPIRED));
    assert_eq!(state.tokens, None);
    assert_eq!(h.store.load(), None);
    assert_eq!(h.mock.user_count(), 0);
    assert_eq!(h.events.events(), vec![SessionEvent::SessionExpired]);
}

#[tokio::test]
async fn initialize_retries_once_after_unauthorized() {
    let h = harness(
        MockGateway::new()
            .with_refresh(Ok(renewed()))
            .with_user_sequence(vec![Err(rejected()), Ok(user_with(&["admin"]))]),
    );
    h.store.save(&stored());

    let state = h.manager.initialize().await;

    assert!(state.is_authenticated);
    assert_eq!(state.tokens, Some(renewed()));
    assert_eq!(h.mock.refresh_count(), 1);
    assert_eq!(
        *h.mock.access_tokens_seen.lock(),
        vec!["access-old".to_owned(), "access-new".to_owned()]
    );
}

#[tokio::test]
async fn initialize_gives_up_after_second_unauthorized() {
    let h = harness(
        MockGateway::new()
            .with_refresh(Ok(renewed()))
            .with_user_sequence(vec![Err(rejected()), Err(rejected())]),
    );
    h.store.save(&stored());

    let state = h.manager.initialize().await;

    assert_eq!(state, SessionState::expired());
    assert_eq!(h.store.load(), None);
    assert_eq!(h.mock.refresh_count(), 1);
    assert_eq!(h.mock.user_count(), 2);
    assert_eq!(h.events.count(SessionEventKind::SessionExpired), 1);
    assert!(!h.manager.coordinator().has_pending_timer());
}

#[tokio::test]
async fn initialize_keeps_tokens_on_network_failure() {
    let h = harness(MockGateway::new().with_user(Err(GatewayError::Network("unreachable".into()))));
    h.store.save(&stored());

    let state = h.manager.initialize().await;

    assert!(!state.is_authenticated);
    assert_eq!(state.error.as_deref(), Some(ErrorCategory::NoInternet.user_message()));
    assert_eq!(h.store.load(), Some(stored()));
    assert_eq!(h.mock.refresh_count(), 0);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn login_establishes_session() {
    let h = harness(MockGateway::new().with_login(Ok(stored())));

    let state = h.manager.login(&credentials()).await;

    assert!(state.is_authenticated);
    assert_eq!(state.tokens, Some(stored()));
    assert_eq!(h.store.load(), Some(stored()));
    assert_eq!(h.manager.state(), state);
    assert!(h.manager.coordinator().has_pending_timer());
}

#[tokio::test]
async fn login_with_blank_credentials_skips_gateway() {
    let h = harness(MockGateway::new().with_login(Ok(stored())));

    for creds in [
        Credentials::new("", "secret"),
        Credentials::new("   ", "secret"),
        Credentials::new("dr.rivera", ""),
    ] {
        let state = h.manager.login(&creds).await;
        assert_eq!(state.error.as_deref(), Some("Invalid username or password"));
        assert!(!state.is_authenticated);
    }
    assert_eq!(h.mock.login_count(), 0);
    assert_eq!(h.store.load(), None);
}

#[tokio::test]
async fn login_failures_map_to_user_messages() {
    let cases = [
        (rejected(), ErrorCategory::InvalidCredentials),
        (GatewayError::RateLimited, ErrorCategory::RateLimited),
        (GatewayError::Timeout, ErrorCategory::Timeout),
        (GatewayError::Network("dns failure".into()), ErrorCategory::NoInternet),
        (
            GatewayError::Rejected { status: 400, message: "stack trace at db.rs:12".into() },
            ErrorCategory::InvalidCredentials,
        ),
        (
            GatewayError::Server { status: 503, message: "upstream timed out".into() },
            ErrorCategory::Timeout,
        ),
    ];

    for (err, category) in cases {
        let h = harness(MockGateway::new().with_login(Err(err.clone())));
        let state = h.manager.login(&credentials()).await;
        assert_eq!(state.error.as_deref(), Some(category.user_message()), "{err}");
        assert_eq!(h.store.load(), None);
        assert_eq!(h.mock.user_count(), 0);
    }
}

#[tokio::test]
async fn login_clears_tokens_when_user_lookup_fails() {
    let h = harness(MockGateway::new().with_login(Ok(stored())).with_user(Err(GatewayError::Timeout)));

    let state = h.manager.login(&credentials()).await;

    assert!(!state.is_authenticated);
    assert_eq!(state.error.as_deref(), Some(ErrorCategory::Timeout.user_message()));
    assert_eq!(h.store.load(), None);
    assert!(!h.manager.coordinator().has_pending_timer());
}

#[tokio::test]
async fn logout_clears_session_when_remote_call_fails() {
    let h = harness(
        MockGateway::new()
            .with_login(Ok(stored()))
            .with_logout(Err(GatewayError::Network("connection reset".into()))),
    );
    h.manager.login(&credentials()).await;

    let state = h.manager.logout().await;

    assert_eq!(state, SessionState::unauthenticated());
    assert_eq!(h.store.load(), None);
    assert_eq!(h.manager.state(), SessionState::unauthenticated());
    assert!(!h.manager.coordinator().has_pending_timer());
    assert_eq!(h.mock.logout_count(), 1);
    assert_eq!(h.events.events(), vec![SessionEvent::LogoutComplete]);
}

#[tokio::test]
async fn logout_without_session_skips_remote_call() {
    let h = harness(MockGateway::new());

    assert_eq!(h.manager.logout().await, SessionState::unauthenticated());
    assert_eq!(h.manager.logout().await, SessionState::unauthenticated());

    assert_eq!(h.mock.logout_count(), 0);
    assert_eq!(h.events.count(SessionEventKind::LogoutComplete), 2);
}

#[tokio::test]
async fn ensure_valid_token_returns_current_token() {
    let h = harness(MockGateway::new());
    h.store.save(&stored());

    assert_eq!(h.manager.ensure_valid_token().await, Some("access-old".to_owned()));
    assert_eq!(h.mock.refresh_count(), 0);
}

#[tokio::test]
async fn ensure_valid_token_without_session_is_none() {
    let h = harness(MockGateway::new().with_refresh(Ok(renewed())));

    assert_eq!(h.manager.ensure_valid_token().await, None);
    assert_eq!(h.mock.refresh_count(), 0);
}

#[tokio::test]
async fn ensure_valid_token_shares_one_refresh() {
    let (mock, gate) = MockGateway::new().with_refresh(Ok(renewed())).gated();
    let h = harness(mock);
    h.store.save(&TokenPair::new("access-old", "refresh-old", NOW + 2 * MINUTE));

    let callers = join_all((0..5).map(|_| h.manager.ensure_valid_token()));
    let release = async {
        assert!(wait_until(|| h.mock.refresh_count() == 1).await);
        gate.add_permits(1);
    };
    let (tokens, ()) = tokio::join!(callers, release);

    assert_eq!(h.mock.refresh_count(), 1);
    assert!(tokens.iter().all(|t| t.as_deref() == Some("access-new")));
}

#[tokio::test]
async fn new_session_does_not_join_refresh_from_previous_one() {
    let (mock, gate) = MockGateway::new()
        .with_login(Ok(TokenPair::new("access-login", "refresh-login", NOW + 2 * MINUTE)))
        .with_refresh(Ok(renewed()))
        .gated();
    let h = harness(mock);
    h.store.save(&TokenPair::new("access-old", "refresh-old", NOW + 2 * MINUTE));

    h.manager.coordinator().refresh_in_background();
    assert!(wait_until(|| h.mock.refresh_count() == 1).await);
    h.manager.logout().await;
    assert!(h.manager.login(&credentials()).await.is_authenticated);

    let token = h.manager.ensure_valid_token();
    let release = async {
        assert!(wait_until(|| h.mock.refresh_count() == 2).await);
        gate.add_permits(2);
    };
    let (token, ()) = tokio::join!(token, release);

    assert_eq!(token.as_deref(), Some("access-new"));
    assert_eq!(h.store.load(), Some(renewed()));
    assert_eq!(
        *h.mock.refresh_tokens_seen.lock(),
        vec!["refresh-old".to_owned(), "refresh-login".to_owned()]
    );
    assert!(h.manager.coordinator().has_pending_timer());
}

#[tokio::test]
async fn ensure_valid_token_after_failed_refresh_is_none() {
    let h = harness(MockGateway::new().with_refresh(Err(rejected())));
    h.store.save(&TokenPair::new("access-old", "refresh-old", NOW + 2 * MINUTE));

    assert_eq!(h.manager.ensure_valid_token().await, None);
    assert_eq!(h.store.load(), None);
    assert_eq!(h.events.events(), vec![SessionEvent::SessionExpired]);
}

#[tokio::test]
async fn has_permission_while_expiring_refreshes_in_background() {
    let h = harness(
        MockGateway::new()
            .with_login(Ok(TokenPair::new("access-old", "refresh-old", NOW + 10 * MINUTE)))
            .with_refresh(Ok(renewed())),
    );
    h.manager.login(&credentials()).await;
    h.clock.advance(Duration::from_millis(10 * MINUTE - 20_000));

    assert!(!h.manager.has_permission("admin"));
    assert!(wait_until(|| h.mock.refresh_count() == 1).await);
    assert!(wait_until(|| h.store.load() == Some(renewed())).await);
    assert_eq!(h.mock.refresh_count(), 1);
}

#[tokio::test]
async fn has_permission_requires_every_permission() {
    let h = harness(
        MockGateway::new()
            .with_login(Ok(stored()))
            .with_user(Ok(user_with(&["patients:read", "notes:write"]))),
    );
    h.manager.login(&credentials()).await;

    assert!(h.manager.has_permission("patients:read"));
    assert!(h.manager.has_permission(&["patients:read", "notes:write"]));
    assert!(!h.manager.has_permission(&["patients:read", "admin"]));
    assert!(h.manager.has_permission(&vec!["notes:write".to_owned()]));
    let empty: [&str; 0] = [];
    assert!(h.manager.has_permission(&empty));
    assert_eq!(h.mock.refresh_count(), 0);
}

#[tokio::test]
async fn has_permission_without_valid_session_is_false() {
    let h = harness(MockGateway::new().with_login(Ok(stored())).with_refresh(Ok(renewed())));
    assert!(!h.manager.has_permission("patients:read"));

    h.manager.login(&credentials()).await;
    h.clock.advance(Duration::from_millis(61 * MINUTE));

    assert!(!h.manager.has_permission("patients:read"));
    assert_eq!(h.mock.refresh_count(), 0);
}

#[tokio::test]
async fn state_reflects_proactive_refresh() {
    let h = harness(MockGateway::new().with_login(Ok(stored())).with_refresh(Ok(renewed())));
    h.manager.login(&credentials()).await;

    assert_eq!(h.manager.ensure_valid_token().await, Some("access-old".to_owned()));
    h.manager.coordinator().refresh().await;

    let state = h.manager.state();
    assert!(state.is_authenticated);
    assert_eq!(state.tokens, Some(renewed()));
    assert_eq!(h.events.count(SessionEventKind::TokensRefreshed), 1);
}

#[test]
fn session_state_constructors_keep_authentication_consistent() {
    let pair = stored();
    let user = user_with(&[]);

    let authed = SessionState::authenticated(user.clone(), pair.clone());
    assert!(authed.is_authenticated && authed.user.is_some() && authed.tokens.is_some());

    for state in [
        SessionState::unauthenticated(),
        SessionState::loading(),
        SessionState::failed("boom"),
        SessionState::expired(),
    ] {
        assert!(!state.is_authenticated);
        assert_eq!(state.tokens, None);
        assert_eq!(state.user, None);
    }
    assert!(SessionState::loading().is_loading);
    assert_eq!(SessionState::expired().error.as_deref(), Some("Session expired"));
}

#[test]
fn session_state_serializes_snapshot() -> anyhow::Result<()> {
    let json = serde_json::to_value(SessionState::failed("Session expired"))?;
    assert_eq!(json["is_authenticated"], false);
    assert_eq!(json["error"], "Session expired");
    assert!(json["tokens"].is_null());
    Ok(())
}
