// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle events and their fan-out.
//!
//! Listeners registered with [`EventNotifier::on`] run synchronously inside
//! `emit`. A panicking listener is logged and skipped; it never reaches the
//! emitter or starves the remaining listeners. [`EventBus`] also forwards
//! every event to a broadcast channel for async consumers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::token::TokenPair;

/// Names of the lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionEventKind {
    SessionExpired,
    TokensRefreshed,
    LogoutComplete,
}

impl SessionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionExpired => "session-expired",
            Self::TokensRefreshed => "tokens-refreshed",
            Self::LogoutComplete => "logout-complete",
        }
    }
}

impl std::fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session lifecycle event with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session ended because tokens could not be renewed or were rejected.
    SessionExpired,
    /// A refresh stored a new token pair.
    TokensRefreshed { tokens: TokenPair },
    /// An explicit logout finished.
    LogoutComplete,
}

impl SessionEvent {
    pub fn kind(&self) -> SessionEventKind {
        match self {
            Self::SessionExpired => SessionEventKind::SessionExpired,
            Self::TokensRefreshed { .. } => SessionEventKind::TokensRefreshed,
            Self::LogoutComplete => SessionEventKind::LogoutComplete,
        }
    }
}

pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Publish/subscribe seam for session events.
pub trait EventNotifier: Send + Sync {
    fn emit(&self, event: SessionEvent);

    /// Register `listener` for events of `kind`.
    fn on(&self, kind: SessionEventKind, listener: Listener) -> Subscription;
}

/// Handle returned by [`EventNotifier::on`]. Dropping it keeps the listener
/// registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

struct Registered {
    id: u64,
    kind: SessionEventKind,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    listeners: Mutex<Vec<Registered>>,
    next_id: AtomicU64,
}

/// Default [`EventNotifier`]: synchronous listeners plus a broadcast channel.
pub struct EventBus {
    registry: Arc<Registry>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self { registry: Arc::new(Registry::default()), event_tx }
    }

    /// Subscribe to every event asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventNotifier for EventBus {
    fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        // Snapshot so listeners may (un)subscribe without deadlocking.
        let targets: Vec<Listener> = self
            .registry
            .listeners
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.listener))
            .collect();

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = %kind, "session event listener panicked");
            }
        }

        let _ = self.event_tx.send(event);
    }

    fn on(&self, kind: SessionEventKind, listener: Listener) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.lock().push(Registered { id, kind, listener });

        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.listeners.lock().retain(|r| r.id != id);
            }
        })
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
