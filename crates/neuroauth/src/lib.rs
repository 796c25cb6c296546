// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Neuroauth: session and token lifecycle management for the clinical web
//! client's REST backend.
//!
//! [`SessionManager`] is the only type the rest of an application needs. It
//! keeps the access/refresh token pair in a [`TokenStore`], classifies it with
//! an [`ExpiryPolicy`], funnels every renewal through one
//! [`RefreshCoordinator`] and announces lifecycle changes on an
//! [`EventNotifier`].

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod gateway;
pub mod refresh;
pub mod session;
pub mod store;
pub mod test_support;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorCategory, GatewayError};
pub use events::{EventBus, EventNotifier, SessionEvent, SessionEventKind, Subscription};
pub use expiry::{ExpiryPolicy, TokenStatus};
pub use gateway::IdentityGateway;
pub use refresh::RefreshCoordinator;
pub use session::{RequiredPermissions, SessionManager, SessionSettings, SessionState};
pub use store::{FileStore, KeyValueStore, MemoryStore, TokenStore};
pub use token::{Credentials, SessionUser, TokenPair};
