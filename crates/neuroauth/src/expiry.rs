// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token freshness classification.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::token::TokenPair;

/// Default margin before expiry to refresh proactively (5 minutes).
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Freshness of a token pair relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    /// Still usable but inside the refresh buffer.
    Expiring,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Expiring => "expiring",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `pair` at instant `now_ms`.
pub fn classify_at(pair: &TokenPair, buffer: Duration, now_ms: u64) -> TokenStatus {
    let buffer_ms = buffer.as_millis() as u64;
    if pair.expires_at <= now_ms {
        TokenStatus::Expired
    } else if pair.expires_at <= now_ms.saturating_add(buffer_ms) {
        TokenStatus::Expiring
    } else {
        TokenStatus::Valid
    }
}

/// Classifies token pairs against an injected clock.
#[derive(Clone)]
pub struct ExpiryPolicy {
    clock: Arc<dyn Clock>,
}

impl ExpiryPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn classify(&self, pair: &TokenPair, buffer: Duration) -> TokenStatus {
        classify_at(pair, buffer, self.clock.now_ms())
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
