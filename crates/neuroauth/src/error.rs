// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Failure reported by an [`IdentityGateway`](crate::gateway::IdentityGateway).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The backend rejected the presented credential or token (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// Any other non-success response.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// User-facing category for this failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited => ErrorCategory::RateLimited,
            Self::Timeout => ErrorCategory::Timeout,
            Self::Network(_) => ErrorCategory::NoInternet,
            Self::Server { message, .. } | Self::Rejected { message, .. } => {
                classify_error_detail(message)
            }
            Self::Unauthorized(_) | Self::InvalidResponse(_) => ErrorCategory::InvalidCredentials,
        }
    }
}

/// Stable, non-leaking categories for failures shown to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidCredentials,
    RateLimited,
    Timeout,
    NoInternet,
}

impl ErrorCategory {
    /// Wire-format string for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::NoInternet => "no_internet",
        }
    }

    /// Message safe to show to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid username or password",
            Self::RateLimited => "Too many attempts. Please wait a moment and try again",
            Self::Timeout => "The request timed out. Please check your connection and try again",
            Self::NoInternet => "Unable to reach the server. Please check your connection",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify free-form backend error text into an [`ErrorCategory`].
///
/// Case-insensitive substring matching. Anything unrecognized collapses to
/// [`ErrorCategory::InvalidCredentials`].
pub fn classify_error_detail(detail: &str) -> ErrorCategory {
    let lower = detail.to_lowercase();

    if lower.contains("rate_limit")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("too many attempts")
        || lower.contains("429")
    {
        return ErrorCategory::RateLimited;
    }

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("etimedout") {
        return ErrorCategory::Timeout;
    }

    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("dns")
        || lower.contains("network")
        || lower.contains("no internet")
        || lower.contains("econnrefused")
        || lower.contains("enotfound")
    {
        return ErrorCategory::NoInternet;
    }

    ErrorCategory::InvalidCredentials
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
