// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types shared by the auth backends and the profile resolver.

/// Errors surfaced by the auth layer.
///
/// A missing profile row is not an error: stores return `Ok(None)` and the
/// resolver falls back to principal metadata.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad credentials, duplicate sign-up, disabled account. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("No active session")]
    NoSession,

    #[error("Backend rate limit exceeded")]
    RateLimited,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unexpected backend response: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Whether a later attempt at the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::RateLimited | AuthError::Transport(_))
    }

    /// Whether this is a credential/account problem the user has to fix.
    pub fn is_hard_auth_failure(&self) -> bool {
        matches!(self, AuthError::Auth(_) | AuthError::Validation(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::Decode(err.to_string())
        } else {
            AuthError::Transport(err.to_string())
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errs: validator::ValidationErrors) -> Self {
        let mut fields = errs
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect::<Vec<_>>();
        fields.sort();
        AuthError::Validation(format!("invalid field(s): {}", fields.join(", ")))
    }
}

/// Result type alias for the auth layer
pub type Result<T> = std::result::Result<T, AuthError>;
