// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Contract with the hosted backend (auth + profile row storage).

use crate::error::Result;
use crate::models::{OAuthCredential, Profile, Session, SignUp, UserMetadata};
use std::future::Future;
use std::sync::Arc;

/// Auth half of the backend.
pub trait AuthProvider: Send + Sync + 'static {
    /// Create an account. Hard failures (duplicate email, weak password)
    /// come back as [`crate::error::AuthError::Auth`].
    fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> impl Future<Output = Result<SignUp>> + Send;

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session>> + Send;

    /// Exchange a provider credential for a session. First-time users get
    /// an account (and, via the backend trigger, a profile row).
    fn sign_in_with_oauth(
        &self,
        credential: &OAuthCredential,
    ) -> impl Future<Output = Result<Session>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;

    /// The session the backend currently holds, if any.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>>> + Send;

    /// Exchange a stored refresh token for a fresh session.
    fn refresh_session(&self, refresh_token: &str)
        -> impl Future<Output = Result<Session>> + Send;
}

/// Row-store half of the backend.
pub trait ProfileStore: Send + Sync + 'static {
    /// Read the profile row for `uid`. `Ok(None)` means the row does not
    /// exist (yet); errors are transport or storage failures.
    fn get_profile_row(&self, uid: &str) -> impl Future<Output = Result<Option<Profile>>> + Send;
}

impl<T: ProfileStore> ProfileStore for Arc<T> {
    fn get_profile_row(&self, uid: &str) -> impl Future<Output = Result<Option<Profile>>> + Send {
        self.as_ref().get_profile_row(uid)
    }
}

impl<T: AuthProvider> AuthProvider for Arc<T> {
    fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> impl Future<Output = Result<SignUp>> + Send {
        self.as_ref().sign_up(email, password, metadata)
    }

    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session>> + Send {
        self.as_ref().sign_in_with_password(email, password)
    }

    fn sign_in_with_oauth(
        &self,
        credential: &OAuthCredential,
    ) -> impl Future<Output = Result<Session>> + Send {
        self.as_ref().sign_in_with_oauth(credential)
    }

    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send {
        self.as_ref().sign_out()
    }

    fn get_session(&self) -> impl Future<Output = Result<Option<Session>>> + Send {
        self.as_ref().get_session()
    }

    fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Session>> + Send {
        self.as_ref().refresh_session(refresh_token)
    }
}
