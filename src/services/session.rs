// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Entry points used by the UI: sign up, sign in (password or provider),
//! sign out, restore.
//!
//! None of these wait for the stored profile. They return the fallback
//! user as soon as the auth call succeeds and leave the upgrade to the
//! resolver's background fetch.

use crate::error::{AuthError, Result};
use crate::models::{OAuthCredential, ResolvedUser, Session, SignUpRequest, UserMetadata};
use crate::services::backend::{AuthProvider, ProfileStore};
use crate::services::resolver::{AuthEvent, FetchOutcome, ProfileResolver, ResolverState};
use crate::time_utils::format_utc_rfc3339;
use chrono::Utc;
use futures_util::Stream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use validator::Validate;

/// Auth facade combining the backend's auth API with profile resolution.
pub struct AuthSession<A, P> {
    auth: A,
    resolver: ProfileResolver<P>,
}

impl<A: AuthProvider, P: ProfileStore> AuthSession<A, P> {
    pub fn new(auth: A, resolver: ProfileResolver<P>) -> Self {
        Self { auth, resolver }
    }

    /// Create an account and return the fallback user immediately.
    ///
    /// If the backend requires e-mail confirmation no session starts: the
    /// fallback is still returned, but nothing is published.
    pub async fn sign_up_with_email(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<ResolvedUser> {
        let request = SignUpRequest::new(email, password, display_name);
        request.validate()?;

        let metadata = UserMetadata::for_sign_up(&request.display_name);
        let sign_up = self
            .auth
            .sign_up(&request.email, &request.password, &metadata)
            .await
            .inspect_err(|e| tracing::info!(error = %e, "Sign-up rejected"))?;

        let Some(session) = sign_up.session else {
            tracing::info!(
                uid = %sign_up.principal.uid,
                "Account created, awaiting e-mail confirmation"
            );
            return Ok(ResolvedUser::fallback(&sign_up.principal, Utc::now()));
        };

        tracing::info!(uid = %session.principal.uid, "Account created");
        self.start(AuthEvent::SignedUp(session.principal))
    }

    /// Sign in and return the fallback user immediately.
    pub async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<ResolvedUser> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let session = self
            .auth
            .sign_in_with_password(email, password)
            .await
            .inspect_err(|e| tracing::info!(error = %e, "Sign-in rejected"))?;

        tracing::info!(uid = %session.principal.uid, "Signed in");
        self.start(AuthEvent::SignedIn(session.principal))
    }

    /// Finish a provider sign-in and return the fallback user immediately.
    ///
    /// First-time users get an account; the backend trigger creates their
    /// profile row, which the background fetch picks up.
    pub async fn sign_in_with_oauth(&self, credential: &OAuthCredential) -> Result<ResolvedUser> {
        let session = self
            .auth
            .sign_in_with_oauth(credential)
            .await
            .inspect_err(|e| tracing::info!(error = %e, "Provider sign-in rejected"))?;

        tracing::info!(
            uid = %session.principal.uid,
            provider = session.principal.app_metadata.provider().unwrap_or("unknown"),
            "Signed in with provider"
        );
        self.start(AuthEvent::SignedIn(session.principal))
    }

    /// Sign out. Local state is cleared even when the backend call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.auth.sign_out().await;
        self.resolver.resolve_on_auth_change(AuthEvent::SignedOut);

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Backend sign-out failed, local session cleared anyway");
        }
        result
    }

    /// Resume the session the backend already holds, if any.
    ///
    /// An expired session is refreshed first. When refreshing is rejected
    /// the session is dropped and the error returned.
    pub async fn restore_session(&self) -> Result<Option<ResolvedUser>> {
        let Some(session) = self.auth.get_session().await? else {
            self.resolver.resolve_on_auth_change(AuthEvent::SignedOut);
            return Ok(None);
        };

        let session = if session.is_expired(Utc::now()) {
            tracing::debug!(
                uid = %session.principal.uid,
                expired_at = session.expires_at.map(format_utc_rfc3339).as_deref(),
                "Stored session expired, refreshing"
            );
            self.refresh(&session.refresh_token).await?
        } else {
            session
        };

        self.start(AuthEvent::SessionRestored(session.principal))
            .map(Some)
    }

    /// Resume from a refresh token persisted by the UI.
    pub async fn restore_from_refresh_token(&self, refresh_token: &str) -> Result<ResolvedUser> {
        let session = self.refresh(refresh_token).await?;
        self.start(AuthEvent::SessionRestored(session.principal))
    }

    /// Reload the stored profile without a new auth event.
    pub fn refresh_profile(&self) -> Result<JoinHandle<FetchOutcome>> {
        self.resolver.refresh_profile().ok_or(AuthError::NoSession)
    }

    pub fn current_user(&self) -> Option<ResolvedUser> {
        self.resolver.current_user()
    }

    pub fn state(&self) -> ResolverState {
        self.resolver.state()
    }

    /// True until the first session restore, sign-in or sign-out.
    pub fn is_loading(&self) -> bool {
        self.resolver.is_loading()
    }

    pub fn is_admin(&self) -> bool {
        self.current_user().is_some_and(|user| user.is_admin())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Option<ResolvedUser>> {
        self.resolver.subscribe()
    }

    pub fn updates(&self) -> impl Stream<Item = Option<ResolvedUser>> + Send + 'static {
        self.resolver.updates()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        match self.auth.refresh_session(refresh_token).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if e.is_hard_auth_failure() {
                    tracing::info!(error = %e, "Refresh token rejected, signing out");
                    // Drop the dead session so the next restore does not find it.
                    if let Err(sign_out_err) = self.auth.sign_out().await {
                        tracing::debug!(
                            error = %sign_out_err,
                            "Backend sign-out after rejected refresh failed"
                        );
                    }
                    self.resolver.resolve_on_auth_change(AuthEvent::SignedOut);
                }
                Err(e)
            }
        }
    }

    fn start(&self, event: AuthEvent) -> Result<ResolvedUser> {
        self.resolver
            .resolve_on_auth_change(event)
            .user
            .ok_or(AuthError::NoSession)
    }
}
