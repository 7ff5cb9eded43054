// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile resolution for auth state changes.
//!
//! Every auth event starts a new session generation. A signed-in event
//! publishes a fallback user built from the principal right away, then
//! fetches the stored profile in the background. Background results only
//! land if their generation is still the current one, so a sign-out can
//! never be undone by a fetch that was already in flight.

use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::models::{AuthPrincipal, Profile, ResolvedUser};
use crate::services::backend::ProfileStore;
use crate::services::retry::{retry_lookup, Attempt, RetryOutcome, RetryPolicy};
use chrono::Utc;
use futures_util::{stream, Stream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffered updates per subscriber before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 32;

/// Auth state change delivered to the resolver.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(AuthPrincipal),
    /// Fresh account; the profile row is probably still being created.
    SignedUp(AuthPrincipal),
    SessionRestored(AuthPrincipal),
    SignedOut,
}

/// Monotonic session generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        SessionToken(self.0 + 1)
    }
}

/// Per-session resolution state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverState {
    /// No auth event seen yet; the UI should show a loading state.
    Unknown,
    NoSession,
    Fallback(ResolvedUser),
    Authoritative(ResolvedUser),
}

impl ResolverState {
    pub fn user(&self) -> Option<&ResolvedUser> {
        match self {
            ResolverState::Unknown | ResolverState::NoSession => None,
            ResolverState::Fallback(user) | ResolverState::Authoritative(user) => Some(user),
        }
    }
}

/// How a background profile fetch ended.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The stored profile replaced the previous user.
    Applied,
    /// The stored profile matched what was already published.
    Unchanged,
    /// No row after all attempts; the fallback stands.
    NotFound,
    /// The last attempt failed; the fallback stands.
    Failed(AuthError),
    /// The session ended or was replaced before the fetch finished.
    Stale,
}

/// Immediate result of handling an auth event.
#[derive(Debug)]
pub struct Resolution {
    pub token: SessionToken,
    /// What was published for this event (`None` after sign-out).
    pub user: Option<ResolvedUser>,
    /// Background profile fetch, if one was started.
    pub fetch: Option<JoinHandle<FetchOutcome>>,
}

struct Shared {
    token: SessionToken,
    state: ResolverState,
}

/// Turns auth events into a stream of `Option<ResolvedUser>`.
pub struct ProfileResolver<P> {
    store: Arc<P>,
    sign_in_retry: RetryPolicy,
    sign_up_retry: RetryPolicy,
    shared: Arc<Mutex<Shared>>,
    updates: broadcast::Sender<Option<ResolvedUser>>,
}

impl<P> Clone for ProfileResolver<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            sign_in_retry: self.sign_in_retry,
            sign_up_retry: self.sign_up_retry,
            shared: self.shared.clone(),
            updates: self.updates.clone(),
        }
    }
}

impl<P: ProfileStore> ProfileResolver<P> {
    pub fn new(store: Arc<P>, sign_in_retry: RetryPolicy, sign_up_retry: RetryPolicy) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            sign_in_retry,
            sign_up_retry,
            shared: Arc::new(Mutex::new(Shared {
                token: SessionToken::default(),
                state: ResolverState::Unknown,
            })),
            updates,
        }
    }

    pub fn from_config(store: Arc<P>, config: &Config) -> Self {
        Self::new(store, config.sign_in_retry, config.sign_up_retry)
    }

    /// Handle an auth state change.
    ///
    /// The new session generation is installed and the immediate user
    /// (fallback or `None`) is published before this returns. Must be
    /// called from within a tokio runtime.
    pub fn resolve_on_auth_change(&self, event: AuthEvent) -> Resolution {
        let (principal, policy) = match event {
            AuthEvent::SignedOut => {
                let token = self.install(ResolverState::NoSession);
                tracing::debug!(session = token.value(), "Signed out");
                return Resolution {
                    token,
                    user: None,
                    fetch: None,
                };
            }
            AuthEvent::SignedUp(principal) => (principal, self.sign_up_retry),
            AuthEvent::SignedIn(principal) | AuthEvent::SessionRestored(principal) => {
                (principal, self.sign_in_retry)
            }
        };

        let fallback = ResolvedUser::fallback(&principal, Utc::now());
        let token = self.install(ResolverState::Fallback(fallback.clone()));
        tracing::debug!(
            session = token.value(),
            uid = %principal.uid,
            "Published fallback user, fetching stored profile"
        );

        let fetch = self.spawn_fetch(token, principal.uid, policy);
        Resolution {
            token,
            user: Some(fallback),
            fetch: Some(fetch),
        }
    }

    /// Look up the stored profile for `uid`, retrying per `policy`.
    ///
    /// Returns `Ok(None)` when no row appeared within the attempt budget.
    /// Only an error on the final attempt is returned.
    pub async fn fetch_profile(&self, uid: &str, policy: &RetryPolicy) -> Result<Option<Profile>> {
        match self.lookup(uid, policy, None).await {
            RetryOutcome::Found(profile) => Ok(Some(profile)),
            RetryOutcome::NotFound | RetryOutcome::Aborted => Ok(None),
            RetryOutcome::Failed(e) => Err(e),
        }
    }

    /// Re-fetch the stored profile for the current session.
    ///
    /// Returns `None` when signed out.
    pub fn refresh_profile(&self) -> Option<JoinHandle<FetchOutcome>> {
        let (token, uid) = {
            let shared = self.lock();
            let uid = shared.state.user()?.uid().to_string();
            (shared.token, uid)
        };
        Some(self.spawn_fetch(token, uid, self.sign_in_retry))
    }

    /// Drive the resolver from an external stream of session changes.
    pub fn listen<S>(&self, events: S) -> JoinHandle<()>
    where
        S: Stream<Item = AuthEvent> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                this.resolve_on_auth_change(event);
            }
            tracing::debug!("Session event stream ended");
        })
    }

    pub fn current_user(&self) -> Option<ResolvedUser> {
        self.lock().state.user().cloned()
    }

    pub fn state(&self) -> ResolverState {
        self.lock().state.clone()
    }

    /// True until the first auth event has been handled.
    pub fn is_loading(&self) -> bool {
        matches!(self.lock().state, ResolverState::Unknown)
    }

    pub fn session_token(&self) -> SessionToken {
        self.lock().token
    }

    /// Receive every published update from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Option<ResolvedUser>> {
        self.updates.subscribe()
    }

    /// Stream of users, starting with the current one.
    ///
    /// While no auth event has been seen yet the stream starts with the
    /// first published update instead. A subscriber that falls behind
    /// skips to the latest state.
    pub fn updates(&self) -> impl Stream<Item = Option<ResolvedUser>> + Send + 'static {
        // Subscribe under the lock so nothing is both replayed and received.
        let (receiver, current) = {
            let shared = self.lock();
            let current = match &shared.state {
                ResolverState::Unknown => None,
                state => Some(state.user().cloned()),
            };
            (self.updates.subscribe(), current)
        };
        let shared = self.shared.clone();

        let rest = stream::unfold(receiver, move |mut receiver| {
            let shared = shared.clone();
            async move {
                match receiver.recv().await {
                    Ok(user) => Some((user, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "User update subscriber lagged");
                        let latest = lock_shared(&shared).state.user().cloned();
                        Some((latest, receiver))
                    }
                    Err(broadcast::error::RecvError::Closed) => None,
                }
            }
        });

        stream::iter(current).chain(rest)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    fn is_current(&self, token: SessionToken) -> bool {
        self.lock().token == token
    }

    /// Start a new session generation with `state` and publish its user.
    fn install(&self, state: ResolverState) -> SessionToken {
        let mut shared = self.lock();
        shared.token = shared.token.next();
        let user = state.user().cloned();
        shared.state = state;
        // Sent under the lock so subscribers see updates in commit order.
        let _ = self.updates.send(user);
        shared.token
    }

    fn spawn_fetch(
        &self,
        token: SessionToken,
        uid: String,
        policy: RetryPolicy,
    ) -> JoinHandle<FetchOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.fetch_and_apply(token, &uid, &policy).await })
    }

    async fn fetch_and_apply(
        &self,
        token: SessionToken,
        uid: &str,
        policy: &RetryPolicy,
    ) -> FetchOutcome {
        match self.lookup(uid, policy, Some(token)).await {
            RetryOutcome::Found(profile) => self.apply_stored(token, profile),
            RetryOutcome::Aborted => {
                tracing::debug!(session = token.value(), uid, "Session ended, fetch abandoned");
                FetchOutcome::Stale
            }
            _ if !self.is_current(token) => FetchOutcome::Stale,
            RetryOutcome::NotFound => {
                tracing::info!(
                    session = token.value(),
                    uid,
                    attempts = policy.max_attempts(),
                    "No stored profile, keeping fallback user"
                );
                FetchOutcome::NotFound
            }
            RetryOutcome::Failed(e) => {
                tracing::warn!(
                    session = token.value(),
                    uid,
                    error = %e,
                    "Profile fetch failed, keeping fallback user"
                );
                FetchOutcome::Failed(e)
            }
        }
    }

    /// Retried row lookup. With a session token, stops once that session
    /// is no longer current.
    async fn lookup(
        &self,
        uid: &str,
        policy: &RetryPolicy,
        token: Option<SessionToken>,
    ) -> RetryOutcome<Profile, AuthError> {
        retry_lookup(policy, |attempt| async move {
            if token.is_some_and(|token| !self.is_current(token)) {
                return Attempt::Abort;
            }

            match self.store.get_profile_row(uid).await {
                Ok(Some(profile)) => Attempt::Found(profile),
                Ok(None) => {
                    tracing::debug!(uid, attempt, "Profile row not visible yet");
                    Attempt::Missing
                }
                Err(e) => {
                    tracing::debug!(uid, attempt, error = %e, "Profile fetch attempt failed");
                    Attempt::Failed(e)
                }
            }
        })
        .await
    }

    /// Publish a stored profile if `token` is still the current session.
    fn apply_stored(&self, token: SessionToken, profile: Profile) -> FetchOutcome {
        let mut shared = self.lock();
        if shared.token != token {
            tracing::debug!(
                session = token.value(),
                uid = %profile.uid,
                "Discarding profile for stale session"
            );
            return FetchOutcome::Stale;
        }

        let user = ResolvedUser::from_stored(profile, shared.state.user());
        if let ResolverState::Authoritative(current) = &shared.state {
            if *current == user {
                return FetchOutcome::Unchanged;
            }
        }

        tracing::info!(
            session = token.value(),
            uid = %user.uid(),
            role = ?user.profile.role,
            "Stored profile applied"
        );
        shared.state = ResolverState::Authoritative(user.clone());
        let _ = self.updates.send(Some(user));
        FetchOutcome::Applied
    }
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
