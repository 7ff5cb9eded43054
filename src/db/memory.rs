// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process backend for tests and offline runs.
//!
//! Behaves like the hosted backend where it matters for profile
//! resolution: the profile row is inserted by a "trigger" some time after
//! an account is created, never synchronously.

use crate::error::{AuthError, Result};
use crate::models::{
    AuthPrincipal, OAuthCredential, Profile, Role, Session, SignUp, UserMetadata,
};
use crate::services::backend::{AuthProvider, ProfileStore};
use crate::services::oauth::challenge_for;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const SESSION_LIFETIME_SECS: i64 = 3600;

#[derive(Clone)]
struct Account {
    /// `None` for accounts created through a provider sign-in
    password: Option<String>,
    principal: AuthPrincipal,
    confirmed: bool,
}

/// A provider sign-in waiting to be exchanged.
#[derive(Clone)]
struct OAuthGrant {
    provider: String,
    email: String,
    metadata: UserMetadata,
    /// Set for auth-code grants, `None` for ID tokens
    code_challenge: Option<String>,
}

/// In-memory auth accounts and profile rows.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Accounts keyed by lowercased email
    accounts: Arc<DashMap<String, Account>>,
    /// Profile rows keyed by uid
    profiles: Arc<DashMap<String, Profile>>,
    /// Roles to give new profile rows, keyed by lowercased email
    assigned_roles: Arc<DashMap<String, Role>>,
    /// Active refresh tokens
    refresh_tokens: Arc<DashMap<String, String>>,
    /// Outstanding auth codes and ID tokens
    oauth_grants: Arc<DashMap<String, OAuthGrant>>,
    session: Arc<RwLock<Option<Session>>>,
    trigger_delay: Duration,
    session_lifetime: chrono::Duration,
    require_confirmation: bool,
    next_id: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Backend whose sign-up trigger inserts the profile row after `trigger_delay`.
    pub fn new(trigger_delay: Duration) -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            profiles: Arc::new(DashMap::new()),
            assigned_roles: Arc::new(DashMap::new()),
            refresh_tokens: Arc::new(DashMap::new()),
            oauth_grants: Arc::new(DashMap::new()),
            session: Arc::new(RwLock::new(None)),
            trigger_delay,
            session_lifetime: chrono::Duration::seconds(SESSION_LIFETIME_SECS),
            require_confirmation: false,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Sign-ups get no session until [`Self::confirm_email`] is called.
    pub fn with_email_confirmation(mut self) -> Self {
        self.require_confirmation = true;
        self
    }

    /// Lifetime of issued access tokens. Zero issues already-expired sessions.
    pub fn with_session_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    /// Mark the account for `email` as confirmed. Returns false if unknown.
    pub fn confirm_email(&self, email: &str) -> bool {
        match self.accounts.get_mut(&normalize_email(email)) {
            Some(mut account) => {
                account.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Give the profile row created for `email` this role.
    pub fn assign_role(&self, email: &str, role: Role) {
        self.assigned_roles.insert(normalize_email(email), role);
    }

    /// Insert or replace a profile row directly.
    pub fn put_profile(&self, profile: Profile) {
        self.profiles.insert(profile.uid.clone(), profile);
    }

    pub fn profile(&self, uid: &str) -> Option<Profile> {
        self.profiles.get(uid).map(|entry| entry.value().clone())
    }

    /// Invalidate a refresh token, as a server-side logout elsewhere would.
    pub fn revoke_refresh_token(&self, refresh_token: &str) -> bool {
        self.refresh_tokens.remove(refresh_token).is_some()
    }

    /// Simulate the provider consent screen: returns the auth code the
    /// redirect would carry, bound to `code_challenge`.
    pub fn authorize_oauth(
        &self,
        provider: &str,
        email: &str,
        metadata: UserMetadata,
        code_challenge: &str,
    ) -> String {
        let code = self.next("code");
        self.oauth_grants.insert(
            code.clone(),
            OAuthGrant {
                provider: provider.to_string(),
                email: email.to_string(),
                metadata,
                code_challenge: Some(code_challenge.to_string()),
            },
        );
        code
    }

    /// Simulate a provider-issued ID token for `email`.
    pub fn issue_id_token(&self, provider: &str, email: &str, metadata: UserMetadata) -> String {
        let id_token = self.next("idtoken");
        self.oauth_grants.insert(
            id_token.clone(),
            OAuthGrant {
                provider: provider.to_string(),
                email: email.to_string(),
                metadata,
                code_challenge: None,
            },
        );
        id_token
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn new_principal(&self, email: &str, metadata: UserMetadata, provider: &str) -> AuthPrincipal {
        let mut principal = AuthPrincipal::new(self.next("user"), Some(email.trim().to_string()))
            .with_metadata(metadata)
            .with_app_metadata(UserMetadata::default().with("provider", provider));
        principal.created_at = Some(Utc::now());
        principal
    }

    fn issue_session(&self, principal: AuthPrincipal) -> Session {
        let refresh_token = self.next("refresh");
        self.refresh_tokens
            .insert(refresh_token.clone(), principal.uid.clone());

        Session {
            access_token: self.next("access"),
            refresh_token,
            expires_at: Some(Utc::now() + self.session_lifetime),
            principal,
        }
    }

    async fn start_session(&self, principal: AuthPrincipal) -> Session {
        let session = self.issue_session(principal);
        *self.session.write().await = Some(session.clone());
        session
    }

    /// Consume the grant a credential refers to.
    fn redeem(&self, credential: &OAuthCredential) -> Result<OAuthGrant> {
        match credential {
            OAuthCredential::AuthCode {
                auth_code,
                code_verifier,
            } => {
                let (_, grant) = self
                    .oauth_grants
                    .remove_if(auth_code, |_, grant| grant.code_challenge.is_some())
                    .ok_or_else(|| {
                        AuthError::Auth("invalid flow state, no valid flow state found".to_string())
                    })?;

                if grant.code_challenge.as_deref() != Some(challenge_for(code_verifier).as_str()) {
                    return Err(AuthError::Auth(
                        "code challenge does not match previously saved code verifier".to_string(),
                    ));
                }
                Ok(grant)
            }
            OAuthCredential::IdToken {
                provider, id_token, ..
            } => self
                .oauth_grants
                .remove_if(id_token, |_, grant| {
                    grant.code_challenge.is_none() && grant.provider == *provider
                })
                .map(|(_, grant)| grant)
                .ok_or_else(|| AuthError::Auth("Bad ID token".to_string())),
        }
    }

    /// Insert the profile row after the trigger delay, unless one exists.
    fn schedule_profile_insert(&self, principal: &AuthPrincipal) {
        let role = principal
            .email
            .as_deref()
            .and_then(|email| self.assigned_roles.get(&normalize_email(email)))
            .map(|role| *role)
            .unwrap_or_default();

        let profile = Profile {
            uid: principal.uid.clone(),
            email: principal.email.clone(),
            display_name: principal.metadata.display_name().map(str::to_string),
            photo_url: principal.metadata.photo_url().map(str::to_string),
            role,
            created_at: principal.created_at.unwrap_or_else(Utc::now),
        };

        let profiles = self.profiles.clone();
        let delay = self.trigger_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            profiles.entry(profile.uid.clone()).or_insert(profile);
        });
    }
}

impl AuthProvider for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<SignUp> {
        let principal = match self.accounts.entry(normalize_email(email)) {
            Entry::Occupied(_) => {
                return Err(AuthError::Auth("User already registered".to_string()))
            }
            Entry::Vacant(slot) => {
                let principal = self.new_principal(email, metadata.clone(), "email");
                slot.insert(Account {
                    password: Some(password.to_string()),
                    principal: principal.clone(),
                    confirmed: !self.require_confirmation,
                });
                principal
            }
        };
        self.schedule_profile_insert(&principal);

        if self.require_confirmation {
            tracing::debug!(uid = %principal.uid, "Sign-up awaiting email confirmation");
            return Ok(SignUp {
                principal,
                session: None,
            });
        }

        let session = self.start_session(principal.clone()).await;
        Ok(SignUp {
            principal,
            session: Some(session),
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let account = self
            .accounts
            .get(&normalize_email(email))
            .filter(|account| account.password.as_deref() == Some(password))
            .map(|account| account.clone())
            .ok_or_else(|| AuthError::Auth("Invalid login credentials".to_string()))?;
        if !account.confirmed {
            return Err(AuthError::Auth("Email not confirmed".to_string()));
        }

        Ok(self.start_session(account.principal).await)
    }

    async fn sign_in_with_oauth(&self, credential: &OAuthCredential) -> Result<Session> {
        let grant = self.redeem(credential)?;

        // A provider sign-in confirms the address and links existing accounts.
        let (principal, created) = match self.accounts.entry(normalize_email(&grant.email)) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().confirmed = true;
                (slot.get().principal.clone(), false)
            }
            Entry::Vacant(slot) => {
                let principal = self.new_principal(&grant.email, grant.metadata, &grant.provider);
                slot.insert(Account {
                    password: None,
                    principal: principal.clone(),
                    confirmed: true,
                });
                (principal, true)
            }
        };
        if created {
            self.schedule_profile_insert(&principal);
        }

        Ok(self.start_session(principal).await)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.session.write().await.take() {
            self.refresh_tokens.remove(&session.refresh_token);
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let (_, uid) = self
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| AuthError::Auth("Invalid Refresh Token".to_string()))?;

        let principal = self
            .accounts
            .iter()
            .find(|account| account.principal.uid == uid)
            .map(|account| account.principal.clone())
            .ok_or_else(|| AuthError::Auth("User not found".to_string()))?;

        Ok(self.start_session(principal).await)
    }
}

impl ProfileStore for MemoryBackend {
    async fn get_profile_row(&self, uid: &str) -> Result<Option<Profile>> {
        Ok(self.profile(uid))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
