// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storefront_auth::db::FirestoreProfileStore;
use storefront_auth::error::{AuthError, Result};
use storefront_auth::models::{AuthPrincipal, Profile, Role};
use storefront_auth::services::{ProfileResolver, ProfileStore, RetryPolicy};
use tokio::sync::{Notify, Semaphore};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test Firestore store connection.
#[allow(dead_code)]
pub async fn test_firestore() -> FirestoreProfileStore {
    FirestoreProfileStore::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Fixed creation time so stored profiles compare equal across reads.
#[allow(dead_code)]
pub fn created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 20, 9, 30, 0).unwrap()
}

/// Short delays so retry tests stay fast.
#[allow(dead_code)]
pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(5))
}

#[allow(dead_code)]
pub fn principal(uid: &str, email: &str) -> AuthPrincipal {
    AuthPrincipal::new(uid, Some(email.to_string()))
}

#[allow(dead_code)]
pub fn stored_profile(uid: &str, role: Role) -> Profile {
    Profile {
        uid: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        display_name: Some(format!("Stored {uid}")),
        photo_url: None,
        role,
        created_at: created_at(),
    }
}

/// Resolver over `store` using `policy` for both sign-in and sign-up.
#[allow(dead_code)]
pub fn resolver<P: ProfileStore>(store: Arc<P>, policy: RetryPolicy) -> ProfileResolver<P> {
    ProfileResolver::new(store, policy, policy)
}

/// What one profile lookup returns.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Reply {
    /// A row for whichever uid was asked for, with this role
    Row(Role),
    Missing,
    Transport,
}

/// Profile store that answers from a script and can hold calls at a gate.
pub struct ScriptedStore {
    replies: Mutex<VecDeque<Reply>>,
    /// Used once the script runs out
    fallback_reply: Reply,
    calls: AtomicU32,
    completed: AtomicU32,
    entered: Notify,
    gate: Option<Semaphore>,
}

#[allow(dead_code)]
impl ScriptedStore {
    pub fn new(replies: Vec<Reply>, fallback_reply: Reply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback_reply,
            calls: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            entered: Notify::new(),
            gate: None,
        }
    }

    /// Every lookup waits for a [`ScriptedStore::release`] before answering.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Wait until some lookup has started.
    pub async fn wait_for_call(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

impl ProfileStore for ScriptedStore {
    async fn get_profile_row(&self, uid: &str) -> Result<Option<Profile>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback_reply);
        self.completed.fetch_add(1, Ordering::SeqCst);

        match reply {
            Reply::Row(role) => Ok(Some(stored_profile(uid, role))),
            Reply::Missing => Ok(None),
            Reply::Transport => Err(AuthError::Transport("connection reset".to_string())),
        }
    }
}
