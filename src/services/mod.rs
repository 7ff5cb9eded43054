// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - backend clients and profile resolution.

pub mod backend;
pub mod oauth;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod supabase;

pub use backend::{AuthProvider, ProfileStore};
pub use oauth::Pkce;
pub use resolver::{
    AuthEvent, FetchOutcome, ProfileResolver, Resolution, ResolverState, SessionToken,
};
pub use retry::{Backoff, RetryPolicy};
pub use session::AuthSession;
pub use supabase::{SupabaseBackend, SupabaseClient};
