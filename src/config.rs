//! Application configuration loaded from environment variables.
//!
//! Only the public anon key is needed on the client side; row-level
//! security on the backend decides what a signed-in user may read.

use crate::services::retry::{Backoff, RetryPolicy};
use std::env;
use std::time::Duration;

/// Which backend holds the profile rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStoreKind {
    /// Postgres `profiles` table behind PostgREST.
    Postgrest,
    /// Firestore `users` collection (the pre-migration store).
    Firestore,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub supabase_url: String,
    /// Public anon API key
    pub supabase_anon_key: String,
    pub profile_store: ProfileStoreKind,
    /// GCP project ID (Firestore store only)
    pub gcp_project_id: String,
    /// Profile fetch policy after sign-in or session restore
    pub sign_in_retry: RetryPolicy,
    /// Profile fetch policy after sign-up, when the row is known to be pending
    pub sign_up_retry: RetryPolicy,
    pub http_timeout: Duration,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test_anon_key".to_string(),
            profile_store: ProfileStoreKind::Postgrest,
            gcp_project_id: "test-project".to_string(),
            sign_in_retry: RetryPolicy::sign_in_default(),
            sign_up_retry: RetryPolicy::sign_up_default(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let profile_store = match env::var("PROFILE_STORE").as_deref() {
            Err(_) | Ok("postgrest") => ProfileStoreKind::Postgrest,
            Ok("firestore") => ProfileStoreKind::Firestore,
            Ok(_) => return Err(ConfigError::Invalid("PROFILE_STORE")),
        };

        let backoff = match env::var("PROFILE_BACKOFF").as_deref() {
            Err(_) | Ok("fixed") => Backoff::Fixed,
            Ok("exponential") => Backoff::exponential(),
            Ok(_) => return Err(ConfigError::Invalid("PROFILE_BACKOFF")),
        };

        let sign_in_retry = RetryPolicy::new(
            parse_var("SIGNIN_PROFILE_ATTEMPTS", 3)?,
            Duration::from_millis(parse_var("SIGNIN_PROFILE_DELAY_MS", 1000)?),
        )
        .with_backoff(backoff);

        let sign_up_retry = RetryPolicy::new(
            parse_var("SIGNUP_PROFILE_ATTEMPTS", 5)?,
            Duration::from_millis(parse_var("SIGNUP_PROFILE_DELAY_MS", 500)?),
        )
        .with_backoff(backoff);

        Ok(Self {
            supabase_url: env::var("SUPABASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
            supabase_anon_key: env::var("SUPABASE_ANON_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            profile_store,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            sign_in_retry,
            sign_up_retry,
            http_timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", 10)?),
        })
    }
}

/// Parse an optional numeric variable, using `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
