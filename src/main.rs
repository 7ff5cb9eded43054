// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storefront auth CLI
//!
//! Signs in (or up, with `--sign-up`) against the configured backend and
//! logs every resolved-user update until the profile fetch settles, then
//! signs out again. Useful for checking profile triggers and row-level
//! security from a terminal.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use storefront_auth::{
    config::{Config, ProfileStoreKind},
    db::FirestoreProfileStore,
    services::{
        AuthProvider, AuthSession, ProfileResolver, ProfileStore, SupabaseBackend, SupabaseClient,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        url = %config.supabase_url,
        store = ?config.profile_store,
        "Starting storefront auth check"
    );

    let credentials = Credentials::from_env()?;
    let backend = SupabaseBackend::new(SupabaseClient::from_config(&config)?);

    match config.profile_store {
        ProfileStoreKind::Postgrest => {
            let resolver = ProfileResolver::from_config(Arc::new(backend.clone()), &config);
            run(AuthSession::new(backend, resolver), &config, &credentials).await
        }
        ProfileStoreKind::Firestore => {
            let store = FirestoreProfileStore::new(&config.gcp_project_id).await?;
            let resolver = ProfileResolver::from_config(Arc::new(store), &config);
            run(AuthSession::new(backend, resolver), &config, &credentials).await
        }
    }
}

async fn run<A: AuthProvider, P: ProfileStore>(
    session: AuthSession<A, P>,
    config: &Config,
    credentials: &Credentials,
) -> anyhow::Result<()> {
    let mut updates = Box::pin(session.updates());

    let user = if credentials.sign_up {
        session
            .sign_up_with_email(
                &credentials.email,
                &credentials.password,
                &credentials.display_name,
            )
            .await?
    } else {
        session
            .sign_in_with_email(&credentials.email, &credentials.password)
            .await?
    };
    tracing::info!(uid = %user.uid(), "Authenticated");

    // Long enough for the slower of the two fetch policies to finish.
    let window = settle_window(config);
    let watch = async {
        while let Some(update) = updates.next().await {
            let json = serde_json::to_string(&update)?;
            tracing::info!(user = %json, "Resolved user update");
            if update.is_some_and(|user| !user.is_fallback()) {
                break;
            }
        }
        anyhow::Ok(())
    };

    match tokio::time::timeout(window, watch).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(
            waited_ms = window.as_millis() as u64,
            "Stored profile not available, fallback user stands"
        ),
    }

    tracing::info!(admin = session.is_admin(), "Final user state");
    session.sign_out().await?;
    Ok(())
}

fn settle_window(config: &Config) -> Duration {
    [config.sign_in_retry, config.sign_up_retry]
        .iter()
        .map(|policy| {
            (1..policy.max_attempts())
                .map(|attempt| policy.delay_after(attempt))
                .sum::<Duration>()
                + config.http_timeout * policy.max_attempts()
        })
        .max()
        .unwrap_or(config.http_timeout)
}

/// Credentials for the check, from the environment.
struct Credentials {
    email: String,
    password: String,
    display_name: String,
    sign_up: bool,
}

impl Credentials {
    fn from_env() -> anyhow::Result<Self> {
        let email = std::env::var("STOREFRONT_EMAIL")
            .map_err(|_| anyhow::anyhow!("STOREFRONT_EMAIL must be set"))?;
        let password = std::env::var("STOREFRONT_PASSWORD")
            .map_err(|_| anyhow::anyhow!("STOREFRONT_PASSWORD must be set"))?;

        Ok(Self {
            email,
            password,
            display_name: std::env::var("STOREFRONT_DISPLAY_NAME").unwrap_or_default(),
            sign_up: std::env::args().any(|arg| arg == "--sign-up"),
        })
    }
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storefront_auth=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
