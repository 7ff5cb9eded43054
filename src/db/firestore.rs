// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed profile store.
//!
//! Reads the `users/{uid}` documents written by the Firebase-era
//! storefront. Field names are camelCase as that client wrote them.

use crate::db::collections;
use crate::error::{AuthError, Result};
use crate::models::{Profile, Role};
use crate::services::backend::ProfileStore;
use chrono::{DateTime, Utc};
use firestore::errors::FirestoreError;
use serde::{Deserialize, Serialize};

/// A `users` collection document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Server timestamp; briefly absent right after the write
    #[serde(default, with = "firestore::serialize_as_optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserDocument {
    pub fn into_profile(self, uid: &str, now: DateTime<Utc>) -> Profile {
        Profile {
            uid: uid.to_string(),
            email: self.email,
            display_name: self.display_name,
            photo_url: self.photo_url,
            role: self.role,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

impl From<&Profile> for UserDocument {
    fn from(profile: &Profile) -> Self {
        Self {
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
            photo_url: profile.photo_url.clone(),
            role: profile.role,
            created_at: Some(profile.created_at),
        }
    }
}

/// Firestore profile store client.
#[derive(Clone)]
pub struct FirestoreProfileStore {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreProfileStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AuthError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AuthError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline store for testing. Every read fails.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AuthError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Get the profile document for `uid`.
    pub async fn get_profile(&self, uid: &str) -> Result<Option<Profile>> {
        let document: Option<UserDocument> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(uid)
            .await
            .map_err(map_firestore_error)?;

        Ok(document.map(|doc| doc.into_profile(uid, Utc::now())))
    }

    /// Create or replace the profile document for `profile.uid`.
    ///
    /// The Firebase-era client wrote this document itself after sign-up.
    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&profile.uid)
            .object(&UserDocument::from(profile))
            .execute()
            .await
            .map_err(map_firestore_error)?;
        Ok(())
    }

    /// Delete the profile document for `uid`.
    pub async fn delete_profile(&self, uid: &str) -> Result<()> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::USERS)
            .document_id(uid)
            .execute()
            .await
            .map_err(map_firestore_error)?;
        Ok(())
    }
}

impl ProfileStore for FirestoreProfileStore {
    async fn get_profile_row(&self, uid: &str) -> Result<Option<Profile>> {
        self.get_profile(uid).await
    }
}

/// Network failures and retryable database errors are transient.
fn map_firestore_error(err: FirestoreError) -> AuthError {
    match &err {
        FirestoreError::NetworkError(_) => AuthError::Transport(err.to_string()),
        FirestoreError::DatabaseError(db_err) if db_err.retry_possible => {
            AuthError::Transport(err.to_string())
        }
        FirestoreError::DeserializeError(_) => AuthError::Decode(err.to_string()),
        _ => AuthError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_offline_store_fails_reads() {
        let store = FirestoreProfileStore::new_mock();
        let err = store.get_profile_row("u1").await.unwrap_err();
        assert!(matches!(err, AuthError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_document_without_timestamp_uses_now() {
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
        let doc = UserDocument {
            email: Some("gina@example.com".to_string()),
            display_name: Some("Gina".to_string()),
            photo_url: None,
            role: Role::Admin,
            created_at: None,
        };

        let profile = doc.into_profile("u9", now);
        assert_eq!(profile.uid, "u9");
        assert_eq!(profile.created_at, now);
        assert_eq!(profile.role, Role::Admin);
    }
}
