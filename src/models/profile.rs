//! Stored user profiles and the resolved user handed to the UI.

use crate::models::AuthPrincipal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Storefront role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Durable profile record, owned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub role: Role,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

/// Row of the Postgres `profiles` table as returned by PostgREST.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            uid: row.id,
            email: row.email,
            display_name: row.display_name,
            photo_url: row.photo_url,
            role: row.role,
            created_at: row.created_at,
        }
    }
}

/// Where a [`ResolvedUser`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    /// Synthesized from auth metadata while the stored profile is unavailable.
    Fallback,
    /// Read from the profile store.
    Stored,
}

/// The user exposed to the UI: always profile-shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ResolvedUser {
    #[serde(flatten)]
    pub profile: Profile,
    pub source: ProfileSource,
}

impl ResolvedUser {
    /// Synthesize a stand-in profile from principal metadata alone.
    ///
    /// Role comes from `app_metadata` only, since `user_metadata` is
    /// writable by the user; it defaults to `user`. Display name defaults
    /// to the local part of the email, creation time to the principal's
    /// (or `now`).
    pub fn fallback(principal: &AuthPrincipal, now: DateTime<Utc>) -> Self {
        let metadata = &principal.metadata;

        let display_name = metadata
            .display_name()
            .map(str::to_string)
            .or_else(|| principal.email.as_deref().and_then(email_local_part));

        let role = principal
            .app_metadata
            .role()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        Self {
            profile: Profile {
                uid: principal.uid.clone(),
                email: principal.email.clone(),
                display_name,
                photo_url: metadata.photo_url().map(str::to_string),
                role,
                created_at: principal.created_at.unwrap_or(now),
            },
            source: ProfileSource::Fallback,
        }
    }

    /// Wrap a stored profile, filling its empty optional fields from `fallback`.
    pub fn from_stored(mut profile: Profile, fallback: Option<&ResolvedUser>) -> Self {
        if let Some(fallback) = fallback.map(|user| &user.profile) {
            if profile.email.is_none() {
                profile.email = fallback.email.clone();
            }
            if profile.display_name.as_deref().map_or(true, |name| name.trim().is_empty()) {
                profile.display_name = fallback.display_name.clone();
            }
            if profile.photo_url.is_none() {
                profile.photo_url = fallback.photo_url.clone();
            }
        }

        Self {
            profile,
            source: ProfileSource::Stored,
        }
    }

    pub fn uid(&self) -> &str {
        &self.profile.uid
    }

    pub fn is_admin(&self) -> bool {
        self.profile.role == Role::Admin
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ProfileSource::Fallback
    }
}

fn email_local_part(email: &str) -> Option<String> {
    email
        .split('@')
        .next()
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .map(str::to_string)
}
