//! Auth-side identity: principals, sessions and sign-up input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use validator::Validate;

/// Free-form metadata attached to an auth user.
///
/// Used for both `user_metadata` (editable by the user) and `app_metadata`
/// (set only by the backend). Different providers use different keys for the same thing
/// (`full_name` from OAuth, `display_name` from our own sign-up form), so
/// the raw object is kept and read through accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserMetadata(Map<String, Value>);

impl UserMetadata {
    const DISPLAY_NAME_KEYS: [&'static str; 3] = ["display_name", "full_name", "name"];
    const PHOTO_URL_KEYS: [&'static str; 3] = ["photo_url", "avatar_url", "picture"];

    /// Metadata sent along with an email sign-up.
    pub fn for_sign_up(display_name: &str) -> Self {
        let mut map = Map::new();
        let display_name = display_name.trim();
        if !display_name.is_empty() {
            map.insert("display_name".to_string(), Value::from(display_name));
        }
        Self(map)
    }

    /// Set an arbitrary key (builder style).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn display_name(&self) -> Option<&str> {
        self.first_non_blank(&Self::DISPLAY_NAME_KEYS)
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.first_non_blank(&Self::PHOTO_URL_KEYS)
    }

    /// Raw role string, if any. Parsing is left to the caller.
    ///
    /// Only meaningful on `app_metadata`; users can write their own
    /// `user_metadata`.
    pub fn role(&self) -> Option<&str> {
        self.first_non_blank(&["role"])
    }

    /// Sign-in provider recorded by the backend (`email`, `google`, ...).
    pub fn provider(&self) -> Option<&str> {
        self.first_non_blank(&["provider"])
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn first_non_blank(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.0.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|value| !value.is_empty())
    }
}

/// Identity returned synchronously by the auth provider at sign-in/sign-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPrincipal {
    /// Auth user ID (also the profile row key)
    #[serde(rename = "id")]
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(
        rename = "user_metadata",
        default,
        deserialize_with = "null_as_default"
    )]
    pub metadata: UserMetadata,
    /// Backend-controlled metadata (provider, role claims)
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_metadata: UserMetadata,
    /// When the auth user was created
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AuthPrincipal {
    pub fn new(uid: impl Into<String>, email: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            email,
            metadata: UserMetadata::default(),
            app_metadata: UserMetadata::default(),
            created_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: UserMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_app_metadata(mut self, app_metadata: UserMetadata) -> Self {
        self.app_metadata = app_metadata;
        self
    }
}

/// An authenticated session.
#[derive(Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub principal: AuthPrincipal,
}

impl Session {
    /// Whether the access token has expired (sessions without expiry never do).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("principal", &self.principal)
            .finish()
    }
}

/// Result of a sign-up call.
///
/// `session` is `None` when the backend requires e-mail confirmation
/// before the first sign-in.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub principal: AuthPrincipal,
    pub session: Option<Session>,
}

/// Email/password sign-up form.
#[derive(Clone, Validate)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6))]
    pub password: String,
    #[validate(length(max = 100))]
    pub display_name: String,
}

impl SignUpRequest {
    pub fn new(email: &str, password: &str, display_name: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            password: password.to_string(),
            display_name: display_name.trim().to_string(),
        }
    }
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Proof of a third-party sign-in, exchanged for a session.
#[derive(Clone)]
pub enum OAuthCredential {
    /// Code from the provider redirect plus the PKCE verifier that matches
    /// the challenge sent with the authorize URL.
    AuthCode {
        auth_code: String,
        code_verifier: String,
    },
    /// ID token obtained from the provider directly (e.g. Google One Tap).
    IdToken {
        provider: String,
        id_token: String,
        nonce: Option<String>,
    },
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OAuthCredential::AuthCode { .. } => f.write_str("AuthCode(<redacted>)"),
            OAuthCredential::IdToken { provider, .. } => f
                .debug_struct("IdToken")
                .field("provider", provider)
                .finish_non_exhaustive(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
