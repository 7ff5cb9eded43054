// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Supabase REST client: GoTrue auth and the PostgREST `profiles` table.
//!
//! Handles:
//! - Email/password sign-up and sign-in
//! - Provider sign-in (PKCE auth code or ID token)
//! - Refresh-token exchange and logout
//! - Profile row lookups with the signed-in user's token (row-level security)
//! - Mapping HTTP failures onto [`AuthError`] (rate limit, transport, auth)

use crate::config::Config;
use crate::db::tables;
use crate::error::{AuthError, Result};
use crate::models::{
    AuthPrincipal, OAuthCredential, Profile, ProfileRow, Session, SignUp, UserMetadata,
};
use crate::services::backend::{AuthProvider, ProfileStore};
use crate::time_utils::from_unix_seconds;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Which API a response came from; decides how 4xx errors are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    Auth,
    Rest,
}

/// Low-level Supabase API client.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed building HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.supabase_url,
            &config.supabase_anon_key,
            config.http_timeout,
        )
    }

    /// Create an account. `metadata` becomes the user's `user_metadata`.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<SignUp> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": metadata,
        });

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        let now = Utc::now();
        Ok(match check_response_json(Api::Auth, response).await? {
            SignUpResponse::Session(session) => {
                let session = session.into_session(now);
                SignUp {
                    principal: session.principal.clone(),
                    session: Some(session),
                }
            }
            SignUpResponse::Pending(principal) => SignUp {
                principal,
                session: None,
            },
        })
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.token_grant("password", &body).await
    }

    /// URL to send the browser to for a provider sign-in.
    ///
    /// The provider redirects back to `redirect_to` with `?code=...`, which
    /// is exchanged with [`Self::sign_in_with_oauth`] and the verifier
    /// matching `code_challenge`.
    pub fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String {
        format!(
            "{}/auth/v1/authorize?\
             provider={}&\
             redirect_to={}&\
             code_challenge={}&\
             code_challenge_method=s256",
            self.base_url,
            urlencoding::encode(provider),
            urlencoding::encode(redirect_to),
            urlencoding::encode(code_challenge)
        )
    }

    pub async fn sign_in_with_oauth(&self, credential: &OAuthCredential) -> Result<Session> {
        match credential {
            OAuthCredential::AuthCode {
                auth_code,
                code_verifier,
            } => {
                let body = serde_json::json!({
                    "auth_code": auth_code,
                    "code_verifier": code_verifier,
                });
                self.token_grant("pkce", &body).await
            }
            OAuthCredential::IdToken {
                provider,
                id_token,
                nonce,
            } => {
                let body = serde_json::json!({
                    "provider": provider,
                    "id_token": id_token,
                    "nonce": nonce,
                });
                self.token_grant("id_token", &body).await
            }
        }
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.token_grant("refresh_token", &body).await
    }

    /// Revoke the session behind `access_token`.
    ///
    /// An already invalid token counts as signed out.
    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = format!("{}/auth/v1/logout", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                tracing::debug!("Session already invalid at logout");
                Ok(())
            }
            _ => check_response(Api::Auth, response).await,
        }
    }

    /// Read one `profiles` row. Without an access token the anon key is used.
    pub async fn get_profile_row(
        &self,
        access_token: Option<&str>,
        uid: &str,
    ) -> Result<Option<Profile>> {
        let url = format!(
            "{}/rest/v1/{}?id=eq.{}&select=*",
            self.base_url,
            tables::PROFILES,
            urlencoding::encode(uid)
        );

        let response = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token.unwrap_or(&self.anon_key))
            .send()
            .await?;

        let rows: Vec<ProfileRow> = check_response_json(Api::Rest, response).await?;
        Ok(rows.into_iter().next().map(Profile::from))
    }

    async fn token_grant(&self, grant_type: &str, body: &serde_json::Value) -> Result<Session> {
        let url = format!("{}/auth/v1/token", self.base_url);

        let response = self
            .http
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await?;

        let session: SessionResponse = check_response_json(Api::Auth, response).await?;
        Ok(session.into_session(Utc::now()))
    }
}

/// Check response status and return error if not successful.
async fn check_response(api: Api, response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(api, status, &body))
}

/// Check response and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    api: Api,
    response: reqwest::Response,
) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(classify_error(api, status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::Decode(format!("JSON parse error: {}", e)))
}

/// Map a failed response onto the error taxonomy.
///
/// Rate limits and server-side failures are transient. Other 4xx answers
/// from the auth API are hard auth failures carrying the backend's message.
pub fn classify_error(api: Api, status: StatusCode, body: &str) -> AuthError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!("Supabase rate limit hit (429)");
        return AuthError::RateLimited;
    }

    let message = error_message(body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "unknown error".to_string());

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return AuthError::Transport(format!("HTTP {}: {}", status, message));
    }

    match api {
        Api::Auth => AuthError::Auth(message),
        Api::Rest => AuthError::Database(format!("HTTP {}: {}", status, message)),
    }
}

/// Pull the human-readable message out of a GoTrue/PostgREST error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["msg", "error_description", "message", "error"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .find(|msg| !msg.is_empty())
        .map(str::to_string)
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthPrincipal,
}

impl SessionResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(from_unix_seconds)
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            principal: self.user,
        }
    }
}

/// Sign-up answers with a session, or with a bare user while the
/// e-mail address is unconfirmed.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(SessionResponse),
    Pending(AuthPrincipal),
}

// ─────────────────────────────────────────────────────────────────────────────
// SupabaseBackend - client plus the session it is acting for
// ─────────────────────────────────────────────────────────────────────────────

/// Backend implementation that keeps the current session in memory, the way
/// the browser SDK does, and uses it for row-level-security reads.
#[derive(Clone)]
pub struct SupabaseBackend {
    client: SupabaseClient,
    session: Arc<RwLock<Option<Session>>>,
}

impl SupabaseBackend {
    pub fn new(client: SupabaseClient) -> Self {
        Self {
            client,
            session: Arc::new(RwLock::new(None)),
        }
    }
}

impl AuthProvider for SupabaseBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<SignUp> {
        let sign_up = self.client.sign_up(email, password, metadata).await?;
        if let Some(session) = &sign_up.session {
            *self.session.write().await = Some(session.clone());
        }
        Ok(sign_up)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.client.sign_in_with_password(email, password).await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn sign_in_with_oauth(&self, credential: &OAuthCredential) -> Result<Session> {
        let session = self.client.sign_in_with_oauth(credential).await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let session = self.session.write().await.take();
        match session {
            Some(session) => self.client.sign_out(&session.access_token).await,
            None => Ok(()),
        }
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let session = self.client.refresh_session(refresh_token).await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }
}

impl ProfileStore for SupabaseBackend {
    async fn get_profile_row(&self, uid: &str) -> Result<Option<Profile>> {
        let access_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone());

        self.client
            .get_profile_row(access_token.as_deref(), uid)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        let err = classify_error(Api::Auth, StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, AuthError::RateLimited));
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_credentials_keep_backend_message() {
        let body = r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#;
        let err = classify_error(Api::Auth, StatusCode::BAD_REQUEST, body);
        match err {
            AuthError::Auth(msg) => assert_eq!(msg, "Invalid login credentials"),
            other => panic!("unexpected error: {other:?}"),
        }

        let body = r#"{"error":"invalid_grant","error_description":"Refresh Token Not Found"}"#;
        let err = classify_error(Api::Auth, StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, AuthError::Auth(ref msg) if msg == "Refresh Token Not Found"));
    }

    #[test]
    fn test_server_errors_are_transport() {
        let err = classify_error(Api::Rest, StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, AuthError::Transport(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_rest_client_errors_are_database_errors() {
        let body = r#"{"code":"42501","message":"permission denied for table profiles"}"#;
        let err = classify_error(Api::Rest, StatusCode::FORBIDDEN, body);
        match err {
            AuthError::Database(msg) => assert!(msg.contains("permission denied")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sign_up_response_with_session() {
        let json = serde_json::json!({
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1_700_003_600,
            "refresh_token": "rt",
            "user": { "id": "u1", "email": "alice@example.com", "user_metadata": {} }
        });

        let response: SignUpResponse = serde_json::from_value(json).unwrap();
        let SignUpResponse::Session(session) = response else {
            panic!("expected a session");
        };
        let session = session.into_session(Utc::now());
        assert_eq!(session.principal.uid, "u1");
        assert_eq!(session.expires_at, from_unix_seconds(1_700_003_600));
    }

    #[test]
    fn test_sign_up_response_pending_confirmation() {
        let json = serde_json::json!({
            "id": "u2",
            "email": "bob@example.com",
            "confirmation_sent_at": "2026-01-01T00:00:00Z",
            "user_metadata": { "display_name": "Bob" }
        });

        let response: SignUpResponse = serde_json::from_value(json).unwrap();
        let SignUpResponse::Pending(principal) = response else {
            panic!("expected a pending user");
        };
        assert_eq!(principal.metadata.display_name(), Some("Bob"));
    }

    #[test]
    fn test_expiry_from_expires_in() {
        let now = Utc::now();
        let response = SessionResponse {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_in: Some(60),
            expires_at: None,
            user: AuthPrincipal::new("u3", None),
        };
        let session = response.into_session(now);
        assert_eq!(session.expires_at, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_authorize_url_carries_pkce_challenge() {
        let client =
            SupabaseClient::new("https://xyz.supabase.co/", "anon", Duration::from_secs(5)).unwrap();
        let url = client.authorize_url("google", "http://localhost:5173/auth/callback", "abc-_");
        assert_eq!(
            url,
            "https://xyz.supabase.co/auth/v1/authorize?provider=google&\
             redirect_to=http%3A%2F%2Flocalhost%3A5173%2Fauth%2Fcallback&\
             code_challenge=abc-_&code_challenge_method=s256"
        );
    }

    // ── HTTP round trips against a one-shot local server ───────────────────

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    const SESSION_BODY: &str = r#"{
        "access_token": "at-1",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "rt-1",
        "user": { "id": "u1", "email": "alice@example.com", "user_metadata": {} }
    }"#;

    /// Accept one request, answer with `status` and `body`, hand back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (SupabaseClient, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                    let length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|value| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        });

        let client =
            SupabaseClient::new(&format!("http://{addr}"), "anon-key", Duration::from_secs(5))
                .unwrap();
        (client, rx)
    }

    #[tokio::test]
    async fn test_password_grant_request_and_session() {
        let (client, request) = serve_once("200 OK", SESSION_BODY).await;

        let before = Utc::now();
        let session = client
            .sign_in_with_password("alice@example.com", "hunter22")
            .await
            .unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /auth/v1/token?grant_type=password HTTP/1.1"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("apikey: anon-key"));
        assert!(request.contains(r#""password":"hunter22""#));

        assert_eq!(session.access_token, "at-1");
        assert_eq!(session.principal.uid, "u1");
        let expires_at = session.expires_at.unwrap();
        assert!(expires_at >= before + chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_pkce_exchange_uses_pkce_grant() {
        let (client, request) = serve_once("200 OK", SESSION_BODY).await;

        let credential = OAuthCredential::AuthCode {
            auth_code: "code-123".to_string(),
            code_verifier: "verifier-456".to_string(),
        };
        client.sign_in_with_oauth(&credential).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /auth/v1/token?grant_type=pkce HTTP/1.1"));
        assert!(request.contains(r#""auth_code":"code-123""#));
        assert!(request.contains(r#""code_verifier":"verifier-456""#));
    }

    #[tokio::test]
    async fn test_profile_read_uses_bearer_and_filter() {
        let (client, request) = serve_once(
            "200 OK",
            r#"[{"id":"u 1","email":null,"display_name":"Ann","photo_url":null,
                 "role":"admin","created_at":"2025-01-01T00:00:00+00:00"}]"#,
        )
        .await;

        let profile = client
            .get_profile_row(Some("at-1"), "u 1")
            .await
            .unwrap()
            .unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("GET /rest/v1/profiles?id=eq.u%201&select=* HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer at-1"));
        assert_eq!(profile.role, crate::models::Role::Admin);
    }

    #[tokio::test]
    async fn test_missing_profile_row_is_none() {
        let (client, _request) = serve_once("200 OK", "[]").await;
        assert!(client.get_profile_row(None, "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_with_dead_token_is_ok() {
        let (client, request) =
            serve_once("401 Unauthorized", r#"{"msg":"invalid JWT"}"#).await;

        client.sign_out("stale-token").await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /auth/v1/logout HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer stale-token"));
    }

    #[tokio::test]
    async fn test_logout_server_error_is_transport() {
        let (client, _request) = serve_once("503 Service Unavailable", "").await;
        let err = client.sign_out("at-1").await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[tokio::test]
    async fn test_rejected_refresh_keeps_backend_message() {
        let (client, _request) = serve_once(
            "400 Bad Request",
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Already Used"}"#,
        )
        .await;

        let err = client.refresh_session("rt-old").await.unwrap_err();
        assert!(err.is_hard_auth_failure());
        assert_eq!(
            err.to_string(),
            "Authentication failed: Invalid Refresh Token: Already Used"
        );
    }
}
