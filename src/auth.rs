use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    cookies::SessionCookies,
    models::{Identity, StoredSession, SupabaseUser},
};

/// Sessions expiring within this many seconds are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 10;
/// Encoded session values longer than this are split over `name.N` cookies.
const MAX_CHUNK_SIZE: usize = 3180;
const BASE64_PREFIX: &str = "base64-";

/// IdentityError
///
/// Everything that can stop the identity backend from confirming a user. The
/// access gate folds all of these into "not authenticated".
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no session cookie present")]
    NoSession,
    #[error("session cookie could not be decoded: {0}")]
    Malformed(String),
    #[error("identity backend rejected the session ({0})")]
    Rejected(StatusCode),
    #[error("identity backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

// 1. IdentityBackend Contract
/// IdentityBackend
///
/// The capability the access gate depends on: confirm the current user from
/// the request cookies, possibly rotating them through the same jar. Swapping
/// the implementation (Supabase in production, the mock in tests) does not
/// affect the gate.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Resolves the signed-in user, refreshing the session if it is about to
    /// expire. Rotated cookies are staged on `cookies`.
    async fn current_user(&self, cookies: &mut SessionCookies) -> Result<Identity, IdentityError>;

    /// Ends the session. Session cookies are cleared even if the backend call
    /// fails.
    async fn sign_out(&self, cookies: &mut SessionCookies) -> Result<(), IdentityError>;
}

/// IdentityState
///
/// The concrete type used to share the identity backend across the application state.
pub type IdentityState = Arc<dyn IdentityBackend>;

// 2. The Real Implementation (Supabase GoTrue)
/// SupabaseAuth
///
/// Talks to the `/auth/v1` API of a Supabase project and understands the
/// cookie layout written by the Supabase SSR helpers: one `sb-<ref>-auth-token`
/// cookie (or `.0`, `.1`, ... chunks) holding the session JSON, optionally
/// `base64-` prefixed.
#[derive(Clone)]
pub struct SupabaseAuth {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    cookie_name: String,
}

/// Error body returned by GoTrue; only used for logging.
#[derive(Deserialize)]
struct GoTrueError {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

impl SupabaseAuth {
    /// new
    ///
    /// Derives the session cookie name from the project host, the same way the
    /// browser client does (`sb-<first host label>-auth-token`).
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        let base_url = supabase_url.trim_end_matches('/').to_string();
        let project_ref = reqwest::Url::parse(&base_url)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.split('.').next().unwrap_or(h).to_string()))
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            client: reqwest::Client::new(),
            base_url,
            anon_key: anon_key.to_string(),
            cookie_name: format!("sb-{project_ref}-auth-token"),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Reassembles the session from the single cookie or its numbered chunks.
    fn load_session(&self, cookies: &SessionCookies) -> Result<StoredSession, IdentityError> {
        let raw = match cookies.get(&self.cookie_name) {
            Some(cookie) => cookie.value().to_string(),
            None => {
                let mut joined = String::new();
                for idx in 0.. {
                    match cookies.get(&format!("{}.{idx}", self.cookie_name)) {
                        Some(chunk) => joined.push_str(chunk.value()),
                        None => break,
                    }
                }
                joined
            }
        };

        if raw.is_empty() {
            return Err(IdentityError::NoSession);
        }
        decode_session(&raw)
    }

    /// Stages the encoded session, chunked if needed, and clears any session
    /// cookie from the old layout that the new one does not overwrite.
    fn store_session(&self, cookies: &mut SessionCookies, session: &StoredSession) -> Result<(), IdentityError> {
        let json = serde_json::to_string(session).map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let encoded = format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(json));

        let fresh: Vec<Cookie<'static>> = if encoded.len() <= MAX_CHUNK_SIZE {
            vec![session_cookie(self.cookie_name.clone(), encoded)]
        } else {
            encoded
                .as_bytes()
                .chunks(MAX_CHUNK_SIZE)
                .enumerate()
                .map(|(idx, chunk)| {
                    // base64url output is ASCII, so byte chunks are valid UTF-8.
                    let part = String::from_utf8_lossy(chunk).into_owned();
                    session_cookie(format!("{}.{idx}", self.cookie_name), part)
                })
                .collect()
        };

        let stale: Vec<Cookie<'static>> = self
            .session_cookie_names(cookies)
            .into_iter()
            .filter(|name| !fresh.iter().any(|c| c.name() == name))
            .map(removal_cookie)
            .collect();

        cookies.stage(fresh.into_iter().chain(stale));
        Ok(())
    }

    fn clear_session(&self, cookies: &mut SessionCookies) {
        let names = self.session_cookie_names(cookies);
        cookies.stage(names.into_iter().map(removal_cookie));
    }

    fn session_cookie_names(&self, cookies: &SessionCookies) -> Vec<String> {
        let chunk_prefix = format!("{}.", self.cookie_name);
        cookies
            .read()
            .iter()
            .map(|c| c.name())
            .filter(|name| *name == self.cookie_name || name.starts_with(&chunk_prefix))
            .map(str::to_string)
            .collect()
    }

    /// refresh
    ///
    /// Exchanges the refresh token for a new session. A 4xx answer means the
    /// refresh token is spent or revoked, so the stale cookies are cleared.
    async fn refresh(&self, cookies: &mut SessionCookies, session: &StoredSession) -> Result<StoredSession, IdentityError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=refresh_token", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": session.refresh_token }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log_rejection("token refresh", response).await;
            if status.is_client_error() {
                self.clear_session(cookies);
            }
            return Err(IdentityError::Rejected(status));
        }

        let mut refreshed = response
            .json::<StoredSession>()
            .await
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        if refreshed.expires_at.is_none() {
            refreshed.expires_at = refreshed.expires_in.map(|secs| Utc::now().timestamp() + secs);
        }

        self.store_session(cookies, &refreshed)?;
        tracing::debug!("supabase session refreshed");
        Ok(refreshed)
    }
}

#[async_trait]
impl IdentityBackend for SupabaseAuth {
    async fn current_user(&self, cookies: &mut SessionCookies) -> Result<Identity, IdentityError> {
        let mut session = self.load_session(cookies)?;

        let expiring = session
            .expires_at
            .is_some_and(|at| at - Utc::now().timestamp() <= EXPIRY_MARGIN_SECS);
        if expiring {
            session = self.refresh(cookies, &session).await?;
        }

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log_rejection("get user", response).await;
            return Err(IdentityError::Rejected(status));
        }

        let user = response
            .json::<SupabaseUser>()
            .await
            .map_err(|e| IdentityError::Malformed(e.to_string()))?;
        Ok(user.into())
    }

    async fn sign_out(&self, cookies: &mut SessionCookies) -> Result<(), IdentityError> {
        let result = match self.load_session(cookies) {
            Ok(session) => self
                .client
                .post(format!("{}/auth/v1/logout?scope=local", self.base_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(IdentityError::from)
                .and_then(|response| match response.status() {
                    // An expired or unknown token is already signed out.
                    s if s.is_success() || s == StatusCode::UNAUTHORIZED || s == StatusCode::NOT_FOUND => Ok(()),
                    s => Err(IdentityError::Rejected(s)),
                }),
            Err(IdentityError::NoSession) => Ok(()),
            Err(e) => Err(e),
        };

        self.clear_session(cookies);
        result
    }
}

/// decode_session
///
/// Accepts both the `base64-` prefixed form written by current SSR helpers
/// and the raw JSON written by older ones.
pub fn decode_session(raw: &str) -> Result<StoredSession, IdentityError> {
    let json = match raw.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .map_err(|e| IdentityError::Malformed(e.to_string()))?;
            String::from_utf8(bytes).map_err(|e| IdentityError::Malformed(e.to_string()))?
        }
        None => raw.to_string(),
    };

    serde_json::from_str(&json).map_err(|e| IdentityError::Malformed(e.to_string()))
}

fn session_cookie(name: String, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(400))
        .build()
}

fn removal_cookie(name: String) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

async fn log_rejection(call: &str, response: reqwest::Response) {
    let status = response.status();
    let message = response
        .json::<GoTrueError>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_default();
    tracing::warn!(%status, %message, "supabase {call} rejected");
}

// 3. The Mock Implementation (For Tests)
/// MockIdentityBackend
///
/// Returns a canned identity (or failure) and stages a fixed set of cookies on
/// every call, standing in for token rotation. Lets the gate be tested without
/// a live backend.
#[derive(Clone, Default)]
pub struct MockIdentityBackend {
    /// `None` simulates an absent session.
    pub identity: Option<Identity>,
    /// When true, the call fails as if the backend were unreachable.
    pub should_fail: bool,
    /// Cookies staged on every `current_user` call.
    pub rotated_cookies: Vec<(String, String)>,
}

impl MockIdentityBackend {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn with_rotated_cookie(mut self, name: &str, value: &str) -> Self {
        self.rotated_cookies.push((name.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl IdentityBackend for MockIdentityBackend {
    async fn current_user(&self, cookies: &mut SessionCookies) -> Result<Identity, IdentityError> {
        cookies.stage(
            self.rotated_cookies
                .iter()
                .map(|(name, value)| session_cookie(name.clone(), value.clone())),
        );

        if self.should_fail {
            return Err(IdentityError::Rejected(StatusCode::SERVICE_UNAVAILABLE));
        }
        self.identity.clone().ok_or(IdentityError::NoSession)
    }

    async fn sign_out(&self, cookies: &mut SessionCookies) -> Result<(), IdentityError> {
        let names: Vec<String> = cookies.read().iter().map(|c| c.name().to_string()).collect();
        cookies.stage(names.into_iter().map(removal_cookie));
        Ok(())
    }
}
