use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity
///
/// The authenticated user as confirmed by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
}

/// Session
///
/// The caller's authenticated-identity state for one request, derived from
/// cookies by the access gate. Nothing is stored server-side; it is dropped
/// when the request completes.
///
/// On allowed requests the gate inserts it into the request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub present: bool,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl From<Identity> for Session {
    fn from(identity: Identity) -> Self {
        Self {
            present: true,
            user_id: Some(identity.id),
            email: identity.email,
        }
    }
}

/// StoredSession
///
/// The auth session Supabase keeps in the `sb-<ref>-auth-token` cookie. Only
/// the fields the gate reads are typed; the rest round-trips through `extra`
/// so a rewritten cookie keeps everything the browser client expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    // Unix seconds. Older clients omit it and only send `expires_in`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// SupabaseUser
///
/// Minimal struct to deserialize the `/auth/v1/user` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<SupabaseUser> for Identity {
    fn from(user: SupabaseUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
        }
    }
}

/// ProfileResponse
///
/// Output schema for the signed-in user's profile page (GET /protected).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: Option<String>,
}
