//! Access token parsing and verification.
//!
//! Current access tokens (version 3 and above) are JWTs signed by the core with rotating keys:
//! they are verified locally against the key set published by the core, which is cached by
//! [`KeyCache`]. Legacy tokens (versions 1 and 2) can only be verified by the core itself.
use serde_json::Value;

use crate::Payload;
use crate::core::DEFAULT_TENANT_ID;
use crate::session::errors::SessionError;

mod front;
mod jwks;
mod parse;
mod verify;

pub use front::{FrontToken, decode_front_token, encode_front_token};
pub use jwks::KeyCache;
pub use parse::{LATEST_ACCESS_TOKEN_VERSION, ParsedToken, parse};
pub use verify::verify_locally;

pub(crate) use parse::decode_segment;

/// Payload keys that are managed by the SDK and the core.
///
/// They can't be set through session payload updates.
pub const PROTECTED_PROPS: [&str; 9] = [
    "sub",
    "iat",
    "exp",
    "sessionHandle",
    "parentRefreshTokenHash1",
    "refreshTokenHash1",
    "antiCsrfToken",
    "rsub",
    "tId",
];

/// Remove every protected key from `payload`.
pub fn strip_protected(payload: &mut Payload) {
    for key in PROTECTED_PROPS {
        if payload.remove(key).is_some() {
            tracing::debug!(key, "Ignoring a protected key in a session payload update");
        }
    }
}

/// What an access token says about its session.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenInfo {
    pub session_handle: String,
    pub user_id: String,
    pub recipe_user_id: String,
    pub tenant_id: String,
    /// Milliseconds since the Unix epoch.
    pub expiry_ms: i64,
    /// Milliseconds since the Unix epoch.
    pub time_created_ms: i64,
    /// The custom claims, i.e. the payload without [`PROTECTED_PROPS`].
    pub payload: Payload,
    pub anti_csrf_token: Option<String>,
    pub refresh_token_hash1: String,
    pub parent_refresh_token_hash1: Option<String>,
}

fn incomplete() -> SessionError {
    SessionError::unauthorised("The access token does not contain all the necessary information")
}

fn string(payload: &Payload, key: &str) -> Result<String, SessionError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(incomplete)
}

fn optional_string(payload: &Payload, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn number(payload: &Payload, key: &str) -> Result<i64, SessionError> {
    payload
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(incomplete)
}

impl AccessTokenInfo {
    /// Interpret the payload of a token with the given version.
    pub fn from_payload(version: u32, payload: &Payload) -> Result<Self, SessionError> {
        let info = if version >= 3 {
            let user_id = string(payload, "sub")?;
            let tenant_id = if version >= 4 {
                string(payload, "tId")?
            } else {
                DEFAULT_TENANT_ID.to_owned()
            };
            let recipe_user_id = if version >= 5 {
                string(payload, "rsub")?
            } else {
                user_id.clone()
            };
            let mut custom = payload.clone();
            strip_protected(&mut custom);
            Self {
                session_handle: string(payload, "sessionHandle")?,
                user_id,
                recipe_user_id,
                tenant_id,
                expiry_ms: number(payload, "exp")?.saturating_mul(1000),
                time_created_ms: number(payload, "iat")?.saturating_mul(1000),
                payload: custom,
                anti_csrf_token: optional_string(payload, "antiCsrfToken"),
                refresh_token_hash1: string(payload, "refreshTokenHash1")?,
                parent_refresh_token_hash1: optional_string(payload, "parentRefreshTokenHash1"),
            }
        } else {
            let user_id = string(payload, "userId")?;
            let custom = match payload.get("userData") {
                Some(Value::Object(data)) => data.clone(),
                None | Some(Value::Null) => Payload::new(),
                Some(_) => return Err(incomplete()),
            };
            Self {
                session_handle: string(payload, "sessionHandle")?,
                recipe_user_id: user_id.clone(),
                user_id,
                tenant_id: DEFAULT_TENANT_ID.to_owned(),
                expiry_ms: number(payload, "expiryTime")?,
                time_created_ms: number(payload, "timeCreated")?,
                payload: custom,
                anti_csrf_token: optional_string(payload, "antiCsrfToken"),
                refresh_token_hash1: string(payload, "refreshTokenHash1")?,
                parent_refresh_token_hash1: optional_string(payload, "parentRefreshTokenHash1"),
            }
        };
        if info.expiry_ms <= info.time_created_ms {
            return Err(SessionError::unauthorised(
                "The access token expires before it was created",
            ));
        }
        Ok(info)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_ms <= now_ms
    }
}
