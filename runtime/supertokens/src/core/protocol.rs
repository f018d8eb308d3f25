use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Payload;

/// The tenant every user belongs to unless multi-tenancy is in use.
pub const DEFAULT_TENANT_ID: &str = "public";

pub(crate) fn default_tenant_id() -> String {
    DEFAULT_TENANT_ID.to_owned()
}

/// A session, as described by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSession {
    pub handle: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_user_id: Option<String>,
    #[serde(rename = "userDataInJWT", default)]
    pub payload: Payload,
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
}

impl CoreSession {
    /// Falls back to the user id for sessions created before account linking existed.
    pub fn recipe_user_id(&self) -> &str {
        self.recipe_user_id.as_deref().unwrap_or(&self.user_id)
    }
}

/// A token minted by the core, with its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    /// Milliseconds since the Unix epoch.
    pub expiry: i64,
    /// Milliseconds since the Unix epoch.
    pub created_time: i64,
}

/// The outcome of a successful session creation or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionTokens {
    pub session: CoreSession,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest<'a> {
    #[serde(skip)]
    pub tenant_id: &'a str,
    #[serde(rename = "userId")]
    pub recipe_user_id: &'a str,
    #[serde(rename = "userDataInJWT")]
    pub access_token_payload: &'a Payload,
    #[serde(rename = "userDataInDatabase")]
    pub session_data_in_database: &'a Value,
    pub use_dynamic_signing_key: bool,
    pub enable_anti_csrf: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionRequest<'a> {
    pub access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<&'a str>,
    pub do_anti_csrf_check: bool,
    pub enable_anti_csrf: bool,
    pub check_database: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum VerifyOutcome {
    #[serde(rename = "OK", rename_all = "camelCase")]
    Ok {
        session: CoreSession,
        /// Set when the core decided the client should switch to a fresh access token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<IssuedToken>,
    },
    #[serde(rename = "UNAUTHORISED")]
    Unauthorised {
        #[serde(default)]
        message: String,
    },
    #[serde(rename = "TRY_REFRESH_TOKEN")]
    TryRefreshToken {
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionRequest<'a> {
    pub refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<&'a str>,
    pub enable_anti_csrf: bool,
    pub use_dynamic_signing_key: bool,
}

/// Who the core believes is behind a reused refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TheftDetails {
    pub handle: String,
    pub user_id: String,
    #[serde(default)]
    pub recipe_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RefreshOutcome {
    #[serde(rename = "OK")]
    Ok(NewSessionTokens),
    #[serde(rename = "UNAUTHORISED")]
    Unauthorised {
        #[serde(default)]
        message: String,
    },
    #[serde(rename = "TOKEN_THEFT_DETECTED")]
    TokenTheftDetected { session: TheftDetails },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RegenerateOutcome {
    #[serde(rename = "OK", rename_all = "camelCase")]
    Ok {
        session: CoreSession,
        /// Legacy sessions are updated in place and don't get a new token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<IssuedToken>,
    },
    #[serde(rename = "UNAUTHORISED")]
    Unauthorised {
        #[serde(default)]
        message: String,
    },
}

/// Everything the core stores about a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInformation {
    pub session_handle: String,
    pub user_id: String,
    pub recipe_user_id: String,
    pub tenant_id: String,
    pub session_data_in_database: Value,
    pub custom_claims_in_access_token_payload: Payload,
    /// Milliseconds since the Unix epoch.
    pub expiry: i64,
    /// Milliseconds since the Unix epoch.
    pub time_created: i64,
}
