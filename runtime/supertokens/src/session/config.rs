//! Types related to [`SessionConfig`].
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::transfer::TransferMethod;
use crate::app::errors::ConfigError;
use crate::app::info::NormalizedAppInfo;
use crate::framework::SameSite;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how sessions are issued, transported and verified.
///
/// Every field has a sensible default: unset fields are derived from your [`AppInfo`](crate::AppInfo)
/// when the application is built.
pub struct SessionConfig {
    #[serde(default)]
    pub cookie: SessionCookieConfig,
    /// How to protect cookie-based sessions against cross-site request forgery.
    ///
    /// If unset, it defaults to [`AntiCsrfMode::ViaCustomHeader`] when cookies are sent
    /// cross-site (`SameSite=None`), and to [`AntiCsrfMode::None`] otherwise.
    #[serde(default)]
    pub anti_csrf: Option<AntiCsrfMode>,
    /// Which transfer methods are accepted for new sessions.
    #[serde(default)]
    pub token_transfer: TokenTransferPreference,
    /// Also send the access token as a response header in cookie-based mode,
    /// so that frontend code can read it.
    #[serde(default)]
    pub expose_access_token_to_frontend_in_cookie_based_auth: bool,
    /// Sign access tokens with keys that are rotated by the core.
    ///
    /// By default, it's set to `true`.
    #[serde(default = "default_true")]
    pub use_dynamic_access_token_signing_key: bool,
    /// The status code used for `UNAUTHORISED`, `TRY_REFRESH_TOKEN` and `TOKEN_THEFT_DETECTED` responses.
    ///
    /// By default, it's set to `401`.
    #[serde(default = "default_session_expired_status_code")]
    pub session_expired_status_code: u16,
    /// The status code used when claim validation fails.
    ///
    /// By default, it's set to `403`.
    #[serde(default = "default_invalid_claim_status_code")]
    pub invalid_claim_status_code: u16,
    #[serde(default)]
    pub jwks: JwksConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie: SessionCookieConfig::default(),
            anti_csrf: None,
            token_transfer: TokenTransferPreference::default(),
            expose_access_token_to_frontend_in_cookie_based_auth: false,
            use_dynamic_access_token_signing_key: default_true(),
            session_expired_status_code: default_session_expired_status_code(),
            invalid_claim_status_code: default_invalid_claim_status_code(),
            jwks: JwksConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_session_expired_status_code() -> u16 {
    401
}

fn default_invalid_claim_status_code() -> u16 {
    403
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the cookies used to store session tokens on the client-side.
pub struct SessionCookieConfig {
    /// Set the `Domain` attribute on session cookies.
    ///
    /// By default, the attribute is not set.
    #[serde(default)]
    pub domain: Option<String>,
    /// Set the `Secure` attribute on session cookies.
    ///
    /// If unset, cookies are marked as `Secure` when the API is served over HTTPS.
    #[serde(default)]
    pub secure: Option<bool>,
    /// Set the `SameSite` attribute on session cookies.
    ///
    /// If unset, it's `Lax` when the API and the website are on the same site, `None` otherwise.
    #[serde(default)]
    pub same_site: Option<SameSite>,
    /// The `Path` attribute of the access token cookie.
    ///
    /// By default, it's set to `/`.
    #[serde(default = "default_access_token_path")]
    pub access_token_path: String,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            domain: None,
            secure: None,
            same_site: None,
            access_token_path: default_access_token_path(),
        }
    }
}

fn default_access_token_path() -> String {
    "/".to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiCsrfMode {
    /// An anti-CSRF token is issued with the session and must be echoed back
    /// in the `anti-csrf` request header.
    ViaToken,
    /// Requests must carry a custom `rid` header, which browsers won't attach
    /// to cross-site form submissions.
    ViaCustomHeader,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTransferPreference {
    /// Let the client choose via the `st-auth-mode` request header.
    ///
    /// Cookies are used if the client doesn't express a preference.
    #[default]
    Any,
    Cookie,
    Header,
}

impl TokenTransferPreference {
    /// Whether tokens sent with `method` are read from requests.
    pub fn allows(&self, method: TransferMethod) -> bool {
        match self {
            TokenTransferPreference::Any => true,
            TokenTransferPreference::Cookie => method == TransferMethod::Cookie,
            TokenTransferPreference::Header => method == TransferMethod::Header,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the cache of the public keys used to verify access tokens.
pub struct JwksConfig {
    /// How long a fetched key set is trusted before asking the core again.
    ///
    /// By default, it's set to 60 seconds.
    #[serde(default = "default_jwks_cache_max_age")]
    #[serde(with = "humantime_serde")]
    pub cache_max_age: Duration,
    /// The minimum time between two fetches caused by access tokens signed with an unknown key.
    ///
    /// By default, it's set to 500 milliseconds.
    #[serde(default = "default_jwks_refetch_cooldown")]
    #[serde(with = "humantime_serde")]
    pub refetch_cooldown: Duration,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            cache_max_age: default_jwks_cache_max_age(),
            refetch_cooldown: default_jwks_refetch_cooldown(),
        }
    }
}

fn default_jwks_cache_max_age() -> Duration {
    Duration::from_secs(60)
}

fn default_jwks_refetch_cooldown() -> Duration {
    Duration::from_millis(500)
}

/// [`SessionConfig`] after all defaults have been derived from the application setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSessionConfig {
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub access_token_path: String,
    /// The path of the refresh route. The refresh token cookie is scoped to it.
    pub refresh_token_path: String,
    pub anti_csrf: AntiCsrfMode,
    pub token_transfer: TokenTransferPreference,
    pub expose_access_token_to_frontend_in_cookie_based_auth: bool,
    pub use_dynamic_access_token_signing_key: bool,
    pub session_expired_status_code: StatusCode,
    pub invalid_claim_status_code: StatusCode,
    pub jwks_cache_max_age: Duration,
    pub jwks_refetch_cooldown: Duration,
}

impl SessionConfig {
    pub(crate) fn resolve(&self, app: &NormalizedAppInfo) -> Result<ResolvedSessionConfig, ConfigError> {
        let cookie_same_site = self.cookie.same_site.unwrap_or(if app.is_same_site() {
            SameSite::Lax
        } else {
            SameSite::None
        });
        let cookie_secure = self.cookie.secure.unwrap_or_else(|| app.api.is_https());
        if cookie_same_site == SameSite::None && !cookie_secure {
            return Err(ConfigError::InsecureCrossSiteCookies);
        }
        let anti_csrf = self.anti_csrf.unwrap_or(if cookie_same_site == SameSite::None {
            AntiCsrfMode::ViaCustomHeader
        } else {
            AntiCsrfMode::None
        });
        Ok(ResolvedSessionConfig {
            cookie_domain: self.cookie.domain.clone(),
            cookie_secure,
            cookie_same_site,
            access_token_path: self.cookie.access_token_path.clone(),
            refresh_token_path: format!("{}/session/refresh", app.api_base_path),
            anti_csrf,
            token_transfer: self.token_transfer,
            expose_access_token_to_frontend_in_cookie_based_auth: self
                .expose_access_token_to_frontend_in_cookie_based_auth,
            use_dynamic_access_token_signing_key: self.use_dynamic_access_token_signing_key,
            session_expired_status_code: status_code(
                "session_expired_status_code",
                self.session_expired_status_code,
            )?,
            invalid_claim_status_code: status_code(
                "invalid_claim_status_code",
                self.invalid_claim_status_code,
            )?,
            jwks_cache_max_age: self.jwks.cache_max_age,
            jwks_refetch_cooldown: self.jwks.refetch_cooldown,
        })
    }
}

fn status_code(field: &'static str, code: u16) -> Result<StatusCode, ConfigError> {
    StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatusCode { field, code })
}
