//! How session tokens travel between the client and the API.
//!
//! Tokens are carried either in cookies or in headers:
//!
//! | | Cookie mode | Header mode |
//! |---|---|---|
//! | Access token, request | `sAccessToken` cookie | `Authorization: Bearer <token>` |
//! | Refresh token, request | `sRefreshToken` cookie, scoped to the refresh route | `Authorization: Bearer <token>` on the refresh route |
//! | Access token, response | `sAccessToken` cookie | `st-access-token` header |
//! | Refresh token, response | `sRefreshToken` cookie | `st-refresh-token` header |
//!
//! In both modes the `front-token` header exposes the session summary to frontend code.
use serde::{Deserialize, Serialize};

use super::config::{ResolvedSessionConfig, TokenTransferPreference};
use super::token::encode_front_token;
use crate::Payload;
use crate::framework::{BaseRequest, BaseResponse, OutgoingCookie};

pub const ACCESS_TOKEN_COOKIE: &str = "sAccessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "sRefreshToken";
pub const ACCESS_TOKEN_HEADER: &str = "st-access-token";
pub const REFRESH_TOKEN_HEADER: &str = "st-refresh-token";
pub const FRONT_TOKEN_HEADER: &str = "front-token";
pub const ANTI_CSRF_HEADER: &str = "anti-csrf";
pub const AUTH_MODE_HEADER: &str = "st-auth-mode";
pub const RID_HEADER: &str = "rid";
const EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

/// Access token cookies outlive the token itself: the frontend needs the expired token
/// to know a refresh is needed.
const ACCESS_TOKEN_COOKIE_LIFETIME_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Cookie,
    Header,
}

impl TransferMethod {
    pub const ALL: [TransferMethod; 2] = [TransferMethod::Header, TransferMethod::Cookie];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMethod::Cookie => "cookie",
            TransferMethod::Header => "header",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn cookie_name(&self) -> &'static str {
        match self {
            TokenKind::Access => ACCESS_TOKEN_COOKIE,
            TokenKind::Refresh => REFRESH_TOKEN_COOKIE,
        }
    }

    fn header_name(&self) -> &'static str {
        match self {
            TokenKind::Access => ACCESS_TOKEN_HEADER,
            TokenKind::Refresh => REFRESH_TOKEN_HEADER,
        }
    }

    fn cookie_path<'a>(&self, config: &'a ResolvedSessionConfig) -> &'a str {
        match self {
            TokenKind::Access => &config.access_token_path,
            TokenKind::Refresh => &config.refresh_token_path,
        }
    }
}

/// Read a token sent with the given transfer method.
pub fn read_token(req: &dyn BaseRequest, kind: TokenKind, method: TransferMethod) -> Option<String> {
    match method {
        TransferMethod::Cookie => req
            .cookie(kind.cookie_name())
            .filter(|v| !v.is_empty())
            .map(str::to_owned),
        TransferMethod::Header => {
            let value = req.header("authorization")?.trim();
            let (scheme, token) = value.split_once(' ')?;
            if !scheme.eq_ignore_ascii_case("bearer") {
                return None;
            }
            let token = token.trim();
            (!token.is_empty()).then(|| token.to_owned())
        }
    }
}

/// Find a token in the request, looking at headers first.
///
/// Only the transfer methods allowed by `preference` are considered: with cookie-only
/// sessions an unrelated `Authorization` header is ignored.
pub fn find_token(
    req: &dyn BaseRequest,
    kind: TokenKind,
    preference: TokenTransferPreference,
) -> Option<(String, TransferMethod)> {
    TransferMethod::ALL
        .into_iter()
        .filter(|method| preference.allows(*method))
        .find_map(|method| read_token(req, kind, method).map(|token| (token, method)))
}

/// The transfer method the client asked for, via the `st-auth-mode` header.
pub fn requested_auth_mode(req: &dyn BaseRequest) -> Option<TransferMethod> {
    match req.header(AUTH_MODE_HEADER)?.trim() {
        "cookie" => Some(TransferMethod::Cookie),
        "header" => Some(TransferMethod::Header),
        _ => None,
    }
}

/// The transfer method for a brand new session.
pub fn method_for_new_session(
    req: &dyn BaseRequest,
    preference: TokenTransferPreference,
) -> TransferMethod {
    match preference {
        TokenTransferPreference::Cookie => TransferMethod::Cookie,
        TokenTransferPreference::Header => TransferMethod::Header,
        TokenTransferPreference::Any => {
            requested_auth_mode(req).unwrap_or(TransferMethod::Cookie)
        }
    }
}

fn expose_header(res: &mut dyn BaseResponse, name: &str) {
    res.set_header(EXPOSE_HEADERS, name, true);
}

pub fn set_token(
    res: &mut dyn BaseResponse,
    config: &ResolvedSessionConfig,
    kind: TokenKind,
    token: &str,
    expires_at_ms: i64,
    method: TransferMethod,
) {
    if !res.is_writable() {
        return;
    }
    match method {
        TransferMethod::Cookie => res.set_cookie(cookie(config, kind, token, expires_at_ms)),
        TransferMethod::Header => {
            res.set_header(kind.header_name(), token, false);
            expose_header(res, kind.header_name());
        }
    }
}

/// Set the access token, its front token and, in cookie mode, the optional exposed header.
pub fn set_access_token(
    res: &mut dyn BaseResponse,
    config: &ResolvedSessionConfig,
    token: &str,
    user_id: &str,
    expiry_ms: i64,
    payload: &Payload,
    method: TransferMethod,
) {
    if !res.is_writable() {
        return;
    }
    set_front_token(res, user_id, expiry_ms, payload);
    let cookie_expiry = crate::claims::now_ms().saturating_add(ACCESS_TOKEN_COOKIE_LIFETIME_MS);
    set_token(res, config, TokenKind::Access, token, cookie_expiry, method);
    if method == TransferMethod::Cookie && config.expose_access_token_to_frontend_in_cookie_based_auth {
        set_token(res, config, TokenKind::Access, token, cookie_expiry, TransferMethod::Header);
    }
}

pub fn set_front_token(res: &mut dyn BaseResponse, user_id: &str, expiry_ms: i64, payload: &Payload) {
    if !res.is_writable() {
        return;
    }
    res.set_header(
        FRONT_TOKEN_HEADER,
        &encode_front_token(user_id, expiry_ms, payload),
        false,
    );
    expose_header(res, FRONT_TOKEN_HEADER);
}

pub fn set_anti_csrf_token(res: &mut dyn BaseResponse, token: &str) {
    if !res.is_writable() {
        return;
    }
    res.set_header(ANTI_CSRF_HEADER, token, false);
    expose_header(res, ANTI_CSRF_HEADER);
}

pub fn clear_token(
    res: &mut dyn BaseResponse,
    config: &ResolvedSessionConfig,
    kind: TokenKind,
    method: TransferMethod,
) {
    if !res.is_writable() {
        return;
    }
    match method {
        TransferMethod::Cookie => res.set_cookie(cookie(config, kind, "", 0)),
        TransferMethod::Header => {
            res.set_header(kind.header_name(), "", false);
            expose_header(res, kind.header_name());
        }
    }
}

/// Remove both tokens from the client and tell the frontend the session is gone.
pub fn clear_session(res: &mut dyn BaseResponse, config: &ResolvedSessionConfig, method: TransferMethod) {
    if !res.is_writable() {
        return;
    }
    tracing::debug!(transfer_method = method.as_str(), "Clearing session tokens");
    clear_token(res, config, TokenKind::Access, method);
    clear_token(res, config, TokenKind::Refresh, method);
    res.set_header(FRONT_TOKEN_HEADER, "remove", false);
    expose_header(res, FRONT_TOKEN_HEADER);
}

/// Clear the tokens of every transfer method other than `keep` that the request carried.
///
/// It avoids leaving the client with two competing sessions.
pub fn clear_other_methods(
    req: &dyn BaseRequest,
    res: &mut dyn BaseResponse,
    config: &ResolvedSessionConfig,
    keep: TransferMethod,
) {
    for method in TransferMethod::ALL {
        if method == keep || !config.token_transfer.allows(method) {
            continue;
        }
        let has_tokens = read_token(req, TokenKind::Access, method).is_some()
            || read_token(req, TokenKind::Refresh, method).is_some();
        if has_tokens {
            clear_token(res, config, TokenKind::Access, method);
            clear_token(res, config, TokenKind::Refresh, method);
        }
    }
}

fn cookie(config: &ResolvedSessionConfig, kind: TokenKind, value: &str, expires_at_ms: i64) -> OutgoingCookie {
    OutgoingCookie {
        name: kind.cookie_name().to_owned(),
        value: value.to_owned(),
        domain: config.cookie_domain.clone(),
        secure: config.cookie_secure,
        http_only: true,
        expires_at_ms,
        path: kind.cookie_path(config).to_owned(),
        same_site: config.cookie_same_site,
    }
}
