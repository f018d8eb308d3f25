//! Refresh token rotation and theft detection.
//!
//! Every refresh consumes the presented refresh token and issues a new pair.
//! The core keeps track of rotated-out tokens: presenting one of them again means that two
//! parties hold the same session, so the core reports `TOKEN_THEFT_DETECTED` and the session
//! is revoked.
use tracing_log_error::log_error;

use super::config::AntiCsrfMode;
use super::container::SessionContainer;
use super::errors::{SessionError, TheftCleanup};
use super::functions::RefreshInput;
use super::recipe::{SessionRecipe, request_info};
use super::transfer::{self, ANTI_CSRF_HEADER, RID_HEADER, TokenKind, TransferMethod};
use crate::context::UserContext;
use crate::core::NewSessionTokens;
use crate::framework::{BaseRequest, BaseResponse};

impl SessionRecipe {
    /// Rotate the refresh token carried by `req` and attach the new tokens to `res`.
    ///
    /// The new tokens use the transfer method the refresh token arrived with;
    /// tokens sent with the other method are cleared.
    ///
    /// On token theft the session is revoked (best-effort) and the tokens are cleared.
    /// The outcome of the revocation is reported in [`SessionError::TokenTheftDetected`].
    #[tracing::instrument(name = "Refresh session", skip_all, fields(session.handle, transfer_method))]
    pub async fn refresh_session<'a>(
        &'a self,
        req: &dyn BaseRequest,
        res: &'a mut dyn BaseResponse,
        ctx: &UserContext,
    ) -> Result<SessionContainer<'a>, SessionError> {
        let ctx = ctx.with_request_if_missing(|| request_info(req));
        let Some((refresh_token, method)) = transfer::find_token(req, TokenKind::Refresh, self.config.token_transfer) else {
            return Err(SessionError::unauthorised_keep_tokens(
                "Refresh token not found. Are you sending the refresh token in the request?",
            ));
        };
        tracing::Span::current().record("transfer_method", method.as_str());
        if method == TransferMethod::Cookie
            && self.config.anti_csrf == AntiCsrfMode::ViaCustomHeader
            && req.header(RID_HEADER).is_none()
        {
            return Err(SessionError::unauthorised_keep_tokens(
                "anti-csrf check failed. Please pass the 'rid' header in the request.",
            ));
        }

        let outcome = self
            .rotate(
                &refresh_token,
                req.header(ANTI_CSRF_HEADER),
                method == TransferMethod::Header,
                &ctx,
            )
            .await;
        match outcome {
            Ok(tokens) => {
                tracing::Span::current().record("session.handle", tokens.session.handle.as_str());
                let mut session =
                    SessionContainer::from_new_tokens(self, tokens, Some(method), ctx)?;
                session.attach_to_response(res, method);
                transfer::clear_other_methods(req, res, &self.config, method);
                Ok(session.with_response(res))
            }
            Err(e) => {
                let clear = match &e {
                    SessionError::Unauthorised { clear_tokens, .. } => *clear_tokens,
                    SessionError::TokenTheftDetected { .. } => true,
                    _ => false,
                };
                if clear {
                    transfer::clear_session(res, &self.config, method);
                }
                Err(e)
            }
        }
    }

    /// Rotate a refresh token obtained without going through a request.
    pub async fn refresh_session_without_request_response(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
        disable_anti_csrf: bool,
        ctx: &UserContext,
    ) -> Result<SessionContainer<'_>, SessionError> {
        let tokens = self
            .rotate(refresh_token, anti_csrf_token, disable_anti_csrf, ctx)
            .await?;
        SessionContainer::from_new_tokens(self, tokens, None, ctx.clone())
    }

    async fn rotate(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<&str>,
        disable_anti_csrf: bool,
        ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        let outcome = self
            .functions
            .refresh_session(
                RefreshInput {
                    refresh_token,
                    anti_csrf_token,
                    disable_anti_csrf,
                },
                ctx,
            )
            .await;
        match outcome {
            Err(SessionError::TokenTheftDetected {
                session_handle,
                user_id,
                recipe_user_id,
                ..
            }) => {
                tracing::warn!(
                    session.handle = %session_handle,
                    user.id = %user_id,
                    "A rotated-out refresh token was used again, revoking the session"
                );
                let cleanup = match self.functions.revoke_session(&session_handle, ctx).await {
                    Ok(_) => TheftCleanup::Revoked,
                    Err(e) => {
                        log_error!(
                            e,
                            session.handle = %session_handle,
                            "Failed to revoke a session after detecting token theft"
                        );
                        TheftCleanup::Failed
                    }
                };
                Err(SessionError::TokenTheftDetected {
                    session_handle,
                    user_id,
                    recipe_user_id,
                    cleanup,
                })
            }
            other => other,
        }
    }
}
