use std::sync::Arc;

use super::config::AntiCsrfMode;
use super::container::SessionContainer;
use super::errors::SessionError;
use super::functions::VerifyInput;
use super::recipe::{SessionRecipe, request_info};
use super::transfer::{self, ANTI_CSRF_HEADER, RID_HEADER, TokenKind, TransferMethod};
use crate::claims::{SessionClaimValidator, ValidationMode};
use crate::context::UserContext;
use crate::framework::{BaseRequest, BaseResponse};

/// Tune how [`SessionRecipe::get_session`] verifies the incoming session.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct VerifySessionOptions {
    /// If `false`, a request without session tokens yields `Ok(None)` instead of an error.
    ///
    /// By default, it's set to `true`.
    pub session_required: bool,
    /// Whether to enforce CSRF protection for cookie-based sessions.
    ///
    /// If unset, it's enforced for every method other than `GET`.
    pub anti_csrf_check: Option<bool>,
    /// Ask the core whether the session still exists, instead of trusting a valid signature.
    ///
    /// By default, it's set to `false`.
    pub check_database: bool,
    /// The validators to run on the session.
    ///
    /// If unset, the global validators are used.
    pub claim_validators: Option<Vec<Arc<dyn SessionClaimValidator>>>,
    pub validation_mode: ValidationMode,
}

impl Default for VerifySessionOptions {
    fn default() -> Self {
        Self {
            session_required: true,
            anti_csrf_check: None,
            check_database: false,
            claim_validators: None,
            validation_mode: ValidationMode::default(),
        }
    }
}

impl VerifySessionOptions {
    pub fn optional() -> Self {
        Self {
            session_required: false,
            ..Self::default()
        }
    }

    pub fn anti_csrf_check(mut self, check: bool) -> Self {
        self.anti_csrf_check = Some(check);
        self
    }

    pub fn check_database(mut self) -> Self {
        self.check_database = true;
        self
    }

    /// Replace the global validators with `validators`.
    pub fn claim_validators(mut self, validators: Vec<Arc<dyn SessionClaimValidator>>) -> Self {
        self.claim_validators = Some(validators);
        self
    }

    pub fn validation_mode(mut self, mode: ValidationMode) -> Self {
        self.validation_mode = mode;
        self
    }
}

impl SessionRecipe {
    /// Verify the session carried by `req`.
    ///
    /// - Tokens are looked up in the `Authorization` header first, then in cookies.
    /// - If the core issues a new access token during verification, it's written to `res`.
    /// - Claim validators run before the session is returned: a session that fails them
    ///   is rejected with [`SessionError::InvalidClaims`].
    #[tracing::instrument(name = "Get session", skip_all, fields(session.handle, transfer_method))]
    pub async fn get_session<'a>(
        &'a self,
        req: &dyn BaseRequest,
        res: &'a mut dyn BaseResponse,
        options: VerifySessionOptions,
        ctx: &UserContext,
    ) -> Result<Option<SessionContainer<'a>>, SessionError> {
        let ctx = ctx.with_request_if_missing(|| request_info(req));
        let Some((access_token, method)) = transfer::find_token(req, TokenKind::Access, self.config.token_transfer) else {
            if options.session_required {
                return Err(SessionError::unauthorised_keep_tokens(
                    "Session does not exist. Are you sending the session tokens in the request with the appropriate token transfer method?",
                ));
            }
            tracing::trace!("No session tokens in the request, the session is optional");
            return Ok(None);
        };
        tracing::Span::current().record("transfer_method", method.as_str());

        let anti_csrf_check = options
            .anti_csrf_check
            .unwrap_or(*req.method() != http::Method::GET)
            && method == TransferMethod::Cookie;
        if anti_csrf_check
            && self.config.anti_csrf == AntiCsrfMode::ViaCustomHeader
            && req.header(RID_HEADER).is_none()
        {
            return Err(SessionError::unauthorised_keep_tokens(
                "anti-csrf check failed. Please pass the 'rid' header in the request, or disable the anti-csrf check",
            ));
        }

        let verified = self
            .functions
            .verify_access_token(
                VerifyInput {
                    access_token: &access_token,
                    anti_csrf_token: req.header(ANTI_CSRF_HEADER),
                    do_anti_csrf_check: anti_csrf_check,
                    check_database: options.check_database,
                },
                &ctx,
            )
            .await?;
        tracing::Span::current().record("session.handle", verified.info.session_handle.as_str());

        if verified.new_access_token.is_some() {
            transfer::set_access_token(
                res,
                &self.config,
                &verified.access_token,
                &verified.info.user_id,
                verified.info.expiry_ms,
                &verified.info.payload,
                method,
            );
        }
        let session = SessionContainer::new(
            self,
            Some(res),
            verified.access_token,
            verified.info,
            None,
            None,
            Some(method),
            ctx,
        );
        self.validate_new_session(session, options).await.map(Some)
    }

    /// Verify an access token obtained without going through a request.
    ///
    /// `None` for the token is treated as a request without session tokens.
    pub async fn get_session_without_request_response(
        &self,
        access_token: Option<&str>,
        anti_csrf_token: Option<&str>,
        options: VerifySessionOptions,
        ctx: &UserContext,
    ) -> Result<Option<SessionContainer<'_>>, SessionError> {
        let Some(access_token) = access_token else {
            if options.session_required {
                return Err(SessionError::unauthorised_keep_tokens(
                    "Session does not exist. Are you passing the access token?",
                ));
            }
            return Ok(None);
        };
        let verified = self
            .functions
            .verify_access_token(
                VerifyInput {
                    access_token,
                    anti_csrf_token,
                    do_anti_csrf_check: options.anti_csrf_check.unwrap_or(false),
                    check_database: options.check_database,
                },
                ctx,
            )
            .await?;
        let session = SessionContainer::new(
            self,
            None,
            verified.access_token,
            verified.info,
            None,
            None,
            None,
            ctx.clone(),
        );
        self.validate_new_session(session, options).await.map(Some)
    }

    async fn validate_new_session<'a>(
        &'a self,
        mut session: SessionContainer<'a>,
        options: VerifySessionOptions,
    ) -> Result<SessionContainer<'a>, SessionError> {
        let validators = match options.claim_validators {
            Some(validators) => validators,
            None => self.functions.get_global_claim_validators(
                self.claims.default_validators(),
                session.tenant_id(),
                session.user_id(),
                session.user_context(),
            ),
        };
        if !validators.is_empty() {
            session
                .assert_claims(&validators, options.validation_mode)
                .await?;
        }
        Ok(session)
    }
}
