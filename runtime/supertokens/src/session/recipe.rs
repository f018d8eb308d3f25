use std::sync::Arc;

use serde_json::{Value, json};

use super::config::ResolvedSessionConfig;
use super::container::SessionContainer;
use super::errors::SessionError;
use super::functions::{CreateSessionInput, SessionFunctions, ValidateClaimsInput};
use super::token;
use super::transfer::{self, TokenKind, TransferMethod};
use crate::Payload;
use crate::claims::{
    ClaimFetchInput, ClaimRegistry, ClaimValidationFailure, SessionClaim, SessionClaimValidator,
    TypedClaim, ValidationMode, now_ms,
};
use crate::context::{RequestInfo, UserContext};
use crate::core::{Core, NewSessionTokens, SessionInformation};
use crate::framework::{BaseRequest, BaseResponse, send_json};

/// The session recipe: issues, verifies, refreshes and revokes sessions.
///
/// You get one from [`SuperTokens::session`](crate::SuperTokens::session).
/// It's cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionRecipe {
    pub(super) functions: Arc<dyn SessionFunctions>,
    pub(super) config: Arc<ResolvedSessionConfig>,
    pub(super) claims: Arc<ClaimRegistry>,
    pub(super) core: Core,
}

impl SessionRecipe {
    pub(crate) fn new(
        functions: Arc<dyn SessionFunctions>,
        config: Arc<ResolvedSessionConfig>,
        claims: ClaimRegistry,
        core: Core,
    ) -> Self {
        Self {
            functions,
            config,
            claims: Arc::new(claims),
            core,
        }
    }

    /// The (possibly overridden) functions behind every session flow.
    pub fn functions(&self) -> &dyn SessionFunctions {
        self.functions.as_ref()
    }

    pub fn config(&self) -> &ResolvedSessionConfig {
        &self.config
    }

    /// The claims registered by every recipe of the application.
    pub fn claims(&self) -> &ClaimRegistry {
        &self.claims
    }

    pub(super) fn fetch_input(
        &self,
        user_id: &str,
        recipe_user_id: &str,
        tenant_id: &str,
        payload: &Payload,
        ctx: &UserContext,
    ) -> ClaimFetchInput {
        ClaimFetchInput {
            user_id: user_id.to_owned(),
            recipe_user_id: recipe_user_id.to_owned(),
            tenant_id: tenant_id.to_owned(),
            current_payload: payload.clone(),
            core: self.core.clone(),
            user_context: ctx.clone(),
        }
    }

    /// Create a new session for `recipe_user_id` and attach its tokens to `res`.
    ///
    /// Every registered claim is fetched and added to the payload.
    /// Protected keys in `access_token_payload` are ignored.
    #[tracing::instrument(name = "Create new session", skip_all, fields(tenant.id = tenant_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn create_new_session<'a>(
        &'a self,
        req: &dyn BaseRequest,
        res: &'a mut dyn BaseResponse,
        tenant_id: &str,
        recipe_user_id: &str,
        access_token_payload: Payload,
        session_data_in_database: Value,
        ctx: &UserContext,
    ) -> Result<SessionContainer<'a>, SessionError> {
        let ctx = ctx.with_request_if_missing(|| request_info(req));
        let method = transfer::method_for_new_session(req, self.config.token_transfer);
        let tokens = self
            .issue_session(
                tenant_id,
                recipe_user_id,
                access_token_payload,
                session_data_in_database,
                method == TransferMethod::Header,
                &ctx,
            )
            .await?;
        let mut session = SessionContainer::from_new_tokens(self, tokens, Some(method), ctx)?;
        session.attach_to_response(res, method);
        transfer::clear_other_methods(req, res, &self.config, method);
        Ok(session.with_response(res))
    }

    /// Create a new session without touching any request or response.
    ///
    /// Use [`SessionContainer::attach_to_response`] or
    /// [`SessionContainer::get_all_session_tokens_dangerously`] to hand the tokens to the client.
    pub async fn create_new_session_without_request_response(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        access_token_payload: Payload,
        session_data_in_database: Value,
        disable_anti_csrf: bool,
        ctx: &UserContext,
    ) -> Result<SessionContainer<'_>, SessionError> {
        let tokens = self
            .issue_session(
                tenant_id,
                recipe_user_id,
                access_token_payload,
                session_data_in_database,
                disable_anti_csrf,
                ctx,
            )
            .await?;
        SessionContainer::from_new_tokens(self, tokens, None, ctx.clone())
    }

    async fn issue_session(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        mut payload: Payload,
        session_data_in_database: Value,
        disable_anti_csrf: bool,
        ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        token::strip_protected(&mut payload);
        let input = self.fetch_input(recipe_user_id, recipe_user_id, tenant_id, &payload, ctx);
        let now = now_ms();
        for claim in self.claims.claims() {
            let update = claim
                .build(&input, now)
                .await
                .map_err(SessionError::General)?;
            payload.extend(update);
        }
        self.functions
            .create_new_session(
                CreateSessionInput {
                    tenant_id: tenant_id.to_owned(),
                    recipe_user_id: recipe_user_id.to_owned(),
                    access_token_payload: payload,
                    session_data_in_database,
                    disable_anti_csrf,
                },
                ctx,
            )
            .await
    }

    /// Revoke a session by handle.
    ///
    /// Returns `false` if the session didn't exist, e.g. because it was already revoked.
    pub async fn revoke_session(&self, handle: &str, ctx: &UserContext) -> Result<bool, SessionError> {
        self.functions.revoke_session(handle, ctx).await
    }

    /// Revoke every session of a user. If `tenant_id` is `None`, across all tenants.
    pub async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        ctx: &UserContext,
    ) -> Result<Vec<String>, SessionError> {
        self.functions
            .revoke_all_sessions_for_user(user_id, tenant_id, ctx)
            .await
    }

    pub async fn get_all_session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        ctx: &UserContext,
    ) -> Result<Vec<String>, SessionError> {
        self.functions
            .get_all_session_handles_for_user(user_id, tenant_id, ctx)
            .await
    }

    pub async fn get_session_information(
        &self,
        handle: &str,
        ctx: &UserContext,
    ) -> Result<Option<SessionInformation>, SessionError> {
        self.functions.get_session_information(handle, ctx).await
    }

    pub async fn update_session_data_in_database(
        &self,
        handle: &str,
        data: &Value,
        ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        self.functions
            .update_session_data_in_database(handle, data, ctx)
            .await
    }

    /// Merge `update` into the payload of the session's next access tokens.
    ///
    /// Tokens that were already issued are not affected.
    /// Returns `false` if the session doesn't exist.
    pub async fn merge_into_access_token_payload(
        &self,
        handle: &str,
        update: &Payload,
        ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        self.functions
            .merge_into_access_token_payload(handle, update, ctx)
            .await
    }

    /// Read a claim value for a session, by handle.
    ///
    /// Returns `None` if the session doesn't exist or the claim is not set.
    pub async fn get_claim_value<C>(
        &self,
        handle: &str,
        claim: &C,
        ctx: &UserContext,
    ) -> Result<Option<C::Value>, SessionError>
    where
        C: TypedClaim + ?Sized,
    {
        let Some(info) = self.get_session_information(handle, ctx).await? else {
            return Ok(None);
        };
        decode_claim_value(claim, &info.custom_claims_in_access_token_payload)
    }

    /// Set a claim value for a session, by handle.
    ///
    /// Returns `false` if the session doesn't exist.
    pub async fn set_claim_value<C>(
        &self,
        handle: &str,
        claim: &C,
        value: C::Value,
        ctx: &UserContext,
    ) -> Result<bool, SessionError>
    where
        C: TypedClaim + ?Sized,
    {
        let update = claim_update(claim, value)?;
        self.merge_into_access_token_payload(handle, &update, ctx).await
    }

    /// Remove a claim from a session, by handle.
    pub async fn remove_claim<C>(
        &self,
        handle: &str,
        claim: &C,
        ctx: &UserContext,
    ) -> Result<bool, SessionError>
    where
        C: SessionClaim + ?Sized,
    {
        let mut update = Payload::new();
        claim.remove_from_payload_by_merge(&mut update);
        self.merge_into_access_token_payload(handle, &update, ctx).await
    }

    /// Re-fetch a claim and store its value in the session, by handle.
    pub async fn fetch_and_set_claim<C>(
        &self,
        handle: &str,
        claim: &C,
        ctx: &UserContext,
    ) -> Result<bool, SessionError>
    where
        C: SessionClaim + ?Sized,
    {
        let Some(info) = self.get_session_information(handle, ctx).await? else {
            return Ok(false);
        };
        let input = self.fetch_input(
            &info.user_id,
            &info.recipe_user_id,
            &info.tenant_id,
            &info.custom_claims_in_access_token_payload,
            ctx,
        );
        let update = claim
            .build(&input, now_ms())
            .await
            .map_err(SessionError::General)?;
        self.merge_into_access_token_payload(handle, &update, ctx).await
    }

    /// Validate the claims of a session, by handle.
    ///
    /// If `validators` is `None`, the global validators are used.
    /// Values re-fetched during validation are persisted.
    /// Returns `None` if the session doesn't exist, the failures otherwise (empty if valid).
    pub async fn validate_claims_for_session_handle(
        &self,
        handle: &str,
        validators: Option<&[Arc<dyn SessionClaimValidator>]>,
        mode: ValidationMode,
        ctx: &UserContext,
    ) -> Result<Option<Vec<ClaimValidationFailure>>, SessionError> {
        let Some(info) = self.get_session_information(handle, ctx).await? else {
            return Ok(None);
        };
        let global;
        let validators = match validators {
            Some(validators) => validators,
            None => {
                global = self.functions.get_global_claim_validators(
                    self.claims.default_validators(),
                    &info.tenant_id,
                    &info.user_id,
                    ctx,
                );
                &global
            }
        };
        let validation = self
            .functions
            .validate_claims(
                ValidateClaimsInput {
                    user_id: &info.user_id,
                    recipe_user_id: &info.recipe_user_id,
                    tenant_id: &info.tenant_id,
                    payload: &info.custom_claims_in_access_token_payload,
                    validators,
                    mode,
                },
                ctx,
            )
            .await?;
        if !validation.payload_update.is_empty()
            && !self
                .merge_into_access_token_payload(handle, &validation.payload_update, ctx)
                .await?
        {
            return Ok(None);
        }
        Ok(Some(validation.failures))
    }

    /// Render the protocol-level session errors as responses the frontend SDKs understand.
    ///
    /// `UNAUTHORISED`, `TRY_REFRESH_TOKEN` and `TOKEN_THEFT_DETECTED` use the session expired
    /// status code, `INVALID_CLAIMS` uses the invalid claim status code.
    /// Any other error is handed back to the caller.
    #[tracing::instrument(name = "Handle session error", level = tracing::Level::DEBUG, skip_all, fields(error.kind = err.kind()))]
    pub fn handle_error(
        &self,
        req: &dyn BaseRequest,
        res: &mut dyn BaseResponse,
        err: SessionError,
    ) -> Result<(), SessionError> {
        let (status, body, clear) = match &err {
            SessionError::Unauthorised { clear_tokens, .. } => (
                self.config.session_expired_status_code,
                json!({ "message": "unauthorised" }),
                *clear_tokens,
            ),
            SessionError::TryRefreshToken { .. } => (
                self.config.session_expired_status_code,
                json!({ "message": "try refresh token" }),
                false,
            ),
            SessionError::TokenTheftDetected { .. } => (
                self.config.session_expired_status_code,
                json!({ "message": "token theft detected" }),
                true,
            ),
            SessionError::InvalidClaims { failures } => (
                self.config.invalid_claim_status_code,
                json!({ "message": "invalid claim", "claimValidationErrors": failures }),
                false,
            ),
            _ => return Err(err),
        };
        if clear {
            self.clear_session_from_request(req, res);
        }
        if res.is_writable() {
            res.set_status_code(status);
        }
        send_json(res, &body)
    }

    /// Clear the tokens of every transfer method the request used.
    pub(super) fn clear_session_from_request(&self, req: &dyn BaseRequest, res: &mut dyn BaseResponse) {
        for method in TransferMethod::ALL {
            if !self.config.token_transfer.allows(method) {
                continue;
            }
            let has_tokens = transfer::read_token(req, TokenKind::Access, method).is_some()
                || transfer::read_token(req, TokenKind::Refresh, method).is_some();
            if has_tokens {
                transfer::clear_session(res, &self.config, method);
            }
        }
    }
}

pub(super) fn request_info(req: &dyn BaseRequest) -> RequestInfo {
    RequestInfo {
        method: req.method().clone(),
        original_url: req.original_url().to_owned(),
    }
}

pub(super) fn decode_claim_value<C>(claim: &C, payload: &Payload) -> Result<Option<C::Value>, SessionError>
where
    C: TypedClaim + ?Sized,
{
    claim
        .get_value_from_payload(payload)
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| {
            SessionError::General(
                anyhow::Error::from(e)
                    .context(format!("The value of the `{}` claim has an unexpected shape", claim.key())),
            )
        })
}

pub(super) fn claim_update<C>(claim: &C, value: C::Value) -> Result<Payload, SessionError>
where
    C: TypedClaim + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|e| SessionError::General(e.into()))?;
    let mut update = Payload::new();
    claim.add_to_payload(&mut update, value, now_ms());
    Ok(update)
}
