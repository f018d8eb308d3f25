use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::Value;

use super::errors::SessionError;
use super::functions::{ValidateClaimsInput, info_from_trusted_token, merge_payload};
use super::recipe::{SessionRecipe, claim_update, decode_claim_value};
use super::token::AccessTokenInfo;
use super::transfer::{self, TokenKind, TransferMethod};
use crate::Payload;
use crate::claims::{SessionClaim, SessionClaimValidator, TypedClaim, ValidationMode, now_ms};
use crate::context::UserContext;
use crate::core::{IssuedToken, NewSessionTokens, SessionInformation};
use crate::framework::BaseResponse;

/// A verified session, scoped to the request that carried it.
///
/// Mutations (e.g. [`set_claim_value`](Self::set_claim_value)) go through the core first:
/// the local state and the response are only updated if the core accepted the change.
/// When the container was obtained from a request, new tokens are written to the
/// response it borrows.
pub struct SessionContainer<'a> {
    recipe: &'a SessionRecipe,
    response: Option<&'a mut dyn BaseResponse>,
    access_token: String,
    info: AccessTokenInfo,
    refresh_token: Option<IssuedToken>,
    anti_csrf_token: Option<String>,
    transfer_method: Option<TransferMethod>,
    user_context: UserContext,
    revoked: bool,
}

/// Every token of a session, as it should be handed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub anti_csrf_token: Option<String>,
    pub front_token: String,
    /// `true` if the access token changed since the session was loaded.
    pub access_and_front_token_updated: bool,
}

impl Debug for SessionContainer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContainer")
            .field("session_handle", &self.info.session_handle)
            .field("user_id", &self.info.user_id)
            .field("tenant_id", &self.info.tenant_id)
            .field("transfer_method", &self.transfer_method)
            .field("has_response", &self.response.is_some())
            .field("revoked", &self.revoked)
            .finish_non_exhaustive()
    }
}

impl<'a> SessionContainer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        recipe: &'a SessionRecipe,
        response: Option<&'a mut dyn BaseResponse>,
        access_token: String,
        info: AccessTokenInfo,
        refresh_token: Option<IssuedToken>,
        anti_csrf_token: Option<String>,
        transfer_method: Option<TransferMethod>,
        user_context: UserContext,
    ) -> Self {
        Self {
            recipe,
            response,
            access_token,
            info,
            refresh_token,
            anti_csrf_token,
            transfer_method,
            user_context,
            revoked: false,
        }
    }

    pub(super) fn from_new_tokens(
        recipe: &'a SessionRecipe,
        tokens: NewSessionTokens,
        transfer_method: Option<TransferMethod>,
        user_context: UserContext,
    ) -> Result<Self, SessionError> {
        let info = info_from_trusted_token(&tokens.access_token.token)?;
        Ok(Self::new(
            recipe,
            None,
            tokens.access_token.token,
            info,
            Some(tokens.refresh_token),
            tokens.anti_csrf_token,
            transfer_method,
            user_context,
        ))
    }

    pub(super) fn with_response(mut self, response: &'a mut dyn BaseResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn handle(&self) -> &str {
        &self.info.session_handle
    }

    pub fn user_id(&self) -> &str {
        &self.info.user_id
    }

    pub fn recipe_user_id(&self) -> &str {
        &self.info.recipe_user_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.info.tenant_id
    }

    /// The custom claims of the current access token.
    pub fn access_token_payload(&self) -> &Payload {
        &self.info.payload
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// `None` if the session wasn't loaded from (or created for) a request.
    pub fn transfer_method(&self) -> Option<TransferMethod> {
        self.transfer_method
    }

    /// The expiry of the current access token, in milliseconds since the Unix epoch.
    pub fn access_token_expiry(&self) -> i64 {
        self.info.expiry_ms
    }

    pub fn user_context(&self) -> &UserContext {
        &self.user_context
    }

    /// The response this session writes its tokens to, if any.
    pub fn response(&mut self) -> Option<&mut (dyn BaseResponse + 'a)> {
        self.response.as_deref_mut()
    }

    /// Read a claim from the current access token payload.
    ///
    /// `None` if the claim is not set.
    pub fn get_claim_value<C>(&self, claim: &C) -> Result<Option<C::Value>, SessionError>
    where
        C: TypedClaim + ?Sized,
    {
        decode_claim_value(claim, &self.info.payload)
    }

    pub async fn set_claim_value<C>(&mut self, claim: &C, value: C::Value) -> Result<(), SessionError>
    where
        C: TypedClaim + ?Sized,
    {
        let update = claim_update(claim, value)?;
        self.merge_into_access_token_payload(update).await
    }

    pub async fn remove_claim<C>(&mut self, claim: &C) -> Result<(), SessionError>
    where
        C: SessionClaim + ?Sized,
    {
        let mut update = Payload::new();
        claim.remove_from_payload_by_merge(&mut update);
        self.merge_into_access_token_payload(update).await
    }

    /// Re-fetch the value of `claim` and store it in the session.
    pub async fn fetch_and_set_claim<C>(&mut self, claim: &C) -> Result<(), SessionError>
    where
        C: SessionClaim + ?Sized,
    {
        let input = self.recipe.fetch_input(
            &self.info.user_id,
            &self.info.recipe_user_id,
            &self.info.tenant_id,
            &self.info.payload,
            &self.user_context,
        );
        let update = claim
            .build(&input, now_ms())
            .await
            .map_err(SessionError::General)?;
        self.merge_into_access_token_payload(update).await
    }

    /// Shallow-merge `update` into the access token payload.
    ///
    /// `null` values delete the corresponding keys, protected keys are ignored.
    /// A new access token is issued and, if the session has a response, attached to it.
    ///
    /// Fails with [`SessionError::Unauthorised`] if the session no longer exists on the core.
    #[tracing::instrument(name = "Update session payload", level = tracing::Level::DEBUG, skip_all, fields(session.handle = %self.info.session_handle))]
    pub async fn merge_into_access_token_payload(&mut self, update: Payload) -> Result<(), SessionError> {
        let mut payload = self.info.payload.clone();
        merge_payload(&mut payload, &update);
        let regenerated = self
            .recipe
            .functions
            .regenerate_access_token(&self.access_token, Some(&payload), &self.user_context)
            .await?;
        match regenerated.access_token {
            Some(token) => {
                self.info = info_from_trusted_token(&token.token)?;
                self.access_token = token.token;
                self.write_access_token();
            }
            // Legacy sessions are updated in place.
            None => self.info.payload = payload,
        }
        Ok(())
    }

    fn write_access_token(&mut self) {
        let (Some(res), Some(method)) = (self.response.as_deref_mut(), self.transfer_method) else {
            return;
        };
        transfer::set_access_token(
            res,
            &self.recipe.config,
            &self.access_token,
            &self.info.user_id,
            self.info.expiry_ms,
            &self.info.payload,
            method,
        );
    }

    /// Revoke this session and clear its tokens from the response.
    ///
    /// Revoking a session that no longer exists is not an error.
    #[tracing::instrument(name = "Revoke session", level = tracing::Level::DEBUG, skip_all, fields(session.handle = %self.info.session_handle))]
    pub async fn revoke_session(&mut self) -> Result<(), SessionError> {
        if !self.revoked {
            self.recipe
                .functions
                .revoke_session(&self.info.session_handle, &self.user_context)
                .await?;
            self.revoked = true;
        }
        if let (Some(res), Some(method)) = (self.response.as_deref_mut(), self.transfer_method) {
            transfer::clear_session(res, &self.recipe.config, method);
        }
        Ok(())
    }

    /// Run `validators` against this session.
    ///
    /// Values re-fetched during validation are stored in the session even if validation fails.
    pub async fn assert_claims(
        &mut self,
        validators: &[Arc<dyn SessionClaimValidator>],
        mode: ValidationMode,
    ) -> Result<(), SessionError> {
        let validation = self
            .recipe
            .functions
            .validate_claims(
                ValidateClaimsInput {
                    user_id: &self.info.user_id,
                    recipe_user_id: &self.info.recipe_user_id,
                    tenant_id: &self.info.tenant_id,
                    payload: &self.info.payload,
                    validators,
                    mode,
                },
                &self.user_context,
            )
            .await?;
        if !validation.payload_update.is_empty() {
            self.merge_into_access_token_payload(validation.payload_update)
                .await?;
        }
        if validation.failures.is_empty() {
            Ok(())
        } else {
            tracing::debug!(
                session.handle = %self.info.session_handle,
                n_failures = validation.failures.len(),
                "The session failed claim validation"
            );
            Err(SessionError::InvalidClaims {
                failures: validation.failures,
            })
        }
    }

    async fn information(&self) -> Result<SessionInformation, SessionError> {
        self.recipe
            .functions
            .get_session_information(&self.info.session_handle, &self.user_context)
            .await?
            .ok_or_else(|| SessionError::unauthorised("The session does not exist anymore"))
    }

    pub async fn get_session_data_from_database(&self) -> Result<Value, SessionError> {
        Ok(self.information().await?.session_data_in_database)
    }

    pub async fn update_session_data_in_database(&mut self, data: Value) -> Result<(), SessionError> {
        let updated = self
            .recipe
            .functions
            .update_session_data_in_database(&self.info.session_handle, &data, &self.user_context)
            .await?;
        if updated {
            Ok(())
        } else {
            Err(SessionError::unauthorised("The session does not exist anymore"))
        }
    }

    /// When the session was created, in milliseconds since the Unix epoch.
    pub async fn get_time_created(&self) -> Result<i64, SessionError> {
        Ok(self.information().await?.time_created)
    }

    /// When the session expires, in milliseconds since the Unix epoch.
    pub async fn get_expiry(&self) -> Result<i64, SessionError> {
        Ok(self.information().await?.expiry)
    }

    /// Every token of the session, for callers that deliver them to the client themselves.
    ///
    /// The refresh token is only known right after the session was created or refreshed.
    pub fn get_all_session_tokens_dangerously(&self) -> SessionTokens {
        SessionTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.as_ref().map(|t| t.token.clone()),
            anti_csrf_token: self.anti_csrf_token.clone(),
            front_token: super::token::encode_front_token(
                &self.info.user_id,
                self.info.expiry_ms,
                &self.info.payload,
            ),
            access_and_front_token_updated: self.refresh_token.is_some(),
        }
    }

    /// Write every known token of the session to `res`, using `method`.
    pub fn attach_to_response(&self, res: &mut dyn BaseResponse, method: TransferMethod) {
        let config = &self.recipe.config;
        transfer::set_access_token(
            res,
            config,
            &self.access_token,
            &self.info.user_id,
            self.info.expiry_ms,
            &self.info.payload,
            method,
        );
        if let Some(refresh) = &self.refresh_token {
            transfer::set_token(res, config, TokenKind::Refresh, &refresh.token, refresh.expiry, method);
        }
        if let Some(anti_csrf) = &self.anti_csrf_token {
            transfer::set_anti_csrf_token(res, anti_csrf);
        }
    }
}
