//! The overridable building blocks of the session recipe.
//!
//! Every request-level flow (get, refresh, create, revoke) is expressed in terms of
//! [`SessionFunctions`]. To customise a step, wrap the implementation you are given:
//!
//! ```rust
//! use std::sync::Arc;
//! use supertokens::Payload;
//! use supertokens::context::UserContext;
//! use supertokens::core::NewSessionTokens;
//! use supertokens::session::SessionError;
//! use supertokens::session::functions::{CreateSessionInput, SessionFunctions};
//!
//! #[derive(Debug)]
//! struct AddRole(Arc<dyn SessionFunctions>);
//!
//! #[async_trait::async_trait]
//! impl SessionFunctions for AddRole {
//!     fn original(&self) -> &dyn SessionFunctions {
//!         self.0.as_ref()
//!     }
//!
//!     async fn create_new_session(
//!         &self,
//!         mut input: CreateSessionInput,
//!         ctx: &UserContext,
//!     ) -> Result<NewSessionTokens, SessionError> {
//!         input.access_token_payload.insert("role".into(), "admin".into());
//!         self.0.create_new_session(input, ctx).await
//!     }
//! }
//! ```
//!
//! Methods you don't override are forwarded to [`SessionFunctions::original`].
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use super::config::{AntiCsrfMode, ResolvedSessionConfig};
use super::errors::{SessionError, TheftCleanup};
use super::token::{self, AccessTokenInfo, KeyCache};
use crate::Payload;
use crate::claims::{
    ClaimFetchInput, ClaimsValidation, SessionClaimValidator, ValidationMode, validate_claims,
};
use crate::context::UserContext;
use crate::core::{
    Core, CoreSession, CreateSessionRequest, IssuedToken, NewSessionTokens, RefreshOutcome,
    RefreshSessionRequest, RegenerateOutcome, SessionInformation, VerifyOutcome,
    VerifySessionRequest,
};

#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub tenant_id: String,
    pub recipe_user_id: String,
    pub access_token_payload: Payload,
    pub session_data_in_database: Value,
    pub disable_anti_csrf: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyInput<'a> {
    pub access_token: &'a str,
    pub anti_csrf_token: Option<&'a str>,
    /// Whether the anti-CSRF token must be checked, in [`AntiCsrfMode::ViaToken`](super::AntiCsrfMode::ViaToken).
    pub do_anti_csrf_check: bool,
    /// Ask the core whether the session is still alive, instead of trusting a valid signature.
    pub check_database: bool,
}

/// The outcome of a successful access token verification.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub info: AccessTokenInfo,
    /// The token the session should use from now on.
    pub access_token: String,
    /// Set when the core issued a new access token during verification.
    pub new_access_token: Option<IssuedToken>,
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshInput<'a> {
    pub refresh_token: &'a str,
    pub anti_csrf_token: Option<&'a str>,
    pub disable_anti_csrf: bool,
}

#[derive(Debug, Clone)]
pub struct RegeneratedSession {
    pub session: CoreSession,
    /// `None` for legacy sessions, which are updated in place.
    pub access_token: Option<IssuedToken>,
}

#[derive(Clone, Copy)]
pub struct ValidateClaimsInput<'a> {
    pub user_id: &'a str,
    pub recipe_user_id: &'a str,
    pub tenant_id: &'a str,
    pub payload: &'a Payload,
    pub validators: &'a [Arc<dyn SessionClaimValidator>],
    pub mode: ValidationMode,
}

#[async_trait::async_trait]
/// The operations behind every session flow.
///
/// [`CoreSessionFunctions`] is the default implementation.
/// Overrides wrap it and forward whatever they don't customise via [`Self::original`].
pub trait SessionFunctions: Debug + Send + Sync {
    /// The implementation this one decorates, where default methods forward to.
    ///
    /// An implementation that doesn't decorate anything must override every operation.
    fn original(&self) -> &dyn SessionFunctions;

    async fn create_new_session(
        &self,
        input: CreateSessionInput,
        ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        self.original().create_new_session(input, ctx).await
    }

    async fn verify_access_token(
        &self,
        input: VerifyInput<'_>,
        ctx: &UserContext,
    ) -> Result<VerifiedSession, SessionError> {
        self.original().verify_access_token(input, ctx).await
    }

    async fn refresh_session(
        &self,
        input: RefreshInput<'_>,
        ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        self.original().refresh_session(input, ctx).await
    }

    /// Re-issue `access_token`, optionally with a new payload.
    ///
    /// Fails with [`SessionError::Unauthorised`] if the session no longer exists.
    async fn regenerate_access_token(
        &self,
        access_token: &str,
        new_payload: Option<&Payload>,
        ctx: &UserContext,
    ) -> Result<RegeneratedSession, SessionError> {
        self.original()
            .regenerate_access_token(access_token, new_payload, ctx)
            .await
    }

    /// Returns `false` if the session didn't exist.
    async fn revoke_session(&self, handle: &str, ctx: &UserContext) -> Result<bool, SessionError> {
        self.original().revoke_session(handle, ctx).await
    }

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        ctx: &UserContext,
    ) -> Result<Vec<String>, SessionError> {
        self.original()
            .revoke_all_sessions_for_user(user_id, tenant_id, ctx)
            .await
    }

    async fn get_all_session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        ctx: &UserContext,
    ) -> Result<Vec<String>, SessionError> {
        self.original()
            .get_all_session_handles_for_user(user_id, tenant_id, ctx)
            .await
    }

    async fn get_session_information(
        &self,
        handle: &str,
        ctx: &UserContext,
    ) -> Result<Option<SessionInformation>, SessionError> {
        self.original().get_session_information(handle, ctx).await
    }

    async fn update_session_data_in_database(
        &self,
        handle: &str,
        data: &Value,
        ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        self.original()
            .update_session_data_in_database(handle, data, ctx)
            .await
    }

    /// Merge `update` into the payload of the session's next access tokens.
    ///
    /// Returns `false` if the session doesn't exist.
    async fn merge_into_access_token_payload(
        &self,
        handle: &str,
        update: &Payload,
        ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        self.original()
            .merge_into_access_token_payload(handle, update, ctx)
            .await
    }

    async fn validate_claims(
        &self,
        input: ValidateClaimsInput<'_>,
        ctx: &UserContext,
    ) -> Result<ClaimsValidation, SessionError> {
        self.original().validate_claims(input, ctx).await
    }

    /// The validators that run on every verified session.
    fn get_global_claim_validators(
        &self,
        defaults: &[Arc<dyn SessionClaimValidator>],
        tenant_id: &str,
        user_id: &str,
        ctx: &UserContext,
    ) -> Vec<Arc<dyn SessionClaimValidator>> {
        self.original()
            .get_global_claim_validators(defaults, tenant_id, user_id, ctx)
    }
}

/// Merge `update` into `payload`: `null` values delete keys, protected keys are ignored.
pub fn merge_payload(payload: &mut Payload, update: &Payload) {
    let mut update = update.clone();
    token::strip_protected(&mut update);
    for (key, value) in update {
        if value.is_null() {
            payload.remove(&key);
        } else {
            payload.insert(key, value);
        }
    }
}

/// The default [`SessionFunctions`], backed by the core.
#[derive(Debug)]
pub struct CoreSessionFunctions {
    core: Core,
    keys: KeyCache,
    config: Arc<ResolvedSessionConfig>,
}

impl CoreSessionFunctions {
    pub fn new(core: Core, config: Arc<ResolvedSessionConfig>) -> Self {
        Self {
            keys: KeyCache::new(
                core.clone(),
                config.jwks_cache_max_age,
                config.jwks_refetch_cooldown,
            ),
            core,
            config,
        }
    }

    fn anti_csrf_enabled(&self) -> bool {
        self.config.anti_csrf == AntiCsrfMode::ViaToken
    }
}

/// The session described by a token the core just issued.
pub(crate) fn info_from_trusted_token(token: &str) -> Result<AccessTokenInfo, SessionError> {
    let parsed = token::parse(token)?;
    AccessTokenInfo::from_payload(parsed.version, &parsed.payload)
}

#[async_trait::async_trait]
impl SessionFunctions for CoreSessionFunctions {
    /// Nothing: this is the innermost implementation, every operation is overridden below.
    fn original(&self) -> &dyn SessionFunctions {
        unreachable!("The core-backed session functions don't forward to another implementation")
    }

    #[tracing::instrument(name = "Create session", level = tracing::Level::DEBUG, skip_all, fields(tenant.id = %input.tenant_id))]
    async fn create_new_session(
        &self,
        mut input: CreateSessionInput,
        _ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        token::strip_protected(&mut input.access_token_payload);
        let tokens = self
            .core
            .create_session(CreateSessionRequest {
                tenant_id: &input.tenant_id,
                recipe_user_id: &input.recipe_user_id,
                access_token_payload: &input.access_token_payload,
                session_data_in_database: &input.session_data_in_database,
                use_dynamic_signing_key: self.config.use_dynamic_access_token_signing_key,
                enable_anti_csrf: !input.disable_anti_csrf && self.anti_csrf_enabled(),
            })
            .await?;
        Ok(tokens)
    }

    #[tracing::instrument(name = "Verify access token", level = tracing::Level::DEBUG, skip_all, fields(session.handle))]
    async fn verify_access_token(
        &self,
        input: VerifyInput<'_>,
        _ctx: &UserContext,
    ) -> Result<VerifiedSession, SessionError> {
        let parsed = token::parse(input.access_token)?;

        let local = if parsed.is_legacy() {
            None
        } else {
            let info = token::verify_locally(&parsed, &self.keys).await?;
            tracing::Span::current().record("session.handle", info.session_handle.as_str());
            if input.do_anti_csrf_check && self.anti_csrf_enabled() {
                match (&info.anti_csrf_token, input.anti_csrf_token) {
                    (Some(expected), Some(actual)) if expected == actual => {}
                    (None, _) => {
                        return Err(SessionError::try_refresh(
                            "The access token doesn't carry an anti-CSRF token",
                        ));
                    }
                    _ => {
                        return Err(SessionError::try_refresh("The anti-CSRF check failed"));
                    }
                }
            }
            // A pending refresh has to be committed by the core first.
            let needs_core = input.check_database || info.parent_refresh_token_hash1.is_some();
            if !needs_core {
                return Ok(VerifiedSession {
                    info,
                    access_token: input.access_token.to_owned(),
                    new_access_token: None,
                });
            }
            Some(info)
        };

        let outcome = self
            .core
            .verify_session(VerifySessionRequest {
                access_token: input.access_token,
                anti_csrf_token: input.anti_csrf_token,
                do_anti_csrf_check: input.do_anti_csrf_check,
                enable_anti_csrf: self.anti_csrf_enabled(),
                check_database: input.check_database,
            })
            .await?;
        match outcome {
            VerifyOutcome::Ok {
                session,
                access_token: Some(new_token),
            } => {
                tracing::debug!(session.handle = %session.handle, "The core issued a new access token");
                let info = info_from_trusted_token(&new_token.token)?;
                Ok(VerifiedSession {
                    info,
                    access_token: new_token.token.clone(),
                    new_access_token: Some(new_token),
                })
            }
            VerifyOutcome::Ok {
                session,
                access_token: None,
            } => {
                let mut info = match local {
                    Some(info) => info,
                    None => AccessTokenInfo::from_payload(parsed.version, &parsed.payload)?,
                };
                info.user_id = session.user_id.clone();
                info.recipe_user_id = session.recipe_user_id().to_owned();
                info.tenant_id = session.tenant_id;
                info.payload = session.payload;
                Ok(VerifiedSession {
                    info,
                    access_token: input.access_token.to_owned(),
                    new_access_token: None,
                })
            }
            VerifyOutcome::Unauthorised { message } => Err(SessionError::unauthorised(message)),
            VerifyOutcome::TryRefreshToken { message } => Err(SessionError::try_refresh(message)),
        }
    }

    #[tracing::instrument(name = "Refresh session", level = tracing::Level::DEBUG, skip_all)]
    async fn refresh_session(
        &self,
        input: RefreshInput<'_>,
        _ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        let outcome = self
            .core
            .refresh_session(RefreshSessionRequest {
                refresh_token: input.refresh_token,
                anti_csrf_token: input.anti_csrf_token,
                enable_anti_csrf: !input.disable_anti_csrf && self.anti_csrf_enabled(),
                use_dynamic_signing_key: self.config.use_dynamic_access_token_signing_key,
            })
            .await?;
        match outcome {
            RefreshOutcome::Ok(tokens) => Ok(tokens),
            RefreshOutcome::Unauthorised { message } => Err(SessionError::unauthorised(message)),
            RefreshOutcome::TokenTheftDetected { session } => {
                let recipe_user_id = session
                    .recipe_user_id
                    .unwrap_or_else(|| session.user_id.clone());
                Err(SessionError::TokenTheftDetected {
                    session_handle: session.handle,
                    user_id: session.user_id,
                    recipe_user_id,
                    cleanup: TheftCleanup::NotAttempted,
                })
            }
        }
    }

    #[tracing::instrument(name = "Regenerate access token", level = tracing::Level::DEBUG, skip_all)]
    async fn regenerate_access_token(
        &self,
        access_token: &str,
        new_payload: Option<&Payload>,
        _ctx: &UserContext,
    ) -> Result<RegeneratedSession, SessionError> {
        match self.core.regenerate_session(access_token, new_payload).await? {
            RegenerateOutcome::Ok {
                session,
                access_token,
            } => Ok(RegeneratedSession {
                session,
                access_token,
            }),
            RegenerateOutcome::Unauthorised { message } => Err(SessionError::unauthorised(message)),
        }
    }

    async fn revoke_session(&self, handle: &str, _ctx: &UserContext) -> Result<bool, SessionError> {
        let revoked = self.core.revoke_sessions(&[handle.to_owned()]).await?;
        Ok(revoked.iter().any(|h| h == handle))
    }

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        _ctx: &UserContext,
    ) -> Result<Vec<String>, SessionError> {
        Ok(self.core.revoke_all_sessions_for_user(user_id, tenant_id).await?)
    }

    async fn get_all_session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        _ctx: &UserContext,
    ) -> Result<Vec<String>, SessionError> {
        Ok(self.core.session_handles_for_user(user_id, tenant_id).await?)
    }

    async fn get_session_information(
        &self,
        handle: &str,
        _ctx: &UserContext,
    ) -> Result<Option<SessionInformation>, SessionError> {
        Ok(self.core.session_information(handle).await?)
    }

    async fn update_session_data_in_database(
        &self,
        handle: &str,
        data: &Value,
        _ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        Ok(self.core.update_session_data(handle, data).await?)
    }

    #[tracing::instrument(name = "Merge into access token payload", level = tracing::Level::DEBUG, skip(self, update, ctx))]
    async fn merge_into_access_token_payload(
        &self,
        handle: &str,
        update: &Payload,
        ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        let Some(info) = self.get_session_information(handle, ctx).await? else {
            return Ok(false);
        };
        let mut payload = info.custom_claims_in_access_token_payload;
        merge_payload(&mut payload, update);
        Ok(self.core.update_access_token_payload(handle, &payload).await?)
    }

    async fn validate_claims(
        &self,
        input: ValidateClaimsInput<'_>,
        ctx: &UserContext,
    ) -> Result<ClaimsValidation, SessionError> {
        let fetch_input = ClaimFetchInput {
            user_id: input.user_id.to_owned(),
            recipe_user_id: input.recipe_user_id.to_owned(),
            tenant_id: input.tenant_id.to_owned(),
            current_payload: input.payload.clone(),
            core: self.core.clone(),
            user_context: ctx.clone(),
        };
        validate_claims(input.validators, input.payload, &fetch_input, input.mode)
            .await
            .map_err(SessionError::General)
    }

    fn get_global_claim_validators(
        &self,
        defaults: &[Arc<dyn SessionClaimValidator>],
        _tenant_id: &str,
        _user_id: &str,
        _ctx: &UserContext,
    ) -> Vec<Arc<dyn SessionClaimValidator>> {
        defaults.to_vec()
    }
}
