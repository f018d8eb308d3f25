//! The boundary between this SDK and the SuperTokens core service.
//!
//! Every operation that needs persistence or signing goes through [`Core`],
//! which wraps a [`CoreBackend`]. [`HttpCore`] talks to a real core over HTTP;
//! tests and local development can plug in any other backend, e.g. the
//! in-memory one shipped in `supertokens_memory_core`.
//!
//! Backends never raise errors for protocol-level outcomes such as
//! `UNAUTHORISED` or `TOKEN_THEFT_DETECTED`: those are returned as variants of
//! the `*Outcome` enums and mapped to typed errors by the session layer.
//! [`CoreError`](errors::CoreError) is reserved for transport and decoding failures.
use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use serde_json::Value;

use crate::Payload;

mod http_core;
mod protocol;

pub use http_core::{HttpCore, HttpCoreConfig};
pub use protocol::*;

/// A handle to the SuperTokens core.
///
/// It's cheap to clone.
#[derive(Debug, Clone)]
pub struct Core(Arc<dyn CoreBackend>);

impl Core {
    pub fn new<Backend>(backend: Backend) -> Self
    where
        Backend: CoreBackend + 'static,
    {
        Self(Arc::new(backend))
    }

    #[tracing::instrument(name = "Create session in core", level = tracing::Level::DEBUG, skip_all, fields(tenant.id = request.tenant_id))]
    pub async fn create_session(
        &self,
        request: CreateSessionRequest<'_>,
    ) -> Result<NewSessionTokens, errors::CoreError> {
        self.0.create_session(request).await
    }

    #[tracing::instrument(name = "Verify session in core", level = tracing::Level::DEBUG, skip_all)]
    pub async fn verify_session(
        &self,
        request: VerifySessionRequest<'_>,
    ) -> Result<VerifyOutcome, errors::CoreError> {
        self.0.verify_session(request).await
    }

    #[tracing::instrument(name = "Refresh session in core", level = tracing::Level::DEBUG, skip_all)]
    pub async fn refresh_session(
        &self,
        request: RefreshSessionRequest<'_>,
    ) -> Result<RefreshOutcome, errors::CoreError> {
        self.0.refresh_session(request).await
    }

    #[tracing::instrument(name = "Regenerate access token in core", level = tracing::Level::DEBUG, skip_all)]
    pub async fn regenerate_session(
        &self,
        access_token: &str,
        payload: Option<&Payload>,
    ) -> Result<RegenerateOutcome, errors::CoreError> {
        self.0.regenerate_session(access_token, payload).await
    }

    /// Returns the handles that were actually revoked.
    #[tracing::instrument(name = "Revoke sessions in core", level = tracing::Level::DEBUG, skip_all)]
    pub async fn revoke_sessions(&self, handles: &[String]) -> Result<Vec<String>, errors::CoreError> {
        self.0.revoke_sessions(handles).await
    }

    /// If `tenant_id` is `None`, sessions are revoked across all tenants.
    #[tracing::instrument(name = "Revoke user sessions in core", level = tracing::Level::DEBUG, skip(self))]
    pub async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, errors::CoreError> {
        self.0.revoke_all_sessions_for_user(user_id, tenant_id).await
    }

    /// If `tenant_id` is `None`, handles are collected across all tenants.
    #[tracing::instrument(name = "List user sessions in core", level = tracing::Level::DEBUG, skip(self))]
    pub async fn session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, errors::CoreError> {
        self.0.session_handles_for_user(user_id, tenant_id).await
    }

    #[tracing::instrument(name = "Load session information from core", level = tracing::Level::DEBUG, skip(self))]
    pub async fn session_information(
        &self,
        handle: &str,
    ) -> Result<Option<SessionInformation>, errors::CoreError> {
        self.0.session_information(handle).await
    }

    /// Returns `false` if the session doesn't exist.
    #[tracing::instrument(name = "Update session data in core", level = tracing::Level::DEBUG, skip(self, data))]
    pub async fn update_session_data(
        &self,
        handle: &str,
        data: &Value,
    ) -> Result<bool, errors::CoreError> {
        self.0.update_session_data(handle, data).await
    }

    /// Replace the payload that'll be embedded into the next access token of the session.
    ///
    /// Returns `false` if the session doesn't exist.
    #[tracing::instrument(name = "Update access token payload in core", level = tracing::Level::DEBUG, skip(self, payload))]
    pub async fn update_access_token_payload(
        &self,
        handle: &str,
        payload: &Payload,
    ) -> Result<bool, errors::CoreError> {
        self.0.update_access_token_payload(handle, payload).await
    }

    #[tracing::instrument(name = "Fetch signing keys from core", level = tracing::Level::DEBUG, skip_all)]
    pub async fn jwks(&self) -> Result<JwkSet, errors::CoreError> {
        self.0.jwks().await
    }

    #[tracing::instrument(name = "Check email verification in core", level = tracing::Level::DEBUG, skip(self, email))]
    pub async fn is_email_verified(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        email: &str,
    ) -> Result<bool, errors::CoreError> {
        self.0.is_email_verified(tenant_id, recipe_user_id, email).await
    }

    #[tracing::instrument(name = "Fetch user roles from core", level = tracing::Level::DEBUG, skip(self))]
    pub async fn roles_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, errors::CoreError> {
        self.0.roles_for_user(tenant_id, user_id).await
    }

    /// Returns `None` if the role doesn't exist.
    #[tracing::instrument(name = "Fetch role permissions from core", level = tracing::Level::DEBUG, skip(self))]
    pub async fn permissions_for_role(
        &self,
        role: &str,
    ) -> Result<Option<Vec<String>>, errors::CoreError> {
        self.0.permissions_for_role(role).await
    }
}

#[async_trait::async_trait]
/// The interface that any implementation of the core protocol must satisfy.
pub trait CoreBackend: std::fmt::Debug + Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest<'_>,
    ) -> Result<NewSessionTokens, errors::CoreError>;

    async fn verify_session(
        &self,
        request: VerifySessionRequest<'_>,
    ) -> Result<VerifyOutcome, errors::CoreError>;

    async fn refresh_session(
        &self,
        request: RefreshSessionRequest<'_>,
    ) -> Result<RefreshOutcome, errors::CoreError>;

    /// Re-issue the access token with a new payload.
    ///
    /// If `payload` is `None`, the payload is left unchanged.
    async fn regenerate_session(
        &self,
        access_token: &str,
        payload: Option<&Payload>,
    ) -> Result<RegenerateOutcome, errors::CoreError>;

    /// Unknown handles are skipped, they don't cause an error.
    async fn revoke_sessions(&self, handles: &[String]) -> Result<Vec<String>, errors::CoreError>;

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, errors::CoreError>;

    async fn session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, errors::CoreError>;

    async fn session_information(
        &self,
        handle: &str,
    ) -> Result<Option<SessionInformation>, errors::CoreError>;

    async fn update_session_data(&self, handle: &str, data: &Value)
    -> Result<bool, errors::CoreError>;

    async fn update_access_token_payload(
        &self,
        handle: &str,
        payload: &Payload,
    ) -> Result<bool, errors::CoreError>;

    async fn jwks(&self) -> Result<JwkSet, errors::CoreError>;

    async fn is_email_verified(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        email: &str,
    ) -> Result<bool, errors::CoreError>;

    async fn roles_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, errors::CoreError>;

    async fn permissions_for_role(
        &self,
        role: &str,
    ) -> Result<Option<Vec<String>>, errors::CoreError>;
}

/// Errors that can occur when talking to the core.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum CoreError {
        #[error("Failed to reach the SuperTokens core")]
        Unreachable(#[source] anyhow::Error),
        #[error(
            "The SuperTokens core replied to `{method} {path}` with a {status} status code: {body}"
        )]
        UnexpectedStatusCode {
            method: http::Method,
            path: String,
            status: u16,
            body: String,
        },
        #[error("The SuperTokens core replied to `{path}` with an unexpected `{status}` status")]
        UnexpectedStatus { path: String, status: String },
        #[error("Failed to deserialize the response of the SuperTokens core to `{path}`")]
        Deserialization {
            path: String,
            #[source]
            source: serde_json::Error,
        },
        #[error("Something went wrong when talking to the SuperTokens core")]
        Other(#[source] anyhow::Error),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum CoreConfigError {
        #[error("The core connection URI is empty")]
        NoHosts,
        #[error("`{uri}` is not a valid core connection URI")]
        InvalidConnectionUri {
            uri: String,
            #[source]
            source: anyhow::Error,
        },
        #[error("Failed to build the HTTP client used to talk to the core")]
        HttpClient(#[source] anyhow::Error),
    }
}
