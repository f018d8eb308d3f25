use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use serde_json::Value;
use supertokens::Payload;
use supertokens::app::SuperTokensBuilder;
use supertokens::core::errors::CoreError;
use supertokens::core::{
    Core, CoreBackend, CreateSessionRequest, NewSessionTokens, RefreshOutcome,
    RefreshSessionRequest, RegenerateOutcome, SessionInformation, VerifyOutcome,
    VerifySessionRequest,
};
use supertokens::session::SessionConfig;
use supertokens::{AppInfo, SuperTokens};
use supertokens_memory_core::InMemoryCore;
use tokio::sync::Mutex;

pub const API_DOMAIN: &str = "http://api.example.com";
pub const WEBSITE_DOMAIN: &str = "http://example.com";

pub fn app_info() -> AppInfo {
    AppInfo::new("test-app", API_DOMAIN, WEBSITE_DOMAIN)
}

/// Everything a test may need to poke at: the application, the in-memory core
/// behind it and a record of the calls the SDK made to the core.
pub struct TestApp {
    pub app: SuperTokens,
    pub memory: InMemoryCore,
    pub calls: CallTracker,
}

/// An application with the default session configuration and no recipes,
/// backed by an empty in-memory core.
pub fn app() -> TestApp {
    app_with(InMemoryCore::new(), SessionConfig::default(), |builder| builder)
}

/// An application backed by `memory`, with the given session configuration.
///
/// Use `configure` to register recipes and overrides.
pub fn app_with(
    memory: InMemoryCore,
    session: SessionConfig,
    configure: impl FnOnce(SuperTokensBuilder) -> SuperTokensBuilder,
) -> TestApp {
    let spy = SpyCore::new(memory.clone());
    let calls = spy.call_tracker();
    let builder = SuperTokens::builder(app_info(), Core::new(spy)).session(session);
    let app = configure(builder)
        .build()
        .expect("Failed to build the test application");
    TestApp { app, memory, calls }
}

/// A wrapper that keeps track of which methods have been called
/// on the underlying core backend.
#[derive(Debug)]
pub struct SpyCore<B> {
    backend: B,
    call_tracker: CallTracker,
}

impl<B> SpyCore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            call_tracker: Default::default(),
        }
    }

    pub fn call_tracker(&self) -> CallTracker {
        self.call_tracker.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallTracker(Arc<Mutex<Vec<String>>>);

impl CallTracker {
    pub async fn operation_log(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }

    pub async fn reset_operation_log(&self) {
        self.0.lock().await.clear();
    }

    /// How many times the signing keys were fetched from the core.
    pub async fn jwks_fetches(&self) -> usize {
        self.0.lock().await.iter().filter(|op| *op == "jwks").count()
    }

    pub async fn assert_core_was_untouched(&self) {
        let oplog = self.0.lock().await;
        assert!(
            oplog.is_empty(),
            "The core was supposed to be untouched, but at least one method has been called on it. Operation log:\n  - {}",
            oplog.join("\n  - ")
        )
    }

    async fn push_operation(&self, op: impl Into<String>) {
        self.0.lock().await.push(op.into());
    }
}

#[async_trait::async_trait]
impl<B: CoreBackend> CoreBackend for SpyCore<B> {
    async fn create_session(
        &self,
        request: CreateSessionRequest<'_>,
    ) -> Result<NewSessionTokens, CoreError> {
        self.call_tracker
            .push_operation(format!("create {}", request.recipe_user_id))
            .await;
        self.backend.create_session(request).await
    }

    async fn verify_session(
        &self,
        request: VerifySessionRequest<'_>,
    ) -> Result<VerifyOutcome, CoreError> {
        self.call_tracker.push_operation("verify").await;
        self.backend.verify_session(request).await
    }

    async fn refresh_session(
        &self,
        request: RefreshSessionRequest<'_>,
    ) -> Result<RefreshOutcome, CoreError> {
        self.call_tracker.push_operation("refresh").await;
        self.backend.refresh_session(request).await
    }

    async fn regenerate_session(
        &self,
        access_token: &str,
        payload: Option<&Payload>,
    ) -> Result<RegenerateOutcome, CoreError> {
        self.call_tracker.push_operation("regenerate").await;
        self.backend.regenerate_session(access_token, payload).await
    }

    async fn revoke_sessions(&self, handles: &[String]) -> Result<Vec<String>, CoreError> {
        self.call_tracker
            .push_operation(format!("revoke {}", handles.join(",")))
            .await;
        self.backend.revoke_sessions(handles).await
    }

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        self.call_tracker
            .push_operation(format!("revoke-all {user_id}"))
            .await;
        self.backend
            .revoke_all_sessions_for_user(user_id, tenant_id)
            .await
    }

    async fn session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        self.call_tracker
            .push_operation(format!("list {user_id}"))
            .await;
        self.backend.session_handles_for_user(user_id, tenant_id).await
    }

    async fn session_information(
        &self,
        handle: &str,
    ) -> Result<Option<SessionInformation>, CoreError> {
        self.call_tracker
            .push_operation(format!("load {handle}"))
            .await;
        self.backend.session_information(handle).await
    }

    async fn update_session_data(&self, handle: &str, data: &Value) -> Result<bool, CoreError> {
        self.call_tracker
            .push_operation(format!("update-data {handle}"))
            .await;
        self.backend.update_session_data(handle, data).await
    }

    async fn update_access_token_payload(
        &self,
        handle: &str,
        payload: &Payload,
    ) -> Result<bool, CoreError> {
        self.call_tracker
            .push_operation(format!("update-payload {handle}"))
            .await;
        self.backend.update_access_token_payload(handle, payload).await
    }

    async fn jwks(&self) -> Result<JwkSet, CoreError> {
        self.call_tracker.push_operation("jwks").await;
        self.backend.jwks().await
    }

    async fn is_email_verified(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        email: &str,
    ) -> Result<bool, CoreError> {
        self.call_tracker
            .push_operation(format!("email-verified {recipe_user_id}"))
            .await;
        self.backend
            .is_email_verified(tenant_id, recipe_user_id, email)
            .await
    }

    async fn roles_for_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<String>, CoreError> {
        self.call_tracker
            .push_operation(format!("roles {user_id}"))
            .await;
        self.backend.roles_for_user(tenant_id, user_id).await
    }

    async fn permissions_for_role(&self, role: &str) -> Result<Option<Vec<String>>, CoreError> {
        self.call_tracker
            .push_operation(format!("permissions {role}"))
            .await;
        self.backend.permissions_for_role(role).await
    }
}
