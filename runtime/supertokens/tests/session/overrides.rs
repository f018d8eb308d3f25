use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use googletest::assert_that;
use serde_json::json;
use supertokens::claims::ValidationMode;
use supertokens::context::ContextKey;
use supertokens::core::NewSessionTokens;
use supertokens::session::functions::{CreateSessionInput, SessionFunctions};
use supertokens::session::{SessionConfig, SessionError, TheftCleanup, VerifySessionOptions};
use supertokens::{Payload, UserContext};
use supertokens_memory_core::InMemoryCore;

use crate::assertions::has_kind;
use crate::fixtures::{TestApp, app_with};
use crate::sign_in;

const TENANT_HINT: ContextKey<String> = ContextKey::new("tests", "tenant-hint");

/// Tags every new session and counts how many were created.
#[derive(Debug)]
struct Tagging {
    original: Arc<dyn SessionFunctions>,
    created: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl SessionFunctions for Tagging {
    fn original(&self) -> &dyn SessionFunctions {
        self.original.as_ref()
    }

    async fn create_new_session(
        &self,
        mut input: CreateSessionInput,
        ctx: &UserContext,
    ) -> Result<NewSessionTokens, SessionError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let tag = ctx.get(&TENANT_HINT).cloned().unwrap_or_else(|| "none".into());
        input.access_token_payload.insert("tag".into(), json!(tag));
        self.original.create_new_session(input, ctx).await
    }
}

/// Reports theft without letting the session recipe revoke anything.
#[derive(Debug)]
struct NoRevocation {
    original: Arc<dyn SessionFunctions>,
}

#[async_trait::async_trait]
impl SessionFunctions for NoRevocation {
    fn original(&self) -> &dyn SessionFunctions {
        self.original.as_ref()
    }

    async fn revoke_session(&self, _handle: &str, _ctx: &UserContext) -> Result<bool, SessionError> {
        Err(SessionError::General(anyhow::anyhow!("Revocation is disabled")))
    }
}

/// Customises nothing: every operation falls through to the wrapped implementation.
#[derive(Debug)]
struct PassThrough {
    original: Arc<dyn SessionFunctions>,
}

#[async_trait::async_trait]
impl SessionFunctions for PassThrough {
    fn original(&self) -> &dyn SessionFunctions {
        self.original.as_ref()
    }
}

#[tokio::test]
async fn overrides_can_customise_session_creation() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let TestApp { app, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), move |b| {
        b.override_session_functions(move |original| Tagging {
            original,
            created: counter,
        })
    });

    let ctx = UserContext::new().with(&TENANT_HINT, "acme".to_owned());
    let session = app
        .session()
        .create_new_session_without_request_response(
            "public",
            "user-1",
            Default::default(),
            json!({}),
            false,
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(session.access_token_payload()["tag"], json!("acme"));

    let (_, _) = sign_in(&app, "user-2").await;
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn overrides_compose_with_the_last_one_outermost() {
    let created = Arc::new(AtomicUsize::new(0));
    let (first, second) = (created.clone(), created.clone());
    let TestApp { app, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), move |b| {
        b.override_session_functions(move |original| Tagging {
            original,
            created: first,
        })
        .override_session_functions(move |original| Tagging {
            original,
            created: second,
        })
    });

    sign_in(&app, "user-1").await;
    // Both layers ran.
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn theft_is_terminal_even_if_the_cleanup_fails() {
    let TestApp { app, memory, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), |b| {
        b.override_session_functions(|original| NoRevocation { original })
    });
    let (_, r1) = sign_in(&app, "user-1").await;
    let r2 = app
        .session()
        .refresh_session_without_request_response(r1.refresh_token(), None, false, &UserContext::new())
        .await
        .unwrap()
        .get_all_session_tokens_dangerously()
        .refresh_token
        .unwrap();

    let err = app
        .session()
        .refresh_session_without_request_response(r1.refresh_token(), None, false, &UserContext::new())
        .await
        .unwrap_err();
    let SessionError::TokenTheftDetected { cleanup, .. } = err else {
        panic!("Expected token theft to be detected, got {err:?}");
    };
    assert_eq!(cleanup, TheftCleanup::Failed);

    // The session is dead anyway: the latest refresh token can't resurrect it.
    let err = app
        .session()
        .refresh_session_without_request_response(&r2, None, false, &UserContext::new())
        .await
        .unwrap_err();
    assert_that!(&err, has_kind("UNAUTHORISED"));
    assert_eq!(memory.session_count().await, 0);
}

#[tokio::test]
async fn every_operation_is_served_through_an_empty_override() {
    let TestApp { app, memory, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), |b| {
        b.override_session_functions(|original| PassThrough { original })
    });
    let ctx = UserContext::new();
    let recipe = app.session();
    let (handle, tokens) = sign_in(&app, "user-1").await;

    let mut session = recipe
        .get_session_without_request_response(
            Some(tokens.access_token()),
            None,
            VerifySessionOptions::default(),
            &ctx,
        )
        .await
        .unwrap()
        .unwrap();
    let mut update = Payload::new();
    update.insert("plan".into(), json!("pro"));
    session.merge_into_access_token_payload(update.clone()).await.unwrap();
    assert_eq!(session.access_token_payload()["plan"], json!("pro"));

    assert!(recipe.merge_into_access_token_payload(&handle, &update, &ctx).await.unwrap());
    assert!(
        recipe
            .update_session_data_in_database(&handle, &json!({ "theme": "dark" }), &ctx)
            .await
            .unwrap()
    );
    let info = recipe.get_session_information(&handle, &ctx).await.unwrap().unwrap();
    assert_eq!(info.session_data_in_database, json!({ "theme": "dark" }));
    assert_eq!(
        recipe.get_all_session_handles_for_user("user-1", None, &ctx).await.unwrap(),
        vec![handle.clone()]
    );
    let failures = recipe
        .validate_claims_for_session_handle(&handle, None, ValidationMode::All, &ctx)
        .await
        .unwrap();
    assert_eq!(failures.map(|f| f.len()), Some(0));

    recipe
        .refresh_session_without_request_response(tokens.refresh_token(), None, false, &ctx)
        .await
        .unwrap();
    assert!(recipe.revoke_session(&handle, &ctx).await.unwrap());
    sign_in(&app, "user-1").await;
    assert_eq!(
        recipe.revoke_all_sessions_for_user("user-1", None, &ctx).await.unwrap().len(),
        1
    );
    assert_eq!(memory.session_count().await, 0);
}
