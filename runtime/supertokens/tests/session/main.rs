use fixtures::{TestApp, app};
use googletest::assert_that;
use googletest::prelude::{eq, none, not, some};
use helpers::{ClientTokens, get, post};
use serde_json::json;
use supertokens::framework::http::HttpResponse;
use supertokens::session::token::decode_front_token;
use supertokens::session::{SessionContainer, SessionError, TransferMethod, VerifySessionOptions};
use supertokens::{Payload, SuperTokens, UserContext};

mod api;
mod assertions;
mod claims;
mod fixtures;
mod helpers;
mod overrides;
mod refresh;
mod revoke;

static_assertions::assert_impl_all!(SuperTokens: Send, Sync, Clone);
static_assertions::assert_impl_all!(SessionError: Send, Sync);
static_assertions::assert_impl_all!(SessionContainer<'static>: Send);

/// Create a session for `user_id` through a cookie-based login request.
pub async fn sign_in(app: &SuperTokens, user_id: &str) -> (String, ClientTokens) {
    sign_in_with_payload(app, user_id, Payload::new()).await
}

pub async fn sign_in_with_payload(
    app: &SuperTokens,
    user_id: &str,
    payload: Payload,
) -> (String, ClientTokens) {
    let req = post("/login").finish();
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .create_new_session(
            &req,
            &mut res,
            "public",
            user_id,
            payload,
            json!({}),
            &UserContext::new(),
        )
        .await
        .unwrap();
    let handle = session.handle().to_owned();
    (handle, ClientTokens::from_response(&res))
}

#[tokio::test]
async fn new_sessions_use_cookies_by_default() {
    let TestApp { app, .. } = app();

    let req = post("/login").finish();
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .create_new_session(
            &req,
            &mut res,
            "public",
            "user-1",
            Payload::new(),
            json!({}),
            &UserContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(session.user_id(), "user-1");
    assert_eq!(session.tenant_id(), "public");
    assert_eq!(session.transfer_method(), Some(TransferMethod::Cookie));

    let access = res.cookie("sAccessToken").unwrap();
    assert!(access.http_only);
    assert_eq!(access.path, "/");
    let refresh = res.cookie("sRefreshToken").unwrap();
    assert_eq!(refresh.path, "/auth/session/refresh");
    assert_that!(res.header("st-access-token"), none());

    // The frontend reads the session summary from the front token.
    let front = decode_front_token(res.header("front-token").unwrap()).unwrap();
    assert_eq!(front.user_id, "user-1");
    assert_eq!(front.access_token_expiry, session.access_token_expiry());
    assert_eq!(&front.payload, session.access_token_payload());
}

#[tokio::test]
async fn clients_can_ask_for_header_based_sessions() {
    let TestApp { app, .. } = app();

    let req = post("/login").auth_mode("header").finish();
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .create_new_session(
            &req,
            &mut res,
            "public",
            "user-1",
            Payload::new(),
            json!({}),
            &UserContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(session.transfer_method(), Some(TransferMethod::Header));

    assert_that!(res.cookie("sAccessToken"), none());
    assert_that!(res.header("st-access-token"), some(not(eq(""))));
    assert_that!(res.header("st-refresh-token"), some(not(eq(""))));
    let exposed = res.header("access-control-expose-headers").unwrap();
    assert!(exposed.contains("st-access-token"));
    assert!(exposed.contains("front-token"));
}

#[tokio::test]
async fn a_session_can_be_retrieved_from_its_cookies() {
    let TestApp { app, calls, .. } = app();
    let (handle, tokens) = sign_in(&app, "user-1").await;

    let req = get("/profile").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &UserContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.handle(), handle);
    assert_eq!(session.user_id(), "user-1");
    assert_eq!(session.access_token(), tokens.access_token());

    // Verification is local: only the signing keys were fetched.
    assert_eq!(
        calls.operation_log().await,
        vec!["create user-1".to_owned(), "jwks".to_owned()]
    );
}

#[tokio::test]
async fn a_session_can_be_retrieved_from_the_authorization_header() {
    let TestApp { app, .. } = app();
    let req = post("/login").auth_mode("header").finish();
    let mut res = HttpResponse::new();
    let handle = app
        .session()
        .create_new_session(
            &req,
            &mut res,
            "public",
            "user-1",
            Payload::new(),
            json!({}),
            &UserContext::new(),
        )
        .await
        .unwrap()
        .handle()
        .to_owned();
    let tokens = ClientTokens::from_response(&res);

    let req = post("/api").bearer(tokens.access_token()).finish();
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &UserContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.handle(), handle);
    assert_eq!(session.transfer_method(), Some(TransferMethod::Header));
}

#[tokio::test]
async fn protected_keys_are_stripped_from_the_initial_payload() {
    let TestApp { app, .. } = app();
    let payload = json!({ "sub": "someone-else", "role": "admin" })
        .as_object()
        .cloned()
        .unwrap();
    let (_, tokens) = sign_in_with_payload(&app, "user-1", payload).await;

    let session = app
        .session()
        .get_session_without_request_response(
            Some(tokens.access_token()),
            None,
            VerifySessionOptions::default(),
            &UserContext::new(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.user_id(), "user-1");
    assert_eq!(session.access_token_payload()["role"], json!("admin"));
}

#[tokio::test]
async fn session_data_in_the_database_is_not_sent_to_the_client() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let mut session = app
        .session()
        .create_new_session_without_request_response(
            "public",
            "user-1",
            Payload::new(),
            json!({ "secret": 42 }),
            false,
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(
        session.get_session_data_from_database().await.unwrap(),
        json!({ "secret": 42 })
    );
    assert!(!session.access_token_payload().contains_key("secret"));

    session
        .update_session_data_in_database(json!({ "secret": 43 }))
        .await
        .unwrap();
    let info = app
        .session()
        .get_session_information(session.handle(), &ctx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.session_data_in_database, json!({ "secret": 43 }));
}

#[tokio::test]
async fn sessions_can_be_listed_and_revoked_per_user() {
    let TestApp { app, memory, .. } = app();
    let ctx = UserContext::new();
    let (first, _) = sign_in(&app, "user-1").await;
    let (second, _) = sign_in(&app, "user-1").await;
    let (other, _) = sign_in(&app, "user-2").await;

    let mut handles = app
        .session()
        .get_all_session_handles_for_user("user-1", None, &ctx)
        .await
        .unwrap();
    handles.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(handles, expected);

    let mut revoked = app
        .session()
        .revoke_all_sessions_for_user("user-1", None, &ctx)
        .await
        .unwrap();
    revoked.sort();
    assert_eq!(revoked, expected);
    assert_eq!(memory.session_count().await, 1);
    assert!(
        app.session()
            .get_session_information(&other, &ctx)
            .await
            .unwrap()
            .is_some()
    );
}
