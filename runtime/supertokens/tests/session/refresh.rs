use googletest::assert_that;
use googletest::prelude::{eq, none, not, some};
use supertokens::framework::http::HttpResponse;
use supertokens::session::token::decode_front_token;
use supertokens::session::{
    AntiCsrfMode, SessionConfig, SessionError, TheftCleanup, VerifySessionOptions,
};
use supertokens::{SuperTokens, UserContext};
use supertokens_memory_core::{InMemoryCore, RotationPolicy};

use crate::assertions::{has_kind, is_removal_cookie};
use crate::fixtures::{TestApp, app, app_with};
use crate::helpers::{ClientTokens, RequestBuilder, post};
use crate::sign_in;

/// Send `refresh_token` to the refresh endpoint, the way a browser would.
async fn refresh_with(
    app: &SuperTokens,
    refresh_token: &str,
    customize: impl FnOnce(RequestBuilder) -> RequestBuilder,
) -> (Result<(), SessionError>, HttpResponse) {
    let req = customize(post("/auth/session/refresh").cookie("sRefreshToken", refresh_token)).finish();
    let mut res = HttpResponse::new();
    let outcome = app
        .session()
        .refresh_session(&req, &mut res, &UserContext::new())
        .await
        .map(drop);
    (outcome, res)
}

/// Rotate the refresh token held by `tokens`, returning the new ones.
async fn rotate(app: &SuperTokens, tokens: &ClientTokens) -> ClientTokens {
    let (outcome, res) = refresh_with(app, tokens.refresh_token(), |r| r).await;
    outcome.unwrap();
    ClientTokens::from_response(&res)
}

fn assert_tokens_were_cleared(res: &HttpResponse) {
    assert_that!(res.cookie("sAccessToken").unwrap(), is_removal_cookie());
    assert_that!(res.cookie("sRefreshToken").unwrap(), is_removal_cookie());
    assert_that!(res.header("front-token"), some(eq("remove")));
}

#[tokio::test]
async fn refreshing_rotates_both_tokens() {
    let TestApp { app, .. } = app();
    let (handle, first) = sign_in(&app, "user-1").await;

    let (outcome, res) = refresh_with(&app, first.refresh_token(), |r| r).await;
    outcome.unwrap();
    let second = ClientTokens::from_response(&res);
    assert_ne!(second.refresh_token(), first.refresh_token());
    assert_ne!(second.access_token(), first.access_token());
    assert_that!(res.cookie("sAccessToken").unwrap(), not(is_removal_cookie()));
    assert_eq!(res.cookie("sRefreshToken").unwrap().path, "/auth/session/refresh");
    let front = decode_front_token(res.header("front-token").unwrap()).unwrap();
    assert_eq!(front.user_id, "user-1");

    let session = app
        .session()
        .get_session_without_request_response(
            Some(second.access_token()),
            None,
            VerifySessionOptions::default(),
            &UserContext::new(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.handle(), handle);
}

#[tokio::test]
async fn reusing_a_rotated_out_refresh_token_is_theft() {
    let TestApp { app, memory, .. } = app();
    let (handle, r1) = sign_in(&app, "user-1").await;
    let _r2 = rotate(&app, &r1).await;

    let (outcome, res) = refresh_with(&app, r1.refresh_token(), |r| r).await;
    let err = outcome.unwrap_err();
    let SessionError::TokenTheftDetected {
        session_handle,
        user_id,
        cleanup,
        ..
    } = err
    else {
        panic!("Expected token theft to be detected, got {err:?}");
    };
    assert_eq!(session_handle, handle);
    assert_eq!(user_id, "user-1");
    assert_eq!(cleanup, TheftCleanup::Revoked);
    assert_tokens_were_cleared(&res);
    assert_eq!(memory.session_count().await, 0);
}

#[tokio::test]
async fn reusing_the_previous_refresh_token_after_two_rotations_is_theft() {
    let TestApp { app, .. } = app();
    let (_, r1) = sign_in(&app, "user-1").await;
    let r2 = rotate(&app, &r1).await;
    let _r3 = rotate(&app, &r2).await;

    let (outcome, res) = refresh_with(&app, r2.refresh_token(), |r| r).await;
    assert_that!(&outcome.unwrap_err(), has_kind("TOKEN_THEFT_DETECTED"));
    assert_tokens_were_cleared(&res);
}

#[tokio::test]
async fn theft_is_terminal() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let (handle, r1) = sign_in(&app, "user-1").await;
    let r2 = rotate(&app, &r1).await;

    let (outcome, _) = refresh_with(&app, r1.refresh_token(), |r| r).await;
    assert_that!(&outcome.unwrap_err(), has_kind("TOKEN_THEFT_DETECTED"));

    // The legitimate, latest refresh token is dead too.
    let (outcome, res) = refresh_with(&app, r2.refresh_token(), |r| r).await;
    assert_that!(&outcome.unwrap_err(), has_kind("UNAUTHORISED"));
    assert_tokens_were_cleared(&res);

    // So is the session, for anyone who asks the core.
    let err = app
        .session()
        .get_session_without_request_response(
            Some(r2.access_token()),
            None,
            VerifySessionOptions::default().check_database(),
            &ctx,
        )
        .await
        .unwrap_err();
    assert_that!(&err, has_kind("UNAUTHORISED"));
    assert_that!(
        app.session().get_session_information(&handle, &ctx).await.unwrap(),
        none()
    );
}

#[tokio::test]
async fn theft_is_rendered_as_an_expired_session() {
    let TestApp { app, .. } = app();
    let (_, r1) = sign_in(&app, "user-1").await;
    let _r2 = rotate(&app, &r1).await;

    let req = post("/auth/session/refresh")
        .cookie("sRefreshToken", r1.refresh_token())
        .finish();
    let mut res = HttpResponse::new();
    assert!(app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());
    assert_eq!(res.status(), 401);
    assert_eq!(res.body().unwrap()["message"], "token theft detected");
    assert_tokens_were_cleared(&res);
}

#[tokio::test]
async fn concurrent_refreshes_are_tolerated_with_promote_on_use() {
    let memory = InMemoryCore::new().rotation_policy(RotationPolicy::PromoteOnUse);
    let TestApp { app, .. } = app_with(memory, SessionConfig::default(), |b| b);
    let (_, r1) = sign_in(&app, "user-1").await;

    // Two tabs refresh with the same token before either uses the result.
    let _tab1 = rotate(&app, &r1).await;
    let tab2 = rotate(&app, &r1).await;

    // Using the token obtained by the second tab commits it.
    let tab3 = rotate(&app, &tab2).await;
    assert_ne!(tab3.refresh_token(), tab2.refresh_token());

    // From now on, the original token is retired.
    let (outcome, _) = refresh_with(&app, r1.refresh_token(), |r| r).await;
    assert_that!(&outcome.unwrap_err(), has_kind("TOKEN_THEFT_DETECTED"));
}

#[tokio::test]
async fn using_the_new_access_token_commits_the_refresh_with_promote_on_use() {
    let memory = InMemoryCore::new().rotation_policy(RotationPolicy::PromoteOnUse);
    let TestApp { app, calls, .. } = app_with(memory, SessionConfig::default(), |b| b);
    let (_, r1) = sign_in(&app, "user-1").await;
    let r2 = rotate(&app, &r1).await;
    calls.reset_operation_log().await;

    // The child access token carries its parent refresh token: the core has to see it once.
    let session = app
        .session()
        .get_session_without_request_response(
            Some(r2.access_token()),
            None,
            VerifySessionOptions::default(),
            &UserContext::new(),
        )
        .await
        .unwrap()
        .unwrap();
    let committed = session.access_token().to_owned();
    assert_ne!(committed, r2.access_token());
    assert!(calls.operation_log().await.contains(&"verify".to_owned()));

    let (outcome, _) = refresh_with(&app, r1.refresh_token(), |r| r).await;
    assert_that!(&outcome.unwrap_err(), has_kind("TOKEN_THEFT_DETECTED"));
}

#[tokio::test]
async fn refreshing_without_a_refresh_token_keeps_the_client_tokens() {
    let TestApp { app, calls, .. } = app();

    let req = post("/auth/session/refresh").finish();
    let mut res = HttpResponse::new();
    let err = app
        .session()
        .refresh_session(&req, &mut res, &UserContext::new())
        .await
        .unwrap_err();
    let SessionError::Unauthorised { clear_tokens, .. } = err else {
        panic!("Expected the refresh to be unauthorised, got {err:?}");
    };
    assert!(!clear_tokens);
    assert!(res.cookies().is_empty());
    calls.assert_core_was_untouched().await;
}

#[tokio::test]
async fn an_unknown_refresh_token_clears_the_client_tokens() {
    let TestApp { app, .. } = app();

    let (outcome, res) = refresh_with(&app, "not-a-session.abc", |r| r).await;
    assert_that!(&outcome.unwrap_err(), has_kind("UNAUTHORISED"));
    assert_tokens_were_cleared(&res);
}

#[tokio::test]
async fn header_based_refreshes_answer_with_headers() {
    let TestApp { app, .. } = app();
    let req = post("/login").auth_mode("header").finish();
    let mut res = HttpResponse::new();
    app.session()
        .create_new_session(
            &req,
            &mut res,
            "public",
            "user-1",
            Default::default(),
            serde_json::json!({}),
            &UserContext::new(),
        )
        .await
        .unwrap();
    let tokens = ClientTokens::from_response(&res);

    let req = post("/auth/session/refresh")
        .bearer(tokens.refresh_token())
        .finish();
    let mut res = HttpResponse::new();
    app.session()
        .refresh_session(&req, &mut res, &UserContext::new())
        .await
        .unwrap();
    assert_that!(res.cookie("sRefreshToken"), none());
    assert_that!(res.header("st-refresh-token"), some(not(eq(tokens.refresh_token()))));
}

#[tokio::test]
async fn the_custom_header_is_required_to_refresh_cookie_sessions() {
    let mut config = SessionConfig::default();
    config.anti_csrf = Some(AntiCsrfMode::ViaCustomHeader);
    let TestApp { app, calls, .. } = app_with(InMemoryCore::new(), config, |b| b);
    let (_, tokens) = sign_in(&app, "user-1").await;
    calls.reset_operation_log().await;

    let (outcome, res) = refresh_with(&app, tokens.refresh_token(), |r| r).await;
    let err = outcome.unwrap_err();
    let SessionError::Unauthorised { clear_tokens, .. } = err else {
        panic!("Expected the refresh to be unauthorised, got {err:?}");
    };
    assert!(!clear_tokens);
    assert!(res.cookies().is_empty());
    calls.assert_core_was_untouched().await;

    let (outcome, _) = refresh_with(&app, tokens.refresh_token(), RequestBuilder::rid).await;
    outcome.unwrap();
}

#[tokio::test]
async fn the_anti_csrf_token_is_required_to_refresh_with_via_token() {
    let mut config = SessionConfig::default();
    config.anti_csrf = Some(AntiCsrfMode::ViaToken);
    let TestApp { app, .. } = app_with(InMemoryCore::new(), config, |b| b);
    let (_, tokens) = sign_in(&app, "user-1").await;
    let anti_csrf = tokens.anti_csrf_token.clone().unwrap();

    let (outcome, _) = refresh_with(&app, tokens.refresh_token(), |r| r.anti_csrf("wrong")).await;
    assert_that!(&outcome.unwrap_err(), has_kind("UNAUTHORISED"));

    let (outcome, res) = refresh_with(&app, tokens.refresh_token(), |r| r.anti_csrf(&anti_csrf)).await;
    outcome.unwrap();
    assert_that!(res.header("anti-csrf"), some(not(eq(anti_csrf.as_str()))));
}
