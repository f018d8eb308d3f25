use googletest::assert_that;
use googletest::prelude::{eq, some};
use supertokens::UserContext;
use supertokens::framework::http::HttpResponse;
use supertokens::session::VerifySessionOptions;

use crate::assertions::is_removal_cookie;
use crate::fixtures::{TestApp, app};
use crate::helpers::get;
use crate::sign_in;

#[tokio::test]
async fn revoking_by_handle_is_idempotent() {
    let TestApp { app, memory, .. } = app();
    let ctx = UserContext::new();
    let (handle, _) = sign_in(&app, "user-1").await;

    assert!(app.session().revoke_session(&handle, &ctx).await.unwrap());
    assert!(!app.session().revoke_session(&handle, &ctx).await.unwrap());
    assert!(!app.session().revoke_session("never-existed", &ctx).await.unwrap());
    assert_eq!(memory.session_count().await, 0);
}

#[tokio::test]
async fn revoking_through_the_container_is_idempotent() {
    let TestApp { app, memory, calls } = app();
    let (_, tokens) = sign_in(&app, "user-1").await;

    let req = get("/logout").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    let mut session = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &UserContext::new())
        .await
        .unwrap()
        .unwrap();
    calls.reset_operation_log().await;

    session.revoke_session().await.unwrap();
    session.revoke_session().await.unwrap();
    // Only the first call reached the core.
    assert_eq!(calls.operation_log().await.len(), 1);
    assert_eq!(memory.session_count().await, 0);

    assert_that!(res.cookie("sAccessToken").unwrap(), is_removal_cookie());
    assert_that!(res.cookie("sRefreshToken").unwrap(), is_removal_cookie());
    assert_that!(res.header("front-token"), some(eq("remove")));
}

#[tokio::test]
async fn revoking_a_session_that_is_already_gone_is_not_an_error() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let (handle, tokens) = sign_in(&app, "user-1").await;

    let mut session = app
        .session()
        .get_session_without_request_response(
            Some(tokens.access_token()),
            None,
            VerifySessionOptions::default(),
            &ctx,
        )
        .await
        .unwrap()
        .unwrap();
    assert!(app.session().revoke_session(&handle, &ctx).await.unwrap());

    session.revoke_session().await.unwrap();
}

#[tokio::test]
async fn a_closed_response_is_left_untouched() {
    let TestApp { app, .. } = app();
    let (_, tokens) = sign_in(&app, "user-1").await;

    let req = get("/logout").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    res.close();
    let mut session = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &UserContext::new())
        .await
        .unwrap()
        .unwrap();
    session.revoke_session().await.unwrap();

    assert!(res.cookies().is_empty());
    assert!(res.headers().is_empty());
}
