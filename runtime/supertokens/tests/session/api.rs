use googletest::assert_that;
use googletest::prelude::{eq, some};
use serde_json::json;
use supertokens::UserContext;
use supertokens::framework::http::HttpResponse;

use crate::assertions::is_removal_cookie;
use crate::fixtures::{TestApp, app};
use crate::helpers::{ClientTokens, get, post};
use crate::sign_in;

#[tokio::test]
async fn the_refresh_route_rotates_the_tokens() {
    let TestApp { app, .. } = app();
    let (_, tokens) = sign_in(&app, "user-1").await;

    let req = post("/auth/session/refresh")
        .refresh_cookie(&tokens)
        .finish();
    let mut res = HttpResponse::new();
    assert!(app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());

    assert_eq!(res.status(), 200);
    assert_eq!(res.body(), Some(&json!({})));
    let refreshed = ClientTokens::from_response(&res);
    assert_ne!(refreshed.refresh_token(), tokens.refresh_token());

    let response = res.into_response();
    let set_cookie: Vec<_> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect();
    assert!(set_cookie.iter().any(|c| c.starts_with("sAccessToken=")));
    assert!(
        set_cookie
            .iter()
            .any(|c| c.starts_with("sRefreshToken=") && c.contains("Path=/auth/session/refresh"))
    );
}

#[tokio::test]
async fn the_refresh_route_rejects_requests_without_a_refresh_token() {
    let TestApp { app, .. } = app();

    let req = post("/auth/session/refresh").finish();
    let mut res = HttpResponse::new();
    assert!(app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());
    assert_eq!(res.status(), 401);
    assert_eq!(res.body(), Some(&json!({ "message": "unauthorised" })));
}

#[tokio::test]
async fn the_signout_route_revokes_the_session() {
    let TestApp { app, memory, .. } = app();
    let (_, tokens) = sign_in(&app, "user-1").await;

    let req = post("/auth/signout").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    assert!(app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());

    assert_eq!(res.status(), 200);
    assert_eq!(res.body(), Some(&json!({ "status": "OK" })));
    assert_that!(res.cookie("sAccessToken").unwrap(), is_removal_cookie());
    assert_that!(res.cookie("sRefreshToken").unwrap(), is_removal_cookie());
    assert_that!(res.header("front-token"), some(eq("remove")));
    assert_eq!(memory.session_count().await, 0);
}

#[tokio::test]
async fn signing_out_without_a_session_succeeds() {
    let TestApp { app, calls, .. } = app();

    let req = post("/auth/signout").finish();
    let mut res = HttpResponse::new();
    assert!(app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());
    assert_eq!(res.body(), Some(&json!({ "status": "OK" })));
    calls.assert_core_was_untouched().await;
}

#[tokio::test]
async fn other_routes_are_left_to_the_application() {
    let TestApp { app, .. } = app();

    for req in [
        get("/auth/session/refresh").finish(),
        post("/auth/unknown").finish(),
        post("/session/refresh").finish(),
        post("/api/signout").finish(),
    ] {
        let mut res = HttpResponse::new();
        assert!(!app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());
        assert_eq!(res.body(), None);
        assert!(res.cookies().is_empty());
    }
}

#[tokio::test]
async fn trailing_slashes_and_query_strings_are_ignored_when_routing() {
    let TestApp { app, .. } = app();

    let req = post("/auth/signout/?redirect=home").finish();
    let mut res = HttpResponse::new();
    assert!(app.handle_request(&req, &mut res, &UserContext::new()).await.unwrap());
}
