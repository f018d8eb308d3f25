use std::sync::Arc;

use googletest::assert_that;
use googletest::prelude::{empty, eq, len, none, some};
use serde_json::json;
use supertokens::app::SessionWiring;
use supertokens::app::errors::ConfigError;
use supertokens::claims::{
    BooleanClaim, ClaimFetchInput, PrimitiveClaim, SessionClaimValidator, ValidationMode,
};
use supertokens::core::Core;
use supertokens::framework::http::HttpResponse;
use supertokens::recipe::multifactor::complete_factor_in_session;
use supertokens::recipe::{MfaClaimValue, MultiFactorAuth, MultiFactorAuthClaim, Recipe};
use supertokens::session::{SessionConfig, VerifySessionOptions};
use supertokens::{Payload, SuperTokens, UserContext};
use supertokens_memory_core::InMemoryCore;

use crate::assertions::has_kind;
use crate::fixtures::{TestApp, app, app_info, app_with};
use crate::helpers::{ClientTokens, get};
use crate::sign_in;

fn flag(key: &'static str) -> BooleanClaim {
    BooleanClaim::new(key, |_input: ClaimFetchInput| async move {
        Ok::<_, anyhow::Error>(Some(true))
    })
}

/// A recipe that registers a single boolean claim.
#[derive(Debug)]
struct Flag {
    id: &'static str,
    claim: BooleanClaim,
    enforce: bool,
}

impl Recipe for Flag {
    fn id(&self) -> &str {
        self.id
    }

    fn wire_session(&self, wiring: &mut SessionWiring<'_>) -> Result<(), ConfigError> {
        if self.enforce {
            wiring.add_claim_validator(Arc::new(self.claim.is_true()));
        }
        wiring.add_claim(Arc::new(self.claim.clone()))
    }
}

#[tokio::test]
async fn claim_values_round_trip_through_the_session() {
    let TestApp { app, .. } = app();
    let (_, tokens) = sign_in(&app, "user-1").await;
    let plan = PrimitiveClaim::<String>::new("plan", |_input: ClaimFetchInput| async move {
        Ok::<_, anyhow::Error>(Some("free".to_owned()))
    });

    let req = get("/upgrade").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    let mut session = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &UserContext::new())
        .await
        .unwrap()
        .unwrap();
    assert_that!(session.get_claim_value(&plan).unwrap(), none());

    session
        .set_claim_value(&plan, "premium".to_owned())
        .await
        .unwrap();
    assert_that!(
        session.get_claim_value(&plan).unwrap(),
        some(eq("premium"))
    );
    let updated = session.get_all_session_tokens_dangerously();
    assert_ne!(updated.access_token, tokens.access_token());

    // The new access token was attached to the response and carries the claim.
    let refreshed = ClientTokens::from_response(&res);
    assert_ne!(refreshed.access_token(), tokens.access_token());
    let session = app
        .session()
        .get_session_without_request_response(
            Some(refreshed.access_token()),
            None,
            VerifySessionOptions::default(),
            &UserContext::new(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_that!(
        session.get_claim_value(&plan).unwrap(),
        some(eq("premium"))
    );
}

#[tokio::test]
async fn claim_values_round_trip_by_session_handle() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let (handle, _) = sign_in(&app, "user-1").await;
    let claim = flag("beta");

    assert!(app.session().set_claim_value(&handle, &claim, false, &ctx).await.unwrap());
    assert_that!(
        app.session().get_claim_value(&handle, &claim, &ctx).await.unwrap(),
        some(eq(false))
    );

    assert!(app.session().remove_claim(&handle, &claim, &ctx).await.unwrap());
    assert_that!(
        app.session().get_claim_value(&handle, &claim, &ctx).await.unwrap(),
        none()
    );
}

#[tokio::test]
async fn claims_of_a_missing_session_read_as_absent() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let claim = flag("beta");

    assert_that!(
        app.session().get_claim_value("missing", &claim, &ctx).await.unwrap(),
        none()
    );
    assert!(!app.session().set_claim_value("missing", &claim, true, &ctx).await.unwrap());
    assert_that!(
        app.session()
            .validate_claims_for_session_handle("missing", None, ValidationMode::All, &ctx)
            .await
            .unwrap(),
        none()
    );
}

#[tokio::test]
async fn an_absent_claim_is_valid_unless_presence_is_required() {
    let claim = flag("beta");
    let empty = Payload::new();

    assert!(claim.is_true().validate(&empty, 0).is_valid);
    assert!(claim.has_value(false).validate(&empty, 0).is_valid);

    let strict = claim.is_true().require_presence().validate(&empty, 0);
    assert!(!strict.is_valid);
    assert_eq!(strict.reason.unwrap()["message"], json!("value does not exist"));
}

#[tokio::test]
async fn merging_null_deletes_a_key() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let payload = json!({ "theme": "dark", "lang": "en" })
        .as_object()
        .cloned()
        .unwrap();
    let (handle, tokens) = crate::sign_in_with_payload(&app, "user-1", payload).await;

    let update = json!({ "theme": null, "beta": true }).as_object().cloned().unwrap();
    assert!(app.session().merge_into_access_token_payload(&handle, &update, &ctx).await.unwrap());

    let info = app
        .session()
        .get_session_information(&handle, &ctx)
        .await
        .unwrap()
        .unwrap();
    let payload = info.custom_claims_in_access_token_payload;
    assert!(!payload.contains_key("theme"));
    assert_eq!(payload["lang"], json!("en"));
    assert_eq!(payload["beta"], json!(true));

    // The same holds for a session obtained from a request.
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
    let update = json!({ "lang": null }).as_object().cloned().unwrap();
    session.merge_into_access_token_payload(update).await.unwrap();
    assert!(!session.access_token_payload().contains_key("lang"));
}

#[tokio::test]
async fn protected_keys_cannot_be_overwritten_by_a_merge() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let mut session = app
        .session()
        .create_new_session_without_request_response(
            "public",
            "user-1",
            Payload::new(),
            json!({}),
            false,
            &ctx,
        )
        .await
        .unwrap();
    let handle = session.handle().to_owned();

    let update = json!({ "sessionHandle": "forged", "sub": "someone-else" })
        .as_object()
        .cloned()
        .unwrap();
    session.merge_into_access_token_payload(update).await.unwrap();
    assert_eq!(session.handle(), handle);
    assert_eq!(session.user_id(), "user-1");
}

#[tokio::test]
async fn registered_claims_are_added_to_new_sessions() {
    let claim = flag("beta");
    let TestApp { app, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), |b| {
        b.recipe(Flag {
            id: "beta",
            claim: flag("beta"),
            enforce: false,
        })
    });
    let ctx = UserContext::new();
    let session = app
        .session()
        .create_new_session_without_request_response(
            "public",
            "user-1",
            Payload::new(),
            json!({}),
            false,
            &ctx,
        )
        .await
        .unwrap();
    assert_that!(session.get_claim_value(&claim).unwrap(), some(eq(true)));
    assert!(claim.get_last_refetch_time(session.access_token_payload()).is_some());
}

#[tokio::test]
async fn duplicate_claim_keys_are_rejected_when_building_the_app() {
    let err = SuperTokens::builder(app_info(), Core::new(InMemoryCore::new()))
        .recipe(Flag {
            id: "first",
            claim: flag("beta"),
            enforce: false,
        })
        .recipe(Flag {
            id: "second",
            claim: flag("beta"),
            enforce: false,
        })
        .build()
        .unwrap_err();

    let ConfigError::DuplicateClaimKey {
        key,
        first_recipe,
        second_recipe,
    } = err
    else {
        panic!("Expected a duplicate claim key error, got {err:?}");
    };
    assert_eq!(key, "beta");
    assert_eq!(first_recipe, "first");
    assert_eq!(second_recipe, "second");
}

#[tokio::test]
async fn global_validators_reject_sessions_with_invalid_claims() {
    let TestApp { app, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), |b| {
        b.recipe(Flag {
            id: "beta",
            claim: flag("beta"),
            enforce: true,
        })
    });
    let ctx = UserContext::new();
    let (handle, tokens) = sign_in(&app, "user-1").await;
    assert!(app.session().set_claim_value(&handle, &flag("beta"), false, &ctx).await.unwrap());
    // The current access token still carries the old value: refresh it.
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
    session.set_claim_value(&flag("beta"), false).await.unwrap();
    let access_token = session.access_token().to_owned();
    drop(session);

    let req = get("/beta").cookie("sAccessToken", &access_token).finish();
    let mut res = HttpResponse::new();
    let err = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &ctx)
        .await
        .unwrap_err();
    assert_that!(&err, has_kind("INVALID_CLAIMS"));

    app.session().handle_error(&req, &mut res, err).unwrap();
    assert_eq!(res.status(), 403);
    let body = res.body().unwrap();
    assert_eq!(body["message"], json!("invalid claim"));
    assert_eq!(body["claimValidationErrors"][0]["id"], json!("beta"));

    // Callers can opt out of the global validators.
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .get_session(
            &req,
            &mut res,
            VerifySessionOptions::default().claim_validators(Vec::new()),
            &ctx,
        )
        .await
        .unwrap();
    assert!(session.is_some());
}

#[tokio::test]
async fn validation_by_handle_reports_every_failure() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let (handle, _) = sign_in(&app, "user-1").await;
    let beta = flag("beta");
    let alpha = flag("alpha");
    assert!(app.session().set_claim_value(&handle, &beta, false, &ctx).await.unwrap());
    assert!(app.session().set_claim_value(&handle, &alpha, false, &ctx).await.unwrap());

    let validators: Vec<Arc<dyn SessionClaimValidator>> =
        vec![Arc::new(beta.is_true()), Arc::new(alpha.is_true())];
    let failures = app
        .session()
        .validate_claims_for_session_handle(&handle, Some(validators.as_slice()), ValidationMode::All, &ctx)
        .await
        .unwrap()
        .unwrap();
    assert_that!(failures, len(eq(2)));

    let failures = app
        .session()
        .validate_claims_for_session_handle(
            &handle,
            Some(validators.as_slice()),
            ValidationMode::ShortCircuit,
            &ctx,
        )
        .await
        .unwrap()
        .unwrap();
    assert_that!(failures, len(eq(1)));
    assert_eq!(failures[0].id, "beta");

    assert!(app.session().set_claim_value(&handle, &beta, true, &ctx).await.unwrap());
    assert!(app.session().set_claim_value(&handle, &alpha, true, &ctx).await.unwrap());
    let failures = app
        .session()
        .validate_claims_for_session_handle(&handle, Some(validators.as_slice()), ValidationMode::All, &ctx)
        .await
        .unwrap()
        .unwrap();
    assert_that!(failures, empty());
}

#[tokio::test]
async fn missing_claims_are_fetched_during_validation() {
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let (handle, _) = sign_in(&app, "user-1").await;
    let beta = flag("beta");

    let validators: Vec<Arc<dyn SessionClaimValidator>> = vec![Arc::new(beta.is_true())];
    let failures = app
        .session()
        .validate_claims_for_session_handle(&handle, Some(validators.as_slice()), ValidationMode::All, &ctx)
        .await
        .unwrap()
        .unwrap();
    assert_that!(failures, empty());
    // The fetched value was persisted.
    assert_that!(
        app.session().get_claim_value(&handle, &beta, &ctx).await.unwrap(),
        some(eq(true))
    );
}

#[tokio::test]
async fn completing_the_required_factor_satisfies_mfa() {
    let claim = MultiFactorAuthClaim::new(vec!["totp".into()]);
    let TestApp { app, .. } = app();
    let ctx = UserContext::new();
    let mut session = app
        .session()
        .create_new_session_without_request_response(
            "public",
            "user-1",
            Payload::new(),
            json!({}),
            false,
            &ctx,
        )
        .await
        .unwrap();
    session
        .set_claim_value(
            &claim,
            MfaClaimValue {
                c: Default::default(),
                next: vec!["totp".into()],
            },
        )
        .await
        .unwrap();

    let validators: Vec<Arc<dyn SessionClaimValidator>> =
        vec![Arc::new(claim.has_completed_factors(vec!["totp".into()]))];
    let err = session
        .assert_claims(&validators, ValidationMode::ShortCircuit)
        .await
        .unwrap_err();
    let supertokens::session::SessionError::InvalidClaims { failures } = err else {
        panic!("Expected the MFA validator to fail, got {err:?}");
    };
    assert_that!(failures, len(eq(1)));
    assert_eq!(failures[0].reason["choices"], json!(["totp"]));

    complete_factor_in_session(&mut session, "totp").await.unwrap();
    session
        .assert_claims(&validators, ValidationMode::ShortCircuit)
        .await
        .unwrap();
    let value = session.get_claim_value(&claim).unwrap().unwrap();
    assert!(value.c.contains_key("totp"));
    assert_that!(value.next, empty());
}

#[tokio::test]
async fn mfa_can_be_enforced_on_every_request() {
    let TestApp { app, .. } = app_with(InMemoryCore::new(), SessionConfig::default(), |b| {
        b.recipe(MultiFactorAuth::new(vec!["totp".into()]).enforce_on_every_request())
    });
    let ctx = UserContext::new();
    let (_, tokens) = sign_in(&app, "user-1").await;

    let req = get("/dashboard").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    let err = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &ctx)
        .await
        .unwrap_err();
    let supertokens::session::SessionError::InvalidClaims { failures } = err else {
        panic!("Expected the MFA validator to fail, got {err:?}");
    };
    assert_eq!(failures[0].reason["choices"], json!(["totp"]));

    // The second factor is completed on a route that skips the global validators.
    let mut res = HttpResponse::new();
    let mut session = app
        .session()
        .get_session(
            &req,
            &mut res,
            VerifySessionOptions::default().claim_validators(Vec::new()),
            &ctx,
        )
        .await
        .unwrap()
        .unwrap();
    complete_factor_in_session(&mut session, "totp").await.unwrap();
    drop(session);
    let tokens = ClientTokens::from_response(&res);

    let req = get("/dashboard").access_cookie(&tokens).finish();
    let mut res = HttpResponse::new();
    let session = app
        .session()
        .get_session(&req, &mut res, VerifySessionOptions::default(), &ctx)
        .await
        .unwrap();
    assert!(session.is_some());
}
