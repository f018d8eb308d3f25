//! Session claims: named pieces of access-token payload state, owned by independent recipes.
//!
//! A claim knows how to compute its authoritative value ([`SessionClaim::fetch_value`]),
//! how to store it inside the access token payload and how to read it back.
//! Validators ([`SessionClaimValidator`]) are pure rules over the stored value: they are built
//! from a claim (e.g. [`PrimitiveClaim::has_value`]) and return a machine-readable reason on
//! failure, so that frontends can render precise remediation steps.
//!
//! Claims that are missing from the payload are considered valid by default, so that access
//! tokens issued before a claim existed keep working.
//! Validators that must fail closed say so in their documentation
//! (see [`ClaimValueValidator::require_presence`]).
use std::fmt::Debug;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Payload;
use crate::context::UserContext;
use crate::core::Core;

mod array;
mod primitive;
mod registry;
mod validation;
mod validator;

pub use array::PrimitiveArrayClaim;
pub use primitive::{BooleanClaim, ClaimFetcher, PrimitiveClaim};
pub use registry::ClaimRegistry;
pub use validation::{ClaimValidationFailure, ClaimsValidation, ValidationMode, validate_claims};
pub use validator::ClaimValueValidator;

/// Everything a claim may need to compute its value.
#[derive(Debug, Clone)]
pub struct ClaimFetchInput {
    pub user_id: String,
    pub recipe_user_id: String,
    pub tenant_id: String,
    /// The payload of the access token, as it is right before the fetch.
    pub current_payload: Payload,
    pub core: Core,
    pub user_context: UserContext,
}

#[async_trait::async_trait]
/// A named piece of session state embedded in the access token payload.
///
/// Keys are global: two different claims can't share a key within the same application.
pub trait SessionClaim: Debug + Send + Sync {
    fn key(&self) -> &str;

    /// Compute the authoritative value for the user.
    ///
    /// `None` means "no value": nothing is added to the payload.
    async fn fetch_value(&self, input: &ClaimFetchInput) -> Result<Option<Value>, anyhow::Error>;

    /// Embed `value` into `payload`, overwriting any previous value for this claim.
    fn add_to_payload(&self, payload: &mut Payload, value: Value, now_ms: i64);

    fn get_value_from_payload(&self, payload: &Payload) -> Option<Value>;

    /// When the value stored in `payload` was fetched, in milliseconds since the Unix epoch.
    fn last_fetched_at(&self, _payload: &Payload) -> Option<i64> {
        None
    }

    fn remove_from_payload(&self, payload: &mut Payload) {
        payload.remove(self.key());
    }

    /// Express the removal of this claim as a merge update: the key is tombstoned with `null`.
    fn remove_from_payload_by_merge(&self, payload: &mut Payload) {
        payload.insert(self.key().to_owned(), Value::Null);
    }

    /// The payload update that sets this claim to its freshly fetched value.
    async fn build(&self, input: &ClaimFetchInput, now_ms: i64) -> Result<Payload, anyhow::Error> {
        let mut update = Payload::new();
        if let Some(value) = self.fetch_value(input).await? {
            self.add_to_payload(&mut update, value, now_ms);
        }
        Ok(update)
    }
}

/// A claim whose value has a known Rust type.
pub trait TypedClaim: SessionClaim {
    type Value: Serialize + DeserializeOwned + Send;
}

/// The outcome of a single validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
}

impl ClaimValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: Value) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }
}

/// A named rule bound to one claim.
pub trait SessionClaimValidator: Debug + Send + Sync {
    /// Identifies the validator in failure reports. Defaults to the claim key for built-in validators.
    fn id(&self) -> &str;

    fn claim(&self) -> &Arc<dyn SessionClaim>;

    /// Whether the claim value must be re-fetched before validating `payload`.
    fn should_refetch(&self, payload: &Payload, now_ms: i64) -> bool;

    fn validate(&self, payload: &Payload, now_ms: i64) -> ClaimValidationResult;
}

pub(crate) fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}
