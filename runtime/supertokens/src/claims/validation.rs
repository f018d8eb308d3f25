use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::{ClaimFetchInput, SessionClaimValidator, now_ms};
use crate::Payload;

/// How many validators run when one of them fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Stop at the first failing validator.
    #[default]
    ShortCircuit,
    /// Run every validator and report all failures.
    All,
}

/// A validator that rejected the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimValidationFailure {
    pub id: String,
    pub reason: Value,
}

/// The outcome of [`validate_claims`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsValidation {
    pub failures: Vec<ClaimValidationFailure>,
    /// Values that were re-fetched while validating.
    ///
    /// They should be merged into the access token payload, whether validation succeeded or not.
    pub payload_update: Payload,
}

impl ClaimsValidation {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run `validators`, in order, against `payload`.
///
/// Each validator may ask for its claim to be re-fetched first: the fresh value is used
/// by that validator and by the ones that follow, and it's collected into
/// [`ClaimsValidation::payload_update`].
/// Fetch failures are propagated.
#[tracing::instrument(name = "Validate session claims", level = tracing::Level::DEBUG, skip_all, fields(n_validators = validators.len()))]
pub async fn validate_claims(
    validators: &[Arc<dyn SessionClaimValidator>],
    payload: &Payload,
    input: &ClaimFetchInput,
    mode: ValidationMode,
) -> Result<ClaimsValidation, anyhow::Error> {
    let mut current = payload.clone();
    let mut outcome = ClaimsValidation::default();
    for validator in validators {
        let now = now_ms();
        if validator.should_refetch(&current, now) {
            let mut fetch_input = input.clone();
            fetch_input.current_payload = current.clone();
            let update = validator.claim().build(&fetch_input, now).await?;
            tracing::trace!(
                claim.key = validator.claim().key(),
                refetched = !update.is_empty(),
                "Refetched claim value"
            );
            for (key, value) in update {
                current.insert(key.clone(), value.clone());
                outcome.payload_update.insert(key, value);
            }
        }
        let result = validator.validate(&current, now);
        if !result.is_valid {
            outcome.failures.push(ClaimValidationFailure {
                id: validator.id().to_owned(),
                reason: result.reason.unwrap_or(Value::Null),
            });
            if mode == ValidationMode::ShortCircuit {
                break;
            }
        }
    }
    Ok(outcome)
}
