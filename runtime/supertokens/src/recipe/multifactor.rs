//! Multi-factor authentication.
//!
//! The `st-mfa` claim tracks which factors the user completed in the current session
//! and which ones they still have to complete:
//!
//! ```json
//! { "st-mfa": { "c": { "emailpassword": 1700000000 }, "next": ["totp"] } }
//! ```
//!
//! `c` maps each completed factor to the time it was completed, in seconds since the Unix epoch.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Recipe;
use crate::Payload;
use crate::app::SessionWiring;
use crate::app::errors::ConfigError;
use crate::claims::{ClaimFetchInput, ClaimValueValidator, SessionClaim, TypedClaim, now_ms};
use crate::session::{SessionContainer, SessionError};

pub const MFA_CLAIM_KEY: &str = "st-mfa";

/// The value of the `st-mfa` claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaClaimValue {
    /// Completed factors, with their completion time in seconds since the Unix epoch.
    #[serde(default)]
    pub c: BTreeMap<String, i64>,
    /// Factors that still have to be completed.
    #[serde(default)]
    pub next: Vec<String>,
}

/// The `st-mfa` claim.
///
/// The default value requires no secondary factor.
#[derive(Debug, Clone, Default)]
pub struct MultiFactorAuthClaim {
    required_secondary_factors: Arc<Vec<String>>,
}

impl MultiFactorAuthClaim {
    pub fn new(required_secondary_factors: Vec<String>) -> Self {
        Self {
            required_secondary_factors: Arc::new(required_secondary_factors),
        }
    }

    /// Valid if every factor in `factors` has been completed.
    ///
    /// A session without the claim fails validation, unless `factors` is empty.
    /// The failure reason lists the missing factors under `choices`.
    pub fn has_completed_factors(&self, factors: Vec<String>) -> ClaimValueValidator<MfaClaimValue> {
        let require_presence = !factors.is_empty();
        let validator = ClaimValueValidator::new(
            Arc::new(self.clone()),
            move |value: &MfaClaimValue| {
                let missing: Vec<&String> = factors
                    .iter()
                    .filter(|factor| !value.c.contains_key(*factor))
                    .collect();
                if missing.is_empty() {
                    None
                } else {
                    Some(json!({
                        "message": "not all required factors have been completed",
                        "choices": missing,
                    }))
                }
            },
        )
        .with_id(MFA_CLAIM_KEY);
        if require_presence {
            validator.require_presence()
        } else {
            validator
        }
    }

    /// Valid if no factor is left to complete, according to the claim itself.
    pub fn has_completed_required_factors(&self) -> ClaimValueValidator<MfaClaimValue> {
        ClaimValueValidator::new(Arc::new(self.clone()), |value: &MfaClaimValue| {
            (!value.next.is_empty()).then(|| {
                json!({
                    "message": "not all required factors have been completed",
                    "choices": value.next,
                })
            })
        })
        .require_presence()
    }

    fn stored(payload: &Payload) -> MfaClaimValue {
        payload
            .get(MFA_CLAIM_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SessionClaim for MultiFactorAuthClaim {
    fn key(&self) -> &str {
        MFA_CLAIM_KEY
    }

    /// Completed factors are carried over from the current payload.
    async fn fetch_value(&self, input: &ClaimFetchInput) -> Result<Option<Value>, anyhow::Error> {
        let completed = Self::stored(&input.current_payload).c;
        let next = self
            .required_secondary_factors
            .iter()
            .filter(|factor| !completed.contains_key(*factor))
            .cloned()
            .collect();
        let value = MfaClaimValue { c: completed, next };
        Ok(Some(serde_json::to_value(value)?))
    }

    fn add_to_payload(&self, payload: &mut Payload, value: Value, _now_ms: i64) {
        payload.insert(MFA_CLAIM_KEY.to_owned(), value);
    }

    fn get_value_from_payload(&self, payload: &Payload) -> Option<Value> {
        payload.get(MFA_CLAIM_KEY).cloned()
    }
}

impl TypedClaim for MultiFactorAuthClaim {
    type Value = MfaClaimValue;
}

/// The multi-factor authentication recipe.
#[derive(Debug, Clone)]
pub struct MultiFactorAuth {
    claim: MultiFactorAuthClaim,
    enforce: bool,
}

impl MultiFactorAuth {
    /// Every new session must complete `required_secondary_factors` on top of the first factor.
    pub fn new(required_secondary_factors: Vec<String>) -> Self {
        Self {
            claim: MultiFactorAuthClaim::new(required_secondary_factors),
            enforce: false,
        }
    }

    /// Reject sessions that haven't completed their required factors on every verification.
    pub fn enforce_on_every_request(mut self) -> Self {
        self.enforce = true;
        self
    }

    pub fn claim(&self) -> &MultiFactorAuthClaim {
        &self.claim
    }
}

impl Recipe for MultiFactorAuth {
    fn id(&self) -> &str {
        "multifactorauth"
    }

    fn wire_session(&self, wiring: &mut SessionWiring<'_>) -> Result<(), ConfigError> {
        wiring.add_claim(Arc::new(self.claim.clone()))?;
        if self.enforce {
            wiring.add_claim_validator(Arc::new(self.claim.has_completed_required_factors()));
        }
        Ok(())
    }
}

/// Mark `factor_id` as completed in `session`.
#[tracing::instrument(name = "Complete MFA factor", level = tracing::Level::DEBUG, skip(session), fields(session.handle = session.handle()))]
pub async fn complete_factor_in_session(
    session: &mut SessionContainer<'_>,
    factor_id: &str,
) -> Result<(), SessionError> {
    let claim = MultiFactorAuthClaim::default();
    let mut value = session.get_claim_value(&claim)?.unwrap_or_default();
    value.c.insert(factor_id.to_owned(), now_ms() / 1000);
    value.next.retain(|factor| factor != factor_id);
    session.set_claim_value(&claim, value).await
}
