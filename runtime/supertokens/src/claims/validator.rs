use std::borrow::Cow;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{ClaimValidationResult, SessionClaim, SessionClaimValidator};
use crate::Payload;

/// A validator that checks the value of a claim against a predicate.
///
/// Built-in claims expose factories that return a `ClaimValueValidator`
/// (e.g. [`PrimitiveClaim::has_value`](super::PrimitiveClaim::has_value)),
/// which can then be customised:
///
/// - [`max_age`](Self::max_age) treats values fetched too long ago as invalid,
///   and triggers a refetch before validating.
/// - [`require_presence`](Self::require_presence) makes the validator fail when
///   the claim is missing from the payload. By default a missing claim is valid.
/// - [`refetch_if_invalid_after`](Self::refetch_if_invalid_after) refetches
///   an invalid value, at most once per interval, in case it changed upstream.
pub struct ClaimValueValidator<T> {
    id: Cow<'static, str>,
    claim: Arc<dyn SessionClaim>,
    max_age: Option<Duration>,
    require_presence: bool,
    refetch_if_invalid_after: Option<Duration>,
    check: Arc<dyn Fn(&T) -> Option<Value> + Send + Sync>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for ClaimValueValidator<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            claim: self.claim.clone(),
            max_age: self.max_age,
            require_presence: self.require_presence,
            refetch_if_invalid_after: self.refetch_if_invalid_after,
            check: self.check.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> Debug for ClaimValueValidator<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimValueValidator")
            .field("id", &self.id)
            .field("claim", &self.claim.key())
            .field("max_age", &self.max_age)
            .field("require_presence", &self.require_presence)
            .field("refetch_if_invalid_after", &self.refetch_if_invalid_after)
            .finish_non_exhaustive()
    }
}

impl<T> ClaimValueValidator<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Build a validator for `claim`.
    ///
    /// `check` returns `None` if the value is acceptable, or a JSON reason otherwise.
    /// If the reason is an object, the offending value is added to it as `actualValue`.
    pub fn new<C>(claim: Arc<dyn SessionClaim>, check: C) -> Self
    where
        C: Fn(&T) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            id: Cow::Owned(claim.key().to_owned()),
            claim,
            max_age: None,
            require_presence: false,
            refetch_if_invalid_after: None,
            check: Arc::new(check),
            _value: PhantomData,
        }
    }

    /// Override the identifier reported in validation failures.
    pub fn with_id(mut self, id: impl Into<Cow<'static, str>>) -> Self {
        self.id = id.into();
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn require_presence(mut self) -> Self {
        self.require_presence = true;
        self
    }

    pub fn refetch_if_invalid_after(mut self, interval: Duration) -> Self {
        self.refetch_if_invalid_after = Some(interval);
        self
    }

    /// Age of the stored value, in milliseconds.
    fn age_ms(&self, payload: &Payload, now_ms: i64) -> Option<i64> {
        self.claim
            .last_fetched_at(payload)
            .map(|fetched_at| now_ms.saturating_sub(fetched_at))
    }

    fn is_expired(&self, payload: &Payload, now_ms: i64) -> bool {
        match (self.max_age, self.age_ms(payload, now_ms)) {
            (Some(max_age), Some(age)) => age > duration_ms(max_age),
            _ => false,
        }
    }
}

impl<T> SessionClaimValidator for ClaimValueValidator<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn claim(&self) -> &Arc<dyn SessionClaim> {
        &self.claim
    }

    fn should_refetch(&self, payload: &Payload, now_ms: i64) -> bool {
        if self.claim.get_value_from_payload(payload).is_none() {
            return true;
        }
        if self.is_expired(payload, now_ms) {
            return true;
        }
        if let Some(interval) = self.refetch_if_invalid_after {
            let stale = self
                .age_ms(payload, now_ms)
                .is_some_and(|age| age > duration_ms(interval));
            return stale && !self.validate(payload, now_ms).is_valid;
        }
        false
    }

    fn validate(&self, payload: &Payload, now_ms: i64) -> ClaimValidationResult {
        let Some(raw) = self.claim.get_value_from_payload(payload) else {
            return if self.require_presence {
                ClaimValidationResult::invalid(json!({ "message": "value does not exist" }))
            } else {
                ClaimValidationResult::valid()
            };
        };
        if let (Some(max_age), Some(age)) = (self.max_age, self.age_ms(payload, now_ms)) {
            if age > duration_ms(max_age) {
                return ClaimValidationResult::invalid(json!({
                    "message": "expired",
                    "ageInSeconds": age / 1000,
                    "maxAgeInSeconds": max_age.as_secs(),
                }));
            }
        }
        let value: T = match serde_json::from_value(raw.clone()) {
            Ok(value) => value,
            Err(_) => {
                return ClaimValidationResult::invalid(json!({
                    "message": "wrong value type",
                    "actualValue": raw,
                }));
            }
        };
        match (self.check)(&value) {
            None => ClaimValidationResult::valid(),
            Some(mut reason) => {
                if let Value::Object(fields) = &mut reason {
                    fields.entry("actualValue").or_insert(raw);
                }
                ClaimValidationResult::invalid(reason)
            }
        }
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
