use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::primitive::{ClaimFetcher, PrimitiveClaim};
use super::validator::ClaimValueValidator;
use super::{ClaimFetchInput, SessionClaim, TypedClaim};
use crate::Payload;

/// A claim holding a list of values, e.g. the roles of a user.
///
/// It uses the same payload encoding as [`PrimitiveClaim`], with an array as value.
///
/// The `includes*` validators require the claim to be present: a user without
/// a list of roles doesn't have the role you are looking for.
/// The `excludes*` validators accept a missing claim.
#[derive(Debug)]
pub struct PrimitiveArrayClaim<T> {
    inner: PrimitiveClaim<Vec<T>>,
}

impl<T> Clone for PrimitiveArrayClaim<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PrimitiveArrayClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug + Clone + Send + Sync + 'static,
{
    pub fn new<F>(key: impl Into<Cow<'static, str>>, fetcher: F) -> Self
    where
        F: ClaimFetcher<Vec<T>> + 'static,
    {
        Self {
            inner: PrimitiveClaim::new(key, fetcher),
        }
    }

    pub fn default_max_age(self, max_age: Duration) -> Self {
        Self {
            inner: self.inner.default_max_age(max_age),
        }
    }

    pub fn get_last_refetch_time(&self, payload: &Payload) -> Option<i64> {
        self.inner.get_last_refetch_time(payload)
    }

    fn validator<C>(&self, check: C) -> ClaimValueValidator<Vec<T>>
    where
        C: Fn(&Vec<T>) -> Option<Value> + Send + Sync + 'static,
    {
        let shared: Arc<dyn SessionClaim> = Arc::new(self.clone());
        let mut validator = ClaimValueValidator::new(shared, check);
        if let Some(max_age) = self.inner.configured_max_age() {
            validator = validator.max_age(max_age);
        }
        validator
    }

    pub fn includes(&self, value: T) -> ClaimValueValidator<Vec<T>> {
        let expected = to_json(&value);
        self.validator(move |actual| {
            (!actual.contains(&value)).then(|| {
                json!({ "message": "wrong value", "expectedToInclude": expected })
            })
        })
        .require_presence()
    }

    pub fn excludes(&self, value: T) -> ClaimValueValidator<Vec<T>> {
        let expected = to_json(&value);
        self.validator(move |actual| {
            actual.contains(&value).then(|| {
                json!({ "message": "wrong value", "expectedToNotInclude": expected })
            })
        })
    }

    pub fn includes_all(&self, values: Vec<T>) -> ClaimValueValidator<Vec<T>> {
        let expected = to_json(&values);
        self.validator(move |actual| {
            (!values.iter().all(|v| actual.contains(v))).then(|| {
                json!({ "message": "wrong value", "expectedToInclude": expected })
            })
        })
        .require_presence()
    }

    pub fn includes_any(&self, values: Vec<T>) -> ClaimValueValidator<Vec<T>> {
        let expected = to_json(&values);
        self.validator(move |actual| {
            (!values.iter().any(|v| actual.contains(v))).then(|| {
                json!({ "message": "wrong value", "expectedToIncludeAtLeastOneOf": expected })
            })
        })
        .require_presence()
    }

    pub fn excludes_all(&self, values: Vec<T>) -> ClaimValueValidator<Vec<T>> {
        let expected = to_json(&values);
        self.validator(move |actual| {
            values.iter().any(|v| actual.contains(v)).then(|| {
                json!({ "message": "wrong value", "expectedToNotInclude": expected })
            })
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[async_trait::async_trait]
impl<T> SessionClaim for PrimitiveArrayClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug + Clone + Send + Sync + 'static,
{
    fn key(&self) -> &str {
        self.inner.key()
    }

    async fn fetch_value(&self, input: &ClaimFetchInput) -> Result<Option<Value>, anyhow::Error> {
        self.inner.fetch_value(input).await
    }

    fn add_to_payload(&self, payload: &mut Payload, value: Value, now_ms: i64) {
        self.inner.add_to_payload(payload, value, now_ms)
    }

    fn get_value_from_payload(&self, payload: &Payload) -> Option<Value> {
        self.inner.get_value_from_payload(payload)
    }

    fn last_fetched_at(&self, payload: &Payload) -> Option<i64> {
        self.inner.last_fetched_at(payload)
    }
}

impl<T> TypedClaim for PrimitiveArrayClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug + Clone + Send + Sync + 'static,
{
    type Value = Vec<T>;
}
