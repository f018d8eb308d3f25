use std::borrow::Cow;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::validator::ClaimValueValidator;
use super::{ClaimFetchInput, SessionClaim, TypedClaim};
use crate::Payload;

#[async_trait::async_trait]
/// Computes the value of a claim for a user.
///
/// It's implemented for every async closure with the right signature:
///
/// ```rust
/// use supertokens::claims::{ClaimFetchInput, PrimitiveClaim};
///
/// let claim = PrimitiveClaim::<String>::new("plan", |_input: ClaimFetchInput| async move {
///     Ok::<_, anyhow::Error>(Some("premium".to_string()))
/// });
/// ```
pub trait ClaimFetcher<T>: Send + Sync {
    async fn fetch(&self, input: &ClaimFetchInput) -> Result<Option<T>, anyhow::Error>;
}

#[async_trait::async_trait]
impl<T, F, Fut> ClaimFetcher<T> for F
where
    T: Send + 'static,
    F: Fn(ClaimFetchInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<T>, anyhow::Error>> + Send,
{
    async fn fetch(&self, input: &ClaimFetchInput) -> Result<Option<T>, anyhow::Error> {
        (self)(input.clone()).await
    }
}

/// A claim holding a single JSON-serializable value.
///
/// The value is stored as `{ "<key>": { "v": <value>, "t": <fetched at, ms> } }`.
pub struct PrimitiveClaim<T> {
    key: Cow<'static, str>,
    fetcher: Arc<dyn ClaimFetcher<T>>,
    default_max_age: Option<Duration>,
    _value: PhantomData<fn() -> T>,
}

/// A claim holding a boolean, e.g. "the email is verified".
pub type BooleanClaim = PrimitiveClaim<bool>;

impl<T> Clone for PrimitiveClaim<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fetcher: self.fetcher.clone(),
            default_max_age: self.default_max_age,
            _value: PhantomData,
        }
    }
}

impl<T> Debug for PrimitiveClaim<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveClaim")
            .field("key", &self.key)
            .field("default_max_age", &self.default_max_age)
            .finish_non_exhaustive()
    }
}

impl<T> PrimitiveClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug + Clone + Send + Sync + 'static,
{
    pub fn new<F>(key: impl Into<Cow<'static, str>>, fetcher: F) -> Self
    where
        F: ClaimFetcher<T> + 'static,
    {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            default_max_age: None,
            _value: PhantomData,
        }
    }

    /// The maximum age used by validators built from this claim, unless they set their own.
    pub fn default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = Some(max_age);
        self
    }

    /// When the stored value was last fetched, in milliseconds since the Unix epoch.
    pub fn get_last_refetch_time(&self, payload: &Payload) -> Option<i64> {
        self.last_fetched_at(payload)
    }

    pub(super) fn configured_max_age(&self) -> Option<Duration> {
        self.default_max_age
    }

    pub(super) fn shared(&self) -> Arc<dyn SessionClaim> {
        Arc::new(self.clone())
    }

    fn validator<C>(&self, check: C) -> ClaimValueValidator<T>
    where
        C: Fn(&T) -> Option<Value> + Send + Sync + 'static,
    {
        let mut validator = ClaimValueValidator::new(self.shared(), check);
        if let Some(max_age) = self.default_max_age {
            validator = validator.max_age(max_age);
        }
        validator
    }

    /// Valid if the stored value equals `expected`.
    pub fn has_value(&self, expected: T) -> ClaimValueValidator<T> {
        let expected_json = serde_json::to_value(&expected).unwrap_or(Value::Null);
        self.validator(move |actual: &T| {
            if actual == &expected {
                None
            } else {
                Some(json!({
                    "message": "wrong value",
                    "expectedValue": expected_json,
                }))
            }
        })
    }
}

impl PrimitiveClaim<bool> {
    pub fn is_true(&self) -> ClaimValueValidator<bool> {
        self.has_value(true)
    }

    pub fn is_false(&self) -> ClaimValueValidator<bool> {
        self.has_value(false)
    }
}

#[async_trait::async_trait]
impl<T> SessionClaim for PrimitiveClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug + Clone + Send + Sync + 'static,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch_value(&self, input: &ClaimFetchInput) -> Result<Option<Value>, anyhow::Error> {
        let value = self.fetcher.fetch(input).await?;
        value
            .map(|v| serde_json::to_value(v).map_err(anyhow::Error::from))
            .transpose()
    }

    fn add_to_payload(&self, payload: &mut Payload, value: Value, now_ms: i64) {
        payload.insert(self.key.to_string(), json!({ "v": value, "t": now_ms }));
    }

    fn get_value_from_payload(&self, payload: &Payload) -> Option<Value> {
        payload
            .get(self.key.as_ref())
            .and_then(|entry| entry.get("v"))
            .cloned()
    }

    fn last_fetched_at(&self, payload: &Payload) -> Option<i64> {
        payload
            .get(self.key.as_ref())
            .and_then(|entry| entry.get("t"))
            .and_then(Value::as_i64)
    }
}

impl<T> TypedClaim for PrimitiveClaim<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Debug + Clone + Send + Sync + 'static,
{
    type Value = T;
}
