//! A typed, immutable bag of values threaded through every SDK operation.
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed key into a [`UserContext`].
///
/// Keys are namespaced to avoid collisions between independent recipes and
/// application code. Two keys are the same entry if namespace and name match.
pub struct ContextKey<T> {
    namespace: &'static str,
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self {
            namespace,
            name,
            _value: PhantomData,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn slot(&self) -> (&'static str, &'static str) {
        (self.namespace, self.name)
    }
}

impl<T> Debug for ContextKey<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

/// What the SDK knows about the request currently being processed.
///
/// It's stored under [`UserContext::REQUEST`], the default request-scoped bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: http::Method,
    pub original_url: String,
}

/// An immutable map from namespaced keys to values.
///
/// Inserting returns a new context: the original is left untouched, so a context
/// can be shared freely between concurrent operations.
///
/// ```rust
/// use supertokens::context::{ContextKey, UserContext};
///
/// const TRACE_ID: ContextKey<String> = ContextKey::new("my_app", "trace_id");
///
/// let ctx = UserContext::new();
/// let with_trace = ctx.with(&TRACE_ID, "abc".to_string());
/// assert!(ctx.get(&TRACE_ID).is_none());
/// assert_eq!(with_trace.get(&TRACE_ID).map(String::as_str), Some("abc"));
/// ```
#[derive(Clone, Default)]
pub struct UserContext {
    entries: Arc<HashMap<(&'static str, &'static str), Arc<dyn Any + Send + Sync>>>,
}

impl UserContext {
    /// The default request-scoped bucket.
    pub const REQUEST: ContextKey<RequestInfo> = ContextKey::new("_default", "request");

    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new context where `key` is bound to `value`.
    pub fn with<T>(&self, key: &ContextKey<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        let mut entries = (*self.entries).clone();
        entries.insert(key.slot(), Arc::new(value));
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get<T>(&self, key: &ContextKey<T>) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .get(&key.slot())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(&key.slot())
    }

    pub fn request(&self) -> Option<&RequestInfo> {
        self.get(&Self::REQUEST)
    }

    /// Populate the request-scoped bucket, unless the caller already did.
    pub(crate) fn with_request_if_missing(&self, info: impl FnOnce() -> RequestInfo) -> Self {
        if self.contains(&Self::REQUEST) {
            self.clone()
        } else {
            self.with(&Self::REQUEST, info())
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Debug for UserContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self
            .entries
            .keys()
            .map(|(namespace, name)| format!("{namespace}.{name}"))
            .collect();
        keys.sort();
        f.debug_struct("UserContext").field("keys", &keys).finish()
    }
}
