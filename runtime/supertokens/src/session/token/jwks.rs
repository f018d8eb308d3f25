use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::{Mutex, RwLock};

use crate::core::Core;
use crate::core::errors::CoreError;

/// A cache for the public keys the core signs access tokens with.
///
/// Refills are single-flight: when many requests need fresh keys at the same time
/// (e.g. right after the core rotated its signing key), exactly one of them
/// calls the core and the others reuse its result.
///
/// Refills triggered by an unknown key id are rate limited: the key set is fetched
/// at most once per cooldown, no matter how many unknown key ids are presented.
#[derive(Debug)]
pub struct KeyCache {
    core: Core,
    max_age: Duration,
    cooldown: Duration,
    state: RwLock<Option<CachedKeys>>,
    refill: Mutex<()>,
}

#[derive(Debug, Clone)]
struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
    generation: u64,
}

/// A consistent view of the cached key set.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
    generation: u64,
    refilled: bool,
}

impl KeySnapshot {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.find(kid)
    }

    /// Increases by one every time the key set is fetched from the core.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl From<&CachedKeys> for KeySnapshot {
    fn from(cached: &CachedKeys) -> Self {
        Self {
            keys: cached.keys.clone(),
            fetched_at: cached.fetched_at,
            generation: cached.generation,
            refilled: false,
        }
    }
}

impl KeyCache {
    pub fn new(core: Core, max_age: Duration, cooldown: Duration) -> Self {
        Self {
            core,
            max_age,
            cooldown,
            state: RwLock::new(None),
            refill: Mutex::new(()),
        }
    }

    /// The cached key set, refilled first if it's missing or older than the configured max age.
    pub async fn current(&self) -> Result<KeySnapshot, CoreError> {
        let seen = {
            let state = self.state.read().await;
            match state.as_ref() {
                Some(cached) if cached.fetched_at.elapsed() <= self.max_age => {
                    return Ok(cached.into());
                }
                Some(cached) => Some(cached.generation),
                None => None,
            }
        };
        self.refill(seen).await
    }

    /// Fetch the key set again, unless someone else already did after `seen` was observed.
    ///
    /// Used when a token references a key id that's missing from `seen`.
    /// `seen` is returned as is if it was refilled by the same caller or if it's
    /// younger than the refetch cooldown.
    pub async fn refresh_after(&self, seen: &KeySnapshot) -> Result<KeySnapshot, CoreError> {
        if seen.refilled {
            return Ok(seen.clone());
        }
        if seen.fetched_at.elapsed() < self.cooldown {
            tracing::trace!(
                generation = seen.generation,
                "The key set was fetched within the refetch cooldown, skipping the fetch"
            );
            return Ok(seen.clone());
        }
        self.refill(Some(seen.generation)).await
    }

    async fn refill(&self, seen_generation: Option<u64>) -> Result<KeySnapshot, CoreError> {
        let _guard = self.refill.lock().await;
        if let Some(cached) = self.state.read().await.as_ref() {
            if Some(cached.generation) != seen_generation {
                tracing::trace!(
                    generation = cached.generation,
                    "The key set was refreshed while waiting, skipping the fetch"
                );
                return Ok(KeySnapshot {
                    refilled: true,
                    ..KeySnapshot::from(cached)
                });
            }
        }

        let keys = self.core.jwks().await?;
        let mut state = self.state.write().await;
        let generation = state.as_ref().map(|c| c.generation + 1).unwrap_or(1);
        let cached = CachedKeys {
            keys: Arc::new(keys),
            fetched_at: Instant::now(),
            generation,
        };
        tracing::debug!(
            generation,
            n_keys = cached.keys.keys.len(),
            "Refreshed the access token signing keys"
        );
        let snapshot = KeySnapshot {
            refilled: true,
            ..KeySnapshot::from(&cached)
        };
        *state = Some(cached);
        Ok(snapshot)
    }
}
