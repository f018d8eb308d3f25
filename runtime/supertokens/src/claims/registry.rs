use std::sync::Arc;

use super::{SessionClaim, SessionClaimValidator};
use crate::app::errors::ConfigError;

/// The claims and default validators contributed by every recipe of an application.
///
/// It's assembled while the application is being built and it can't be modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct ClaimRegistry {
    claims: Vec<RegisteredClaim>,
    default_validators: Vec<Arc<dyn SessionClaimValidator>>,
}

#[derive(Debug, Clone)]
struct RegisteredClaim {
    owner: String,
    claim: Arc<dyn SessionClaim>,
}

impl ClaimRegistry {
    /// Register `claim` on behalf of the recipe identified by `owner`.
    ///
    /// Fails if another claim with the same key was already registered.
    pub(crate) fn register(
        &mut self,
        owner: &str,
        claim: Arc<dyn SessionClaim>,
    ) -> Result<(), ConfigError> {
        if let Some(existing) = self.claims.iter().find(|c| c.claim.key() == claim.key()) {
            return Err(ConfigError::DuplicateClaimKey {
                key: claim.key().to_owned(),
                first_recipe: existing.owner.clone(),
                second_recipe: owner.to_owned(),
            });
        }
        tracing::debug!(claim.key = claim.key(), recipe.id = owner, "Registered session claim");
        self.claims.push(RegisteredClaim {
            owner: owner.to_owned(),
            claim,
        });
        Ok(())
    }

    pub(crate) fn add_default_validator(&mut self, validator: Arc<dyn SessionClaimValidator>) {
        self.default_validators.push(validator);
    }

    /// All registered claims, in registration order.
    pub fn claims(&self) -> impl Iterator<Item = &Arc<dyn SessionClaim>> {
        self.claims.iter().map(|c| &c.claim)
    }

    /// The claim registered under `key`, if any.
    pub fn claim(&self, key: &str) -> Option<&Arc<dyn SessionClaim>> {
        self.claims
            .iter()
            .find(|c| c.claim.key() == key)
            .map(|c| &c.claim)
    }

    /// The validators that run on every session verification, unless the caller overrides them.
    pub fn default_validators(&self) -> &[Arc<dyn SessionClaimValidator>] {
        &self.default_validators
    }
}
