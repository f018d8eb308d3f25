//! Email verification.
//!
//! The `st-ev` claim records whether the email of the session user is verified.
//! The authoritative answer comes from the core; the application tells the recipe
//! which email belongs to a user via [`EmailLookup`].
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Recipe;
use crate::app::SessionWiring;
use crate::app::errors::ConfigError;
use crate::claims::{BooleanClaim, ClaimFetchInput, ClaimValueValidator};

pub const EMAIL_VERIFICATION_CLAIM_KEY: &str = "st-ev";

/// Resolve the email address of a user.
#[async_trait::async_trait]
pub trait EmailLookup: Debug + Send + Sync {
    /// `None` if the user has no email address: they are treated as verified.
    async fn email_for_user(
        &self,
        recipe_user_id: &str,
        tenant_id: &str,
    ) -> Result<Option<String>, anyhow::Error>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailVerificationMode {
    /// Every verified session must have a verified email.
    Required,
    /// The claim is kept up to date, but not enforced.
    #[default]
    Optional,
}

/// The email verification recipe.
#[derive(Debug, Clone)]
pub struct EmailVerification {
    mode: EmailVerificationMode,
    claim: BooleanClaim,
}

impl EmailVerification {
    pub fn new<L>(mode: EmailVerificationMode, lookup: L) -> Self
    where
        L: EmailLookup + 'static,
    {
        let lookup: Arc<dyn EmailLookup> = Arc::new(lookup);
        let claim = BooleanClaim::new(EMAIL_VERIFICATION_CLAIM_KEY, move |input: ClaimFetchInput| {
            let lookup = lookup.clone();
            async move {
                let Some(email) = lookup
                    .email_for_user(&input.recipe_user_id, &input.tenant_id)
                    .await?
                else {
                    return Ok::<_, anyhow::Error>(Some(true));
                };
                let verified = input
                    .core
                    .is_email_verified(&input.tenant_id, &input.recipe_user_id, &email)
                    .await?;
                Ok::<_, anyhow::Error>(Some(verified))
            }
        });
        Self { mode, claim }
    }

    pub fn claim(&self) -> &BooleanClaim {
        &self.claim
    }

    /// Valid if the email is verified. A session without the claim fails validation.
    ///
    /// An unverified value is re-fetched at most every 10 seconds, so that a user who just
    /// verified their email doesn't have to wait for the next refresh.
    pub fn is_verified(&self) -> ClaimValueValidator<bool> {
        self.claim
            .is_true()
            .require_presence()
            .refetch_if_invalid_after(Duration::from_secs(10))
    }
}

impl Recipe for EmailVerification {
    fn id(&self) -> &str {
        "emailverification"
    }

    fn wire_session(&self, wiring: &mut SessionWiring<'_>) -> Result<(), ConfigError> {
        wiring.add_claim(Arc::new(self.claim.clone()))?;
        if self.mode == EmailVerificationMode::Required {
            wiring.add_claim_validator(Arc::new(self.is_verified()));
        }
        Ok(())
    }
}
