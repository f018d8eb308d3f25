//! Recipes that extend sessions with their own claims.
//!
//! A recipe is wired into the session recipe once, while the application is being built
//! (see [`SuperTokensBuilder::recipe`](crate::app::SuperTokensBuilder::recipe)).
//! Wiring is where a recipe registers its claims and default validators:
//!
//! ```rust
//! use std::sync::Arc;
//! use supertokens::app::SessionWiring;
//! use supertokens::app::errors::ConfigError;
//! use supertokens::claims::{BooleanClaim, ClaimFetchInput};
//! use supertokens::recipe::Recipe;
//!
//! #[derive(Debug)]
//! struct Beta;
//!
//! impl Recipe for Beta {
//!     fn id(&self) -> &str {
//!         "beta"
//!     }
//!
//!     fn wire_session(&self, wiring: &mut SessionWiring<'_>) -> Result<(), ConfigError> {
//!         let claim = BooleanClaim::new("beta", |_input: ClaimFetchInput| async move {
//!             Ok::<_, anyhow::Error>(Some(true))
//!         });
//!         wiring.add_claim_validator(Arc::new(claim.is_true()));
//!         wiring.add_claim(Arc::new(claim))
//!     }
//! }
//! ```
use std::fmt::Debug;

use crate::app::SessionWiring;
use crate::app::errors::ConfigError;

pub mod emailverification;
pub mod multifactor;
pub mod userroles;

pub use emailverification::{EmailLookup, EmailVerification, EmailVerificationMode};
pub use multifactor::{MfaClaimValue, MultiFactorAuth, MultiFactorAuthClaim};
pub use userroles::UserRoles;

/// A feature that plugs into the session recipe.
pub trait Recipe: Debug + Send + Sync {
    /// A unique identifier, used in error messages and to detect duplicate registrations.
    fn id(&self) -> &str;

    /// Register claims and default validators.
    ///
    /// It's invoked exactly once, when the application is built.
    fn wire_session(&self, wiring: &mut SessionWiring<'_>) -> Result<(), ConfigError>;
}
