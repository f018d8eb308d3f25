//! User roles and permissions.
//!
//! Roles (`st-role`) and the permissions they grant (`st-perm`) are stored in the access token,
//! so that authorization checks don't need a round trip to the core.
use std::collections::BTreeSet;
use std::sync::Arc;

use super::Recipe;
use crate::app::SessionWiring;
use crate::app::errors::ConfigError;
use crate::claims::{ClaimFetchInput, PrimitiveArrayClaim};

pub const ROLES_CLAIM_KEY: &str = "st-role";
pub const PERMISSIONS_CLAIM_KEY: &str = "st-perm";

/// The user roles recipe.
#[derive(Debug, Clone)]
pub struct UserRoles {
    roles: PrimitiveArrayClaim<String>,
    permissions: PrimitiveArrayClaim<String>,
    skip_adding_roles_to_access_token: bool,
    skip_adding_permissions_to_access_token: bool,
}

impl Default for UserRoles {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRoles {
    pub fn new() -> Self {
        let roles = PrimitiveArrayClaim::new(ROLES_CLAIM_KEY, |input: ClaimFetchInput| async move {
            let roles = input
                .core
                .roles_for_user(&input.tenant_id, &input.user_id)
                .await?;
            Ok::<_, anyhow::Error>(Some(roles))
        });
        let permissions =
            PrimitiveArrayClaim::new(PERMISSIONS_CLAIM_KEY, |input: ClaimFetchInput| async move {
                let roles = input
                    .core
                    .roles_for_user(&input.tenant_id, &input.user_id)
                    .await?;
                let mut permissions = BTreeSet::new();
                for role in roles {
                    // A role deleted in the meantime grants nothing.
                    if let Some(granted) = input.core.permissions_for_role(&role).await? {
                        permissions.extend(granted);
                    }
                }
                Ok::<_, anyhow::Error>(Some(permissions.into_iter().collect::<Vec<String>>()))
            });
        Self {
            roles,
            permissions,
            skip_adding_roles_to_access_token: false,
            skip_adding_permissions_to_access_token: false,
        }
    }

    /// Don't add the roles of the user to new sessions.
    pub fn skip_adding_roles_to_access_token(mut self) -> Self {
        self.skip_adding_roles_to_access_token = true;
        self
    }

    /// Don't add the permissions of the user to new sessions.
    pub fn skip_adding_permissions_to_access_token(mut self) -> Self {
        self.skip_adding_permissions_to_access_token = true;
        self
    }

    /// The `st-role` claim. Use [`PrimitiveArrayClaim::includes`] to require a role.
    pub fn roles(&self) -> &PrimitiveArrayClaim<String> {
        &self.roles
    }

    /// The `st-perm` claim. Use [`PrimitiveArrayClaim::includes`] to require a permission.
    pub fn permissions(&self) -> &PrimitiveArrayClaim<String> {
        &self.permissions
    }
}

impl Recipe for UserRoles {
    fn id(&self) -> &str {
        "userroles"
    }

    fn wire_session(&self, wiring: &mut SessionWiring<'_>) -> Result<(), ConfigError> {
        if !self.skip_adding_roles_to_access_token {
            wiring.add_claim(Arc::new(self.roles.clone()))?;
        }
        if !self.skip_adding_permissions_to_access_token {
            wiring.add_claim(Arc::new(self.permissions.clone()))?;
        }
        Ok(())
    }
}
