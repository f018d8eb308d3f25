//! Errors that can occur while verifying, refreshing or mutating a session.
use crate::claims::ClaimValidationFailure;
use crate::core::errors::CoreError;
use crate::framework::errors::BadInputError;

/// The error type returned by every session operation.
///
/// The first four variants are part of the protocol with the frontend SDK:
/// [`SessionRecipe::handle_error`](super::SessionRecipe::handle_error) renders them as
/// responses the frontend knows how to react to.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// There is no valid session. The user must sign in again.
    #[error("Unauthorised: {message}")]
    Unauthorised {
        message: String,
        /// Whether the session tokens should be removed from the client.
        clear_tokens: bool,
    },
    /// The access token can't be used, but the session may still be alive:
    /// the client should try to refresh it.
    #[error("Try refresh token: {message}")]
    TryRefreshToken { message: String },
    /// A refresh token that had already been rotated out was presented again.
    ///
    /// The session has been (or should be) revoked.
    #[error("Token theft detected for session `{session_handle}`")]
    TokenTheftDetected {
        session_handle: String,
        user_id: String,
        recipe_user_id: String,
        cleanup: TheftCleanup,
    },
    /// The session is valid, but it doesn't satisfy some of the required claims.
    #[error("The session failed the validation of {} claim(s)", failures.len())]
    InvalidClaims { failures: Vec<ClaimValidationFailure> },
    #[error(transparent)]
    BadInput(#[from] BadInputError),
    /// Something unexpected happened, e.g. the core was unreachable.
    #[error("Something went wrong while processing the session")]
    General(#[source] anyhow::Error),
}

/// What happened to the session after token theft was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheftCleanup {
    /// The session was revoked.
    Revoked,
    /// We tried to revoke the session, but the core call failed.
    /// The session may still be alive on the core.
    Failed,
    /// Revocation was not attempted, e.g. because an override skipped it.
    NotAttempted,
}

impl SessionError {
    pub(crate) fn unauthorised(message: impl Into<String>) -> Self {
        Self::Unauthorised {
            message: message.into(),
            clear_tokens: true,
        }
    }

    pub(crate) fn unauthorised_keep_tokens(message: impl Into<String>) -> Self {
        Self::Unauthorised {
            message: message.into(),
            clear_tokens: false,
        }
    }

    pub(crate) fn try_refresh(message: impl Into<String>) -> Self {
        Self::TryRefreshToken {
            message: message.into(),
        }
    }

    /// The status string used by the core and the frontend SDKs for this kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Unauthorised { .. } => "UNAUTHORISED",
            SessionError::TryRefreshToken { .. } => "TRY_REFRESH_TOKEN",
            SessionError::TokenTheftDetected { .. } => "TOKEN_THEFT_DETECTED",
            SessionError::InvalidClaims { .. } => "INVALID_CLAIMS",
            SessionError::BadInput(_) => "BAD_INPUT_ERROR",
            SessionError::General(_) => "GENERAL_ERROR",
        }
    }
}

impl From<CoreError> for SessionError {
    fn from(e: CoreError) -> Self {
        Self::General(e.into())
    }
}
