//! Issue, verify, refresh and revoke user sessions.
//!
//! # Overview
//!
//! A session is represented on the client by two tokens:
//!
//! - a short-lived **access token**, a JWT signed by the core and verified locally
//!   on every request (see [`token`]);
//! - a long-lived, opaque **refresh token**, exchanged for a new pair of tokens when
//!   the access token expires (see [`SessionRecipe::refresh_session`]).
//!
//! Tokens travel either in cookies or in headers, see [`transfer`].
//!
//! # Verifying a session
//!
//! ```rust,no_run
//! use supertokens::SuperTokens;
//! use supertokens::context::UserContext;
//! use supertokens::framework::http::{HttpRequest, HttpResponse};
//! use supertokens::session::{SessionError, VerifySessionOptions};
//!
//! async fn handler(
//!     app: &SuperTokens,
//!     req: &HttpRequest,
//!     res: &mut HttpResponse,
//! ) -> Result<(), SessionError> {
//!     let recipe = app.session();
//!     let outcome = recipe
//!         .get_session(req, res, VerifySessionOptions::default(), &UserContext::new())
//!         .await;
//!     let session = match outcome {
//!         Ok(session) => session,
//!         Err(e) => return recipe.handle_error(req, res, e),
//!     };
//!     if let Some(session) = session {
//!         println!("Hello, {}", session.user_id());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Customisation
//!
//! Every flow is built on top of [`SessionFunctions`](functions::SessionFunctions).
//! Override them via [`SuperTokensBuilder::override_session_functions`](crate::app::SuperTokensBuilder::override_session_functions).
mod config;
mod container;
pub mod errors;
pub mod functions;
mod get_session;
mod recipe;
mod refresh;
pub mod token;
pub mod transfer;

pub use config::{
    AntiCsrfMode, JwksConfig, ResolvedSessionConfig, SessionConfig, SessionCookieConfig,
    TokenTransferPreference,
};
pub use container::{SessionContainer, SessionTokens};
pub use errors::{SessionError, TheftCleanup};
pub use get_session::VerifySessionOptions;
pub use recipe::SessionRecipe;
pub use transfer::TransferMethod;
