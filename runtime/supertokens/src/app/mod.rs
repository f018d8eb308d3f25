//! The application context: every recipe, wired together.
//!
//! There are no globals in this crate. A [`SuperTokens`] value owns the configuration,
//! the connection to the core and the recipes; share it across request handlers
//! (e.g. behind an `Arc` or in your framework's application state).
//! Building a new value is the only way to reset the SDK, e.g. between tests.
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::json;

use crate::claims::{ClaimRegistry, SessionClaim, SessionClaimValidator};
use crate::context::UserContext;
use crate::core::Core;
use crate::framework::{BaseRequest, BaseResponse, send_json};
use crate::recipe::Recipe;
use crate::session::functions::{CoreSessionFunctions, SessionFunctions};
use crate::session::{SessionConfig, SessionError, SessionRecipe, VerifySessionOptions};
use errors::ConfigError;
pub use info::{AppInfo, NormalizedAppInfo, Origin};

pub mod info;

type FunctionsOverride =
    Box<dyn FnOnce(Arc<dyn SessionFunctions>) -> Arc<dyn SessionFunctions> + Send>;

/// An initialised SuperTokens application.
///
/// Use [`SuperTokens::builder`] to create one.
#[derive(Clone)]
pub struct SuperTokens {
    inner: Arc<Inner>,
}

struct Inner {
    app_info: NormalizedAppInfo,
    core: Core,
    session: SessionRecipe,
    recipes: Vec<Arc<dyn Recipe>>,
}

impl Debug for SuperTokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let recipes: Vec<_> = self.inner.recipes.iter().map(|r| r.id()).collect();
        f.debug_struct("SuperTokens")
            .field("app_info", &self.inner.app_info)
            .field("recipes", &recipes)
            .finish_non_exhaustive()
    }
}

impl SuperTokens {
    pub fn builder(app_info: AppInfo, core: Core) -> SuperTokensBuilder {
        SuperTokensBuilder {
            app_info,
            core,
            session: SessionConfig::default(),
            overrides: Vec::new(),
            recipes: Vec::new(),
        }
    }

    pub fn session(&self) -> &SessionRecipe {
        &self.inner.session
    }

    pub fn core(&self) -> &Core {
        &self.inner.core
    }

    pub fn app_info(&self) -> &NormalizedAppInfo {
        &self.inner.app_info
    }

    /// The recipe registered under `id`, if any.
    pub fn recipe(&self, id: &str) -> Option<&Arc<dyn Recipe>> {
        self.inner.recipes.iter().find(|r| r.id() == id)
    }

    /// Serve the routes exposed by the SDK:
    ///
    /// - `POST {api_base_path}/session/refresh` rotates the session tokens;
    /// - `POST {api_base_path}/signout` revokes the current session.
    ///
    /// Returns `false` if the request doesn't target one of them, leaving `res` untouched.
    /// Session errors are rendered into `res`; other errors are returned.
    #[tracing::instrument(name = "Handle SDK request", level = tracing::Level::DEBUG, skip_all, fields(route))]
    pub async fn handle_request(
        &self,
        req: &dyn BaseRequest,
        res: &mut dyn BaseResponse,
        ctx: &UserContext,
    ) -> Result<bool, SessionError> {
        if *req.method() != http::Method::POST {
            return Ok(false);
        }
        let path = req
            .original_url()
            .split_once('?')
            .map_or(req.original_url(), |(path, _)| path);
        let path = path.trim_end_matches('/');
        let Some(route) = path.strip_prefix(self.inner.app_info.api_base_path.as_str()) else {
            return Ok(false);
        };
        tracing::Span::current().record("route", route);
        let recipe = &self.inner.session;
        match route {
            "/session/refresh" => {
                let outcome = recipe.refresh_session(req, res, ctx).await.map(drop);
                match outcome {
                    Ok(()) => send_json(res, &json!({}))?,
                    Err(e) => recipe.handle_error(req, res, e)?,
                }
                Ok(true)
            }
            "/signout" => {
                let options = VerifySessionOptions::optional().claim_validators(Vec::new());
                let outcome = match recipe.get_session(req, res, options, ctx).await {
                    Ok(Some(mut session)) => session.revoke_session().await,
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(()) => send_json(res, &json!({ "status": "OK" }))?,
                    Err(e) => recipe.handle_error(req, res, e)?,
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Assemble a [`SuperTokens`] application.
pub struct SuperTokensBuilder {
    app_info: AppInfo,
    core: Core,
    session: SessionConfig,
    overrides: Vec<FunctionsOverride>,
    recipes: Vec<Arc<dyn Recipe>>,
}

impl Debug for SuperTokensBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperTokensBuilder")
            .field("app_info", &self.app_info)
            .field("session", &self.session)
            .field("n_overrides", &self.overrides.len())
            .field("recipes", &self.recipes)
            .finish_non_exhaustive()
    }
}

impl SuperTokensBuilder {
    pub fn session(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Register a recipe.
    ///
    /// Recipes are wired in registration order.
    pub fn recipe<R>(mut self, recipe: R) -> Self
    where
        R: Recipe + 'static,
    {
        self.recipes.push(Arc::new(recipe));
        self
    }

    /// Decorate the session functions.
    ///
    /// `f` receives the current implementation and returns its replacement. Overrides compose:
    /// the last one registered is the outermost.
    pub fn override_session_functions<F, O>(mut self, f: F) -> Self
    where
        F: FnOnce(Arc<dyn SessionFunctions>) -> O + Send + 'static,
        O: SessionFunctions + 'static,
    {
        self.overrides
            .push(Box::new(move |original: Arc<dyn SessionFunctions>| -> Arc<dyn SessionFunctions> {
                Arc::new(f(original))
            }));
        self
    }

    /// Normalise the configuration, wire every recipe and freeze the claim registry.
    ///
    /// Fails on invalid configuration or if two recipes register a claim with the same key.
    #[tracing::instrument(name = "Build SuperTokens application", level = tracing::Level::DEBUG, skip_all)]
    pub fn build(self) -> Result<SuperTokens, ConfigError> {
        let app_info = self.app_info.normalize()?;
        let config = Arc::new(self.session.resolve(&app_info)?);

        let mut claims = ClaimRegistry::default();
        for (i, recipe) in self.recipes.iter().enumerate() {
            if self.recipes[..i].iter().any(|r| r.id() == recipe.id()) {
                return Err(ConfigError::DuplicateRecipe {
                    id: recipe.id().to_owned(),
                });
            }
            let mut wiring = SessionWiring {
                owner: recipe.id(),
                registry: &mut claims,
            };
            recipe.wire_session(&mut wiring)?;
        }

        let mut functions: Arc<dyn SessionFunctions> =
            Arc::new(CoreSessionFunctions::new(self.core.clone(), config.clone()));
        for override_ in self.overrides {
            functions = override_(functions);
        }
        tracing::debug!(
            n_recipes = self.recipes.len(),
            n_claims = claims.claims().count(),
            "Built SuperTokens application"
        );
        let session = SessionRecipe::new(functions, config, claims, self.core.clone());
        Ok(SuperTokens {
            inner: Arc::new(Inner {
                app_info,
                core: self.core,
                session,
                recipes: self.recipes,
            }),
        })
    }
}

/// The hooks a recipe uses to extend the session recipe while the application is being built.
pub struct SessionWiring<'a> {
    owner: &'a str,
    registry: &'a mut ClaimRegistry,
}

impl SessionWiring<'_> {
    /// Add a claim to every new session.
    ///
    /// Fails if another recipe already registered a claim with the same key.
    pub fn add_claim(&mut self, claim: Arc<dyn SessionClaim>) -> Result<(), ConfigError> {
        self.registry.register(self.owner, claim)
    }

    /// Run `validator` on every verified session, unless the caller picks its own validators.
    pub fn add_claim_validator(&mut self, validator: Arc<dyn SessionClaimValidator>) {
        tracing::debug!(
            validator.id = validator.id(),
            recipe.id = self.owner,
            "Registered default claim validator"
        );
        self.registry.add_default_validator(validator);
    }
}

pub mod errors {
    //! Errors that can occur while building a [`SuperTokens`](super::SuperTokens) application.

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    pub enum ConfigError {
        #[error(
            "Two recipes tried to register a session claim with the same key, `{key}`: `{first_recipe}` and `{second_recipe}`"
        )]
        DuplicateClaimKey {
            key: String,
            first_recipe: String,
            second_recipe: String,
        },
        #[error("The `{id}` recipe was registered more than once")]
        DuplicateRecipe { id: String },
        #[error("`{value}` is not a valid value for `{field}`")]
        InvalidAppInfo {
            field: &'static str,
            value: String,
            #[source]
            source: anyhow::Error,
        },
        #[error(
            "Session cookies must be `Secure` when they are sent cross-site (`SameSite=None`). Serve your API over HTTPS or set `cookie.secure` to `true`"
        )]
        InsecureCrossSiteCookies,
        #[error("{code} is not a valid HTTP status code for `{field}`")]
        InvalidStatusCode { field: &'static str, code: u16 },
    }
}
