//! Load the SDK configuration from a YAML file and environment variables.
//!
//! ```yaml
//! core:
//!   connection_uri: "http://localhost:3567"
//! app_info:
//!   app_name: "my-app"
//!   api_domain: "https://api.example.com"
//!   website_domain: "https://example.com"
//! session:
//!   cookie:
//!     same_site: "lax"
//!   jwks:
//!     cache_max_age: "5m"
//! ```
//!
//! Environment variables take precedence over the file. They are prefixed with `SUPERTOKENS_`
//! and use `__` to separate nested keys, e.g. `SUPERTOKENS_CORE__API_KEY`.
use std::path::PathBuf;

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

use crate::app::{AppInfo, SuperTokens, SuperTokensBuilder};
use crate::core::errors::CoreConfigError;
use crate::core::{Core, HttpCore, HttpCoreConfig};
use crate::session::SessionConfig;

const DEFAULT_ENV_PREFIX: &str = "SUPERTOKENS_";

/// Everything needed to build a [`SuperTokens`] application backed by an HTTP core.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct SuperTokensSettings {
    pub core: HttpCoreConfig,
    pub app_info: AppInfo,
    #[serde(default)]
    pub session: SessionConfig,
}

impl SuperTokensSettings {
    /// Connect to the core and start assembling the application.
    ///
    /// Register your recipes on the returned builder, then call
    /// [`build`](SuperTokensBuilder::build).
    pub fn into_builder(self) -> Result<SuperTokensBuilder, CoreConfigError> {
        let core = HttpCore::new(self.core)?;
        Ok(SuperTokens::builder(self.app_info, Core::new(core)).session(self.session))
    }
}

/// Loads [`SuperTokensSettings`] by merging, in order of increasing precedence,
/// an optional YAML file and `SUPERTOKENS_`-prefixed environment variables.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_owned(),
        }
    }

    /// Read settings from a YAML file. A missing file is treated as empty.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Change the prefix of the environment variables that are taken into account.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(self) -> Result<SuperTokensSettings, errors::SettingsLoadError> {
        let span = tracing::info_span!(
            "Loading SuperTokens settings",
            settings.file = self.file.as_ref().map(|f| f.display().to_string()),
            settings.env_prefix = %self.env_prefix,
        );
        let _guard = span.enter();
        let mut figment = Figment::new();
        if let Some(file) = &self.file {
            figment = figment.merge(Yaml::file(file));
        }
        figment
            .merge(Env::prefixed(&self.env_prefix).split("__"))
            .extract()
            .context("Failed to load the SuperTokens settings")
            .map_err(errors::SettingsLoadError)
    }
}

pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("Failed to load the SuperTokens settings")]
    /// The error returned by [`SettingsLoader::load`](super::SettingsLoader::load).
    pub struct SettingsLoadError(#[source] pub(super) anyhow::Error);
}
