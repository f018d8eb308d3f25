use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::errors::ConfigError;

/// Where your application is served from.
///
/// The API and the website may live on different domains: this drives the
/// defaults for cookie attributes and anti-CSRF protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub struct AppInfo {
    pub app_name: String,
    /// The origin your API is served from, e.g. `https://api.example.com`.
    pub api_domain: String,
    /// The origin your website is served from, e.g. `https://example.com`.
    pub website_domain: String,
    /// The path prefix for the authentication routes exposed by the API.
    ///
    /// By default, it's set to `/auth`.
    #[serde(default = "default_base_path")]
    pub api_base_path: String,
    /// The path prefix for the authentication pages of the website.
    ///
    /// By default, it's set to `/auth`.
    #[serde(default = "default_base_path")]
    pub website_base_path: String,
}

fn default_base_path() -> String {
    "/auth".to_owned()
}

impl AppInfo {
    pub fn new(
        app_name: impl Into<String>,
        api_domain: impl Into<String>,
        website_domain: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            api_domain: api_domain.into(),
            website_domain: website_domain.into(),
            api_base_path: default_base_path(),
            website_base_path: default_base_path(),
        }
    }

    pub fn api_base_path(mut self, path: impl Into<String>) -> Self {
        self.api_base_path = path.into();
        self
    }

    pub fn website_base_path(mut self, path: impl Into<String>) -> Self {
        self.website_base_path = path.into();
        self
    }

    pub(crate) fn normalize(&self) -> Result<NormalizedAppInfo, ConfigError> {
        Ok(NormalizedAppInfo {
            app_name: self.app_name.clone(),
            api: Origin::parse("api_domain", &self.api_domain)?,
            website: Origin::parse("website_domain", &self.website_domain)?,
            api_base_path: normalize_path(&self.api_base_path),
            website_base_path: normalize_path(&self.website_base_path),
        })
    }
}

/// [`AppInfo`], validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAppInfo {
    pub app_name: String,
    pub api: Origin,
    pub website: Origin,
    /// Starts with `/`, never ends with `/`. Empty if the routes are mounted at the root.
    pub api_base_path: String,
    pub website_base_path: String,
}

impl NormalizedAppInfo {
    /// Whether the API and the website are considered the same site by browsers.
    pub fn is_same_site(&self) -> bool {
        self.api.scheme == self.website.scheme
            && self.api.top_level_domain() == self.website.top_level_domain()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
}

impl Origin {
    fn parse(field: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_owned()
        } else if raw.starts_with("localhost") || raw.starts_with("127.0.0.1") {
            format!("http://{raw}")
        } else {
            format!("https://{raw}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidAppInfo {
            field,
            value: raw.to_owned(),
            source: e.into(),
        })?;
        let host = url.host_str().ok_or_else(|| ConfigError::InvalidAppInfo {
            field,
            value: raw.to_owned(),
            source: anyhow::anyhow!("The URL has no host"),
        })?;
        Ok(Self {
            scheme: url.scheme().to_owned(),
            host: host.to_owned(),
        })
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// The last two labels of the host, or the whole host for IPs and single-label hosts.
    pub fn top_level_domain(&self) -> &str {
        if self.host.parse::<std::net::IpAddr>().is_ok() {
            return &self.host;
        }
        let mut dots = self.host.rmatch_indices('.').map(|(i, _)| i);
        match (dots.next(), dots.next()) {
            (Some(_), Some(second)) => &self.host[second + 1..],
            _ => &self.host,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}
