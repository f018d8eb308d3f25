use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use reqwest::Url;
use reqwest::header::HeaderValue;
use reqwest_middleware::{ClientWithMiddleware, Middleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use reqwest_tracing::TracingMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing_log_error::log_error;

use super::errors::{CoreConfigError, CoreError};
use super::protocol::*;
use super::CoreBackend;
use crate::Payload;

/// The core driver interface versions this SDK can speak, oldest first.
const SUPPORTED_CDI_VERSIONS: &[&str] = &["5.0", "5.1", "5.2"];

/// How to reach the SuperTokens core.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct HttpCoreConfig {
    /// One or more base URLs, separated by `;`.
    ///
    /// Hosts are tried in order: a transport failure on one of them moves on to the next.
    pub connection_uri: String,
    /// Sent to the core via the `api-key` header.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Timeout for a single request to the core.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// How many times a request is retried on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    3
}

impl HttpCoreConfig {
    pub fn new(connection_uri: impl Into<String>) -> Self {
        Self {
            connection_uri: connection_uri.into(),
            api_key: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }
}

/// A [`CoreBackend`] that talks to a SuperTokens core over HTTP.
#[derive(Debug)]
pub struct HttpCore {
    hosts: Vec<Url>,
    client: ClientWithMiddleware,
    cdi_version: OnceCell<String>,
}

impl HttpCore {
    pub fn new(config: HttpCoreConfig) -> Result<Self, CoreConfigError> {
        let hosts = parse_hosts(&config.connection_uri)?;
        let reqwest_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreConfigError::HttpClient(e.into()))?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = reqwest_middleware::ClientBuilder::new(reqwest_client)
            .with(SdkHeadersInjector {
                api_key: config.api_key,
            })
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            hosts,
            client,
            cdi_version: OnceCell::new(),
        })
    }

    /// The interface version negotiated with the core, fetched once and then cached.
    async fn cdi_version(&self) -> Result<&str, CoreError> {
        self.cdi_version
            .get_or_try_init(|| async {
                #[derive(Deserialize)]
                struct ApiVersions {
                    versions: Vec<String>,
                }
                let response: ApiVersions = self
                    .send(http::Method::GET, "/apiversion", &[], None::<&()>, None)
                    .await?;
                pick_cdi_version(&response.versions).ok_or_else(|| {
                    CoreError::Other(anyhow::anyhow!(
                        "The SuperTokens core supports interface versions {:?}, none of which is supported by this SDK ({:?})",
                        response.versions,
                        SUPPORTED_CDI_VERSIONS
                    ))
                })
            })
            .await
            .map(String::as_str)
    }

    async fn call<B, T>(
        &self,
        method: http::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, CoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let cdi_version = self.cdi_version().await?.to_owned();
        self.send(method, path, query, body, Some(&cdi_version)).await
    }

    async fn send<B, T>(
        &self,
        method: http::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
        cdi_version: Option<&str>,
    ) -> Result<T, CoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut last_error = None;
        for host in &self.hosts {
            let url = format!("{}{}", host.as_str().trim_end_matches('/'), path);
            let mut request = self.client.request(method.clone(), &url).query(query);
            if let Some(cdi_version) = cdi_version {
                request = request.header("cdi-version", cdi_version);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    log_error!(
                        e,
                        level: tracing::Level::WARN,
                        core.host = %host,
                        "Failed to reach a SuperTokens core host, trying the next one"
                    );
                    last_error = Some(e);
                    continue;
                }
            };
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CoreError::Unreachable(e.into()))?;
            if !status.is_success() {
                return Err(CoreError::UnexpectedStatusCode {
                    method,
                    path: path.to_owned(),
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            return serde_json::from_slice(&bytes).map_err(|source| CoreError::Deserialization {
                path: path.to_owned(),
                source,
            });
        }
        Err(CoreError::Unreachable(match last_error {
            Some(e) => e.into(),
            None => anyhow::anyhow!("No core host is configured"),
        }))
    }
}

fn parse_hosts(connection_uri: &str) -> Result<Vec<Url>, CoreConfigError> {
    let hosts = connection_uri
        .split(';')
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(|uri| {
            Url::parse(uri).map_err(|e| CoreConfigError::InvalidConnectionUri {
                uri: uri.to_owned(),
                source: e.into(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if hosts.is_empty() {
        return Err(CoreConfigError::NoHosts);
    }
    Ok(hosts)
}

/// The newest version supported by both sides.
fn pick_cdi_version(core_versions: &[String]) -> Option<String> {
    fn parse(v: &str) -> Option<(u32, u32)> {
        let (major, minor) = v.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }
    core_versions
        .iter()
        .filter(|v| SUPPORTED_CDI_VERSIONS.contains(&v.as_str()))
        .max_by_key(|v| parse(v))
        .cloned()
}

/// The `public` tenant is the default one, its prefix is omitted.
fn tenant_path(tenant_id: &str, path: &str) -> String {
    if tenant_id == DEFAULT_TENANT_ID {
        path.to_owned()
    } else {
        format!("/{tenant_id}{path}")
    }
}

/// Check that the core replied with an `OK` status.
fn expect_ok(path: &str, body: &Value) -> Result<(), CoreError> {
    match body.get("status").and_then(Value::as_str) {
        Some("OK") => Ok(()),
        other => Err(CoreError::UnexpectedStatus {
            path: path.to_owned(),
            status: other.unwrap_or("<missing>").to_owned(),
        }),
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: Value) -> Result<T, CoreError> {
    serde_json::from_value(body).map_err(|source| CoreError::Deserialization {
        path: path.to_owned(),
        source,
    })
}

/// Inject the headers the core expects on every request.
struct SdkHeadersInjector {
    api_key: Option<SecretString>,
}

const SDK_RID: HeaderValue = HeaderValue::from_static("session");

#[async_trait::async_trait]
impl Middleware for SdkHeadersInjector {
    async fn handle(
        &self,
        mut req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> Result<reqwest::Response, reqwest_middleware::Error> {
        if let Some(api_key) = &self.api_key {
            if let Ok(mut value) = HeaderValue::from_str(api_key.expose_secret()) {
                value.set_sensitive(true);
                req.headers_mut().insert("api-key", value);
            }
        }
        req.headers_mut().insert("rid", SDK_RID);
        next.run(req, extensions).await
    }
}

#[async_trait::async_trait]
impl CoreBackend for HttpCore {
    async fn create_session(
        &self,
        request: CreateSessionRequest<'_>,
    ) -> Result<NewSessionTokens, CoreError> {
        let path = tenant_path(request.tenant_id, "/recipe/session");
        let body: Value = self
            .call(http::Method::POST, &path, &[], Some(&request))
            .await?;
        expect_ok(&path, &body)?;
        decode(&path, body)
    }

    async fn verify_session(
        &self,
        request: VerifySessionRequest<'_>,
    ) -> Result<VerifyOutcome, CoreError> {
        let path = "/recipe/session/verify";
        let body: Value = self
            .call(http::Method::POST, path, &[], Some(&request))
            .await?;
        decode(path, body)
    }

    async fn refresh_session(
        &self,
        request: RefreshSessionRequest<'_>,
    ) -> Result<RefreshOutcome, CoreError> {
        let path = "/recipe/session/refresh";
        let body: Value = self
            .call(http::Method::POST, path, &[], Some(&request))
            .await?;
        decode(path, body)
    }

    async fn regenerate_session(
        &self,
        access_token: &str,
        payload: Option<&Payload>,
    ) -> Result<RegenerateOutcome, CoreError> {
        let path = "/recipe/session/regenerate";
        let mut request = json!({ "accessToken": access_token });
        if let Some(payload) = payload {
            request["userDataInJWT"] = Value::Object(payload.clone());
        }
        let body: Value = self
            .call(http::Method::POST, path, &[], Some(&request))
            .await?;
        decode(path, body)
    }

    async fn revoke_sessions(&self, handles: &[String]) -> Result<Vec<String>, CoreError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Revoked {
            session_handles_revoked: Vec<String>,
        }
        let path = "/recipe/session/remove";
        let body: Value = self
            .call(
                http::Method::POST,
                path,
                &[],
                Some(&json!({ "sessionHandles": handles })),
            )
            .await?;
        expect_ok(path, &body)?;
        Ok(decode::<Revoked>(path, body)?.session_handles_revoked)
    }

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Revoked {
            session_handles_revoked: Vec<String>,
        }
        let path = tenant_path(
            tenant_id.unwrap_or(DEFAULT_TENANT_ID),
            "/recipe/session/remove",
        );
        let request = json!({
            "userId": user_id,
            "revokeAcrossAllTenants": tenant_id.is_none(),
        });
        let body: Value = self
            .call(http::Method::POST, &path, &[], Some(&request))
            .await?;
        expect_ok(&path, &body)?;
        Ok(decode::<Revoked>(&path, body)?.session_handles_revoked)
    }

    async fn session_handles_for_user(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Handles {
            session_handles: Vec<String>,
        }
        let path = tenant_path(
            tenant_id.unwrap_or(DEFAULT_TENANT_ID),
            "/recipe/session/user",
        );
        let across_tenants = if tenant_id.is_none() { "true" } else { "false" };
        let body: Value = self
            .call(
                http::Method::GET,
                &path,
                &[("userId", user_id), ("fetchAcrossAllTenants", across_tenants)],
                None::<&()>,
            )
            .await?;
        expect_ok(&path, &body)?;
        Ok(decode::<Handles>(&path, body)?.session_handles)
    }

    async fn session_information(
        &self,
        handle: &str,
    ) -> Result<Option<SessionInformation>, CoreError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            user_id: String,
            #[serde(default)]
            recipe_user_id: Option<String>,
            #[serde(default = "default_tenant_id")]
            tenant_id: String,
            #[serde(default)]
            user_data_in_database: Value,
            #[serde(rename = "userDataInJWT", default)]
            user_data_in_jwt: Payload,
            expiry: i64,
            time_created: i64,
        }
        let path = "/recipe/session";
        let body: Value = self
            .call(
                http::Method::GET,
                path,
                &[("sessionHandle", handle)],
                None::<&()>,
            )
            .await?;
        match body.get("status").and_then(Value::as_str) {
            Some("UNAUTHORISED") => return Ok(None),
            _ => expect_ok(path, &body)?,
        }
        let wire: Wire = decode(path, body)?;
        Ok(Some(SessionInformation {
            session_handle: handle.to_owned(),
            recipe_user_id: wire.recipe_user_id.unwrap_or_else(|| wire.user_id.clone()),
            user_id: wire.user_id,
            tenant_id: wire.tenant_id,
            session_data_in_database: wire.user_data_in_database,
            custom_claims_in_access_token_payload: wire.user_data_in_jwt,
            expiry: wire.expiry,
            time_created: wire.time_created,
        }))
    }

    async fn update_session_data(&self, handle: &str, data: &Value) -> Result<bool, CoreError> {
        let path = "/recipe/session/data";
        let request = json!({ "sessionHandle": handle, "userDataInDatabase": data });
        let body: Value = self
            .call(http::Method::PUT, path, &[], Some(&request))
            .await?;
        match body.get("status").and_then(Value::as_str) {
            Some("UNAUTHORISED") => Ok(false),
            _ => expect_ok(path, &body).map(|_| true),
        }
    }

    async fn update_access_token_payload(
        &self,
        handle: &str,
        payload: &Payload,
    ) -> Result<bool, CoreError> {
        let path = "/recipe/jwt/data";
        let request = json!({ "sessionHandle": handle, "userDataInJWT": payload });
        let body: Value = self
            .call(http::Method::PUT, path, &[], Some(&request))
            .await?;
        match body.get("status").and_then(Value::as_str) {
            Some("UNAUTHORISED") => Ok(false),
            _ => expect_ok(path, &body).map(|_| true),
        }
    }

    async fn jwks(&self) -> Result<JwkSet, CoreError> {
        self.call(http::Method::GET, "/recipe/jwt/jwks", &[], None::<&()>)
            .await
    }

    async fn is_email_verified(
        &self,
        tenant_id: &str,
        recipe_user_id: &str,
        email: &str,
    ) -> Result<bool, CoreError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Verified {
            is_verified: bool,
        }
        let path = tenant_path(tenant_id, "/recipe/user/email/verify");
        let body: Value = self
            .call(
                http::Method::GET,
                &path,
                &[("userId", recipe_user_id), ("email", email)],
                None::<&()>,
            )
            .await?;
        expect_ok(&path, &body)?;
        Ok(decode::<Verified>(&path, body)?.is_verified)
    }

    async fn roles_for_user(&self, tenant_id: &str, user_id: &str) -> Result<Vec<String>, CoreError> {
        #[derive(Deserialize)]
        struct Roles {
            roles: Vec<String>,
        }
        let path = tenant_path(tenant_id, "/recipe/user/roles");
        let body: Value = self
            .call(http::Method::GET, &path, &[("userId", user_id)], None::<&()>)
            .await?;
        expect_ok(&path, &body)?;
        Ok(decode::<Roles>(&path, body)?.roles)
    }

    async fn permissions_for_role(&self, role: &str) -> Result<Option<Vec<String>>, CoreError> {
        #[derive(Deserialize)]
        struct Permissions {
            permissions: Vec<String>,
        }
        let path = "/recipe/role/permissions";
        let body: Value = self
            .call(http::Method::GET, path, &[("role", role)], None::<&()>)
            .await?;
        match body.get("status").and_then(Value::as_str) {
            Some("UNKNOWN_ROLE_ERROR") => Ok(None),
            _ => {
                expect_ok(path, &body)?;
                Ok(Some(decode::<Permissions>(path, body)?.permissions))
            }
        }
    }
}
