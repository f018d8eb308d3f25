//! The capabilities the session subsystem needs from the hosting web framework.
//!
//! The session core only ever talks to [`BaseRequest`] and [`BaseResponse`].
//! Each framework integration provides a concrete adapter; the [`http`] module
//! ships one for the types in the `http` crate, which covers most of the
//! Rust ecosystem (`hyper`, `axum`, `pavex`, AWS Lambda runtimes, ...).
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::errors::SessionError;

pub mod http;

/// Read access to the incoming request.
#[async_trait::async_trait]
pub trait BaseRequest: Send + Sync {
    /// The value of the first header named `name`, if it's valid UTF-8.
    ///
    /// Header names are case-insensitive.
    fn header(&self, name: &str) -> Option<&str>;

    /// The value of the cookie named `name`, if present.
    fn cookie(&self, name: &str) -> Option<&str>;

    /// The value associated with `key` in the query string, percent-decoded.
    fn query_value(&self, key: &str) -> Option<String>;

    fn method(&self) -> &::http::Method;

    /// The path and query, as received.
    fn original_url(&self) -> &str;

    /// Parse the request body as JSON.
    ///
    /// An empty body is parsed as an empty JSON object.
    async fn json_body(&self) -> Result<Value, errors::BadInputError>;
}

/// Write access to the outgoing response.
pub trait BaseResponse: Send {
    fn set_status_code(&mut self, status: ::http::StatusCode);

    /// Set a response header.
    ///
    /// If `allow_duplicate` is `true` and the header is already set, the new value is appended
    /// to the existing ones (comma-separated), otherwise it replaces them.
    fn set_header(&mut self, name: &str, value: &str, allow_duplicate: bool);

    fn remove_header(&mut self, name: &str);

    fn set_cookie(&mut self, cookie: OutgoingCookie);

    fn send_json_response(&mut self, body: Value);

    /// Whether writes are still meaningful.
    ///
    /// Adapters return `false` once the response has been sent or the client went away.
    /// The session subsystem silently skips writes on a non-writable response.
    fn is_writable(&self) -> bool {
        true
    }
}

/// A cookie the session subsystem wants to set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    /// Absolute expiry, in milliseconds since the Unix epoch.
    /// `0` asks the client to delete the cookie.
    pub expires_at_ms: i64,
    pub path: String,
    pub same_site: SameSite,
}

impl OutgoingCookie {
    pub fn is_removal(&self) -> bool {
        self.expires_at_ms <= 0
    }
}

/// The `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "strict",
            SameSite::Lax => "lax",
            SameSite::None => "none",
        }
    }
}

/// Serialize `body` and send it as a JSON response.
pub fn send_json<T>(response: &mut dyn BaseResponse, body: &T) -> Result<(), SessionError>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_value(body).map_err(|e| SessionError::General(e.into()))?;
    if response.is_writable() {
        response.send_json_response(body);
    } else {
        tracing::trace!("The response is no longer writable, dropping the JSON body");
    }
    Ok(())
}

pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The incoming request is malformed.
    #[error("{message}")]
    pub struct BadInputError {
        pub message: String,
        #[source]
        pub source: Option<anyhow::Error>,
    }

    impl BadInputError {
        pub fn new(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
                source: None,
            }
        }

        pub fn with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
            Self {
                message: message.into(),
                source: Some(source.into()),
            }
        }
    }
}
