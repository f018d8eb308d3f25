//! An adapter for the request and response types of the `http` crate.
use std::collections::HashMap;

use biscotti::{Processor, ProcessorConfig, RemovalCookie, RequestCookies, ResponseCookie, ResponseCookies};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{HeaderName, HeaderValue, StatusCode};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing_log_error::log_error;

use super::errors::BadInputError;
use super::{BaseRequest, BaseResponse, OutgoingCookie, SameSite};

/// A fully buffered `http::Request`, seen through [`BaseRequest`].
#[derive(Debug)]
pub struct HttpRequest {
    head: http::request::Parts,
    body: Bytes,
    cookies: HashMap<String, String>,
    original_url: String,
}

impl HttpRequest {
    pub fn new(request: http::Request<Bytes>) -> Self {
        let (head, body) = request.into_parts();
        let cookies = parse_cookies(&head.headers);
        let original_url = head
            .uri
            .path_and_query()
            .map(|p| p.as_str().to_owned())
            .unwrap_or_else(|| head.uri.path().to_owned());
        Self {
            head,
            body,
            cookies,
            original_url,
        }
    }

    pub fn head(&self) -> &http::request::Parts {
        &self.head
    }
}

impl From<http::Request<Bytes>> for HttpRequest {
    fn from(request: http::Request<Bytes>) -> Self {
        Self::new(request)
    }
}

fn parse_cookies(headers: &http::HeaderMap) -> HashMap<String, String> {
    let processor: Processor = ProcessorConfig::default().into();
    let mut parsed = HashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            tracing::warn!("A `Cookie` header contains non-UTF8 characters, ignoring it");
            continue;
        };
        // Malformed cookies are skipped one by one, the rest of the header is kept.
        let mut cookies = RequestCookies::new();
        if let Err(e) = cookies.extend_from_header(header, &processor) {
            log_error!(
                e,
                level: tracing::Level::WARN,
                "A request cookie is invalid, ignoring it"
            );
            continue;
        }
        for pair in header.split(';') {
            let Some((name, _)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if parsed.contains_key(name) {
                continue;
            }
            if let Some(cookie) = cookies.get(name) {
                parsed.insert(name.to_owned(), cookie.value().to_owned());
            }
        }
    }
    parsed
}

#[async_trait::async_trait]
impl BaseRequest for HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    fn query_value(&self, key: &str) -> Option<String> {
        let query = self.head.uri.query()?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if decode_query_component(k) == key {
                Some(decode_query_component(v))
            } else {
                None
            }
        })
    }

    fn method(&self) -> &http::Method {
        &self.head.method
    }

    fn original_url(&self) -> &str {
        &self.original_url
    }

    async fn json_body(&self) -> Result<Value, BadInputError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| BadInputError::with_source("The request body is not valid JSON", e))
    }
}

fn decode_query_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    percent_decode_str(&raw).decode_utf8_lossy().into_owned()
}

/// A response under construction, turned into an `http::Response` by
/// [`HttpResponse::into_response`].
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: http::HeaderMap,
    cookies: Vec<OutgoingCookie>,
    body: Option<Value>,
    writable: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: http::HeaderMap::new(),
            cookies: Vec::new(),
            body: None,
            writable: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    /// The last cookie set with the given name.
    pub fn cookie(&self, name: &str) -> Option<&OutgoingCookie> {
        self.cookies.iter().rev().find(|c| c.name == name)
    }

    pub fn cookies(&self) -> &[OutgoingCookie] {
        &self.cookies
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Stop accepting writes, as if the response had already been flushed.
    pub fn close(&mut self) {
        self.writable = false;
    }

    /// Assemble the final `http::Response`, serializing cookies into `Set-Cookie` headers.
    pub fn into_response(self) -> http::Response<Bytes> {
        let processor: Processor = ProcessorConfig::default().into();
        let now_ms = jiff::Timestamp::now().as_millisecond();
        let mut response_cookies = ResponseCookies::new();
        for cookie in self.cookies {
            response_cookies.insert(to_biscotti(cookie, now_ms));
        }

        let mut headers = self.headers;
        for value in response_cookies.header_values(&processor) {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => {
                    log_error!(e, "A session cookie can't be encoded as a header value, skipping it");
                }
            }
        }
        let body = match self.body {
            Some(body) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Bytes::from(body.to_string())
            }
            None => Bytes::new(),
        };

        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

fn to_biscotti(cookie: OutgoingCookie, now_ms: i64) -> ResponseCookie<'static> {
    let same_site = match cookie.same_site {
        SameSite::Strict => biscotti::SameSite::Strict,
        SameSite::Lax => biscotti::SameSite::Lax,
        SameSite::None => biscotti::SameSite::None,
    };
    if cookie.is_removal() {
        let mut removal = RemovalCookie::new(cookie.name).set_path(cookie.path);
        if let Some(domain) = cookie.domain {
            removal = removal.set_domain(domain);
        }
        return removal.into();
    }
    let max_age_secs = (cookie.expires_at_ms - now_ms).max(0) / 1000;
    let mut out = ResponseCookie::new(cookie.name, cookie.value)
        .set_path(cookie.path)
        .set_same_site(same_site)
        .set_max_age(jiff::SignedDuration::from_secs(max_age_secs));
    if let Some(domain) = cookie.domain {
        out = out.set_domain(domain);
    }
    if cookie.secure {
        out = out.set_secure(true);
    }
    if cookie.http_only {
        out = out.set_http_only(true);
    }
    out
}

impl BaseResponse for HttpResponse {
    fn set_status_code(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str, allow_duplicate: bool) {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!(header.name = %name, "Refusing to set an invalid response header");
            return;
        };
        let merged = match self.headers.get(&name) {
            Some(existing) if allow_duplicate => {
                let existing = existing.to_str().unwrap_or_default();
                HeaderValue::from_str(&format!("{existing}, {}", value.to_str().unwrap_or_default()))
                    .unwrap_or(value)
            }
            _ => value,
        };
        self.headers.insert(name, merged);
    }

    fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    fn set_cookie(&mut self, cookie: OutgoingCookie) {
        self.cookies.retain(|c| {
            !(c.name == cookie.name && c.path == cookie.path && c.domain == cookie.domain)
        });
        self.cookies.push(cookie);
    }

    fn send_json_response(&mut self, body: Value) {
        self.body = Some(body);
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
