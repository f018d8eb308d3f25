use bytes::Bytes;
use http::Method;
use supertokens::framework::http::{HttpRequest, HttpResponse};
use supertokens::session::transfer::{
    ACCESS_TOKEN_COOKIE, ACCESS_TOKEN_HEADER, ANTI_CSRF_HEADER, AUTH_MODE_HEADER,
    REFRESH_TOKEN_COOKIE, REFRESH_TOKEN_HEADER, RID_HEADER,
};

/// The tokens a client holds, as a browser (cookies) or an app (headers) would.
#[derive(Debug, Clone, Default)]
pub struct ClientTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub anti_csrf_token: Option<String>,
}

impl ClientTokens {
    /// Store the tokens `res` sets, dropping the ones it removes.
    pub fn from_response(res: &HttpResponse) -> Self {
        let mut tokens = Self::default();
        tokens.update(res);
        tokens
    }

    pub fn update(&mut self, res: &HttpResponse) {
        if let Some(cookie) = res.cookie(ACCESS_TOKEN_COOKIE) {
            self.access_token = (!cookie.is_removal()).then(|| cookie.value.clone());
        }
        if let Some(cookie) = res.cookie(REFRESH_TOKEN_COOKIE) {
            self.refresh_token = (!cookie.is_removal()).then(|| cookie.value.clone());
        }
        if let Some(token) = res.header(ACCESS_TOKEN_HEADER) {
            self.access_token = (!token.is_empty()).then(|| token.to_owned());
        }
        if let Some(token) = res.header(REFRESH_TOKEN_HEADER) {
            self.refresh_token = (!token.is_empty()).then(|| token.to_owned());
        }
        if let Some(token) = res.header(ANTI_CSRF_HEADER) {
            self.anti_csrf_token = Some(token.to_owned());
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token
            .as_deref()
            .expect("The client holds no access token")
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token
            .as_deref()
            .expect("The client holds no refresh token")
    }
}

/// Build a request the way a client would send it.
#[derive(Debug)]
pub struct RequestBuilder {
    inner: http::request::Builder,
    cookies: Vec<String>,
}

pub fn get(uri: &str) -> RequestBuilder {
    RequestBuilder::new(Method::GET, uri)
}

pub fn post(uri: &str) -> RequestBuilder {
    RequestBuilder::new(Method::POST, uri)
}

impl RequestBuilder {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            inner: http::Request::builder().method(method).uri(uri),
            cookies: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.inner = self.inner.header(name, value);
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(format!("{name}={value}"));
        self
    }

    /// Send the access token in the `sAccessToken` cookie.
    pub fn access_cookie(self, tokens: &ClientTokens) -> Self {
        self.cookie(ACCESS_TOKEN_COOKIE, tokens.access_token())
    }

    /// Send the refresh token in the `sRefreshToken` cookie.
    pub fn refresh_cookie(self, tokens: &ClientTokens) -> Self {
        self.cookie(REFRESH_TOKEN_COOKIE, tokens.refresh_token())
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {token}"))
    }

    pub fn auth_mode(self, mode: &str) -> Self {
        self.header(AUTH_MODE_HEADER, mode)
    }

    pub fn rid(self) -> Self {
        self.header(RID_HEADER, "session")
    }

    pub fn anti_csrf(self, token: &str) -> Self {
        self.header(ANTI_CSRF_HEADER, token)
    }

    pub fn finish(mut self) -> HttpRequest {
        if !self.cookies.is_empty() {
            self.inner = self.inner.header("cookie", self.cookies.join("; "));
        }
        let request = self
            .inner
            .body(Bytes::new())
            .expect("Failed to build the test request");
        HttpRequest::new(request)
    }
}
