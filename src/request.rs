use std::fmt;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method,
};

use crate::{DocDbError, Result};

/// Authentication material attached to a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic {
        username: String,
        password: String,
    },
    /// Token sent as `Authorization: Bearer <token>`.
    Bearer(String),
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Bearer credentials. The `Bearer ` prefix is optional.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::Bearer(normalize_bearer_authorization(token.as_ref()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Logical description of one HTTP request.
///
/// Interceptors may rewrite any field between attempts, including the
/// method and the URL.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Absolute URL, or a path joined onto the client base URL.
    pub url: String,
    pub method: Method,
    /// Header names are case-insensitive.
    pub headers: HeaderMap,
    pub credentials: Option<Credentials>,
    pub body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            credentials: None,
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Adds a header. Invalid names or values are rejected.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| DocDbError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| DocDbError::Config(format!("invalid value for header '{name}': {err}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the body and marks it as JSON.
    pub fn json(mut self, value: &serde_json::Value) -> Self {
        self.body = Some(value.to_string().into_bytes());
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(DocDbError::Config("request url must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Resolves `url` against `base_url` unless it already carries a scheme.
    pub(crate) fn resolve_url(&self, base_url: &str) -> String {
        let url = self.url.trim();
        if has_scheme(url) || base_url.is_empty() {
            return url.to_owned();
        }
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

/// Client-wide values filled into every request before it is sent.
#[derive(Clone, Debug, Default)]
pub(crate) struct RequestDefaults {
    pub(crate) base_url: String,
    pub(crate) credentials: Option<Credentials>,
}

impl RequestDefaults {
    pub(crate) fn apply(&self, request: &mut RequestOptions) {
        request.url = request.resolve_url(&self.base_url);
        if request.credentials.is_none() {
            request.credentials = self.credentials.clone();
        }
    }
}

/// Whether `url` starts with `scheme://`. A `://` inside the path or the
/// query string does not count.
fn has_scheme(url: &str) -> bool {
    let Some(end) = url.find("://") else {
        return false;
    };
    let scheme = &url[..end];
    scheme
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

pub(crate) fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
