use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};

use crate::{
    outcome::{Outcome, Response, TransportError},
    request::{Credentials, RequestOptions},
};

const USER_AGENT: &str = concat!("docdb-http/", env!("CARGO_PKG_VERSION"));

/// Executes a single HTTP transfer.
///
/// Implementations must not interpret status codes: every response that
/// arrives is an [`Outcome::Response`]. Timeouts and connection failures are
/// reported as [`Outcome::Error`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, request: &RequestOptions) -> Outcome;
}

/// Baseline transport backed by `reqwest`.
///
/// `Accept` and `User-Agent` are filled in when the request does not set
/// them.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    async fn send(&self, request: &RequestOptions) -> Result<Response, TransportError> {
        let mut headers = request.headers.clone();
        headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        headers
            .entry(header::USER_AGENT)
            .or_insert(HeaderValue::from_static(USER_AGENT));

        let mut builder = self
            .http
            .request(request.method.clone(), request.url.as_str())
            .headers(headers)
            .timeout(self.timeout);

        builder = match &request.credentials {
            Some(Credentials::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(Credentials::Bearer(authorization)) => {
                builder.header(header::AUTHORIZATION, authorization)
            }
            None => builder,
        };
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Response {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform(&self, request: &RequestOptions) -> Outcome {
        self.send(request).await.into()
    }
}
