//! Transport seam: one buffered request in, one buffered response out.
//!
//! Everything that talks HTTP goes through [`Transport::execute`]. Policies
//! such as authentication and rate-limit recovery are transports that wrap an
//! inner transport, so the chain used by a client is assembled explicitly:
//!
//! ```text
//! RateLimitPolicy<BearerAuth<ReqwestTransport>>   -> API calls
//! ReqwestTransport (unauthenticated)              -> object storage, pre-signed PUTs
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;

use crate::error::{ApiError, Result};

/// Body of an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Json(Value),
    Bytes(Vec<u8>),
}

/// A fully described request. Cloneable so a policy can resend it unchanged.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<HttpBody>,
    /// Per-request overall timeout, overriding the client default
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(HttpBody::Json(body));
        self
    }

    pub fn with_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = Some(HttpBody::Bytes(body));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.insert_header(name, value)?;
        Ok(self)
    }

    /// Sets a header, replacing any earlier value under the same name.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Adds a header, keeping any earlier values under the same name.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Whether `key` is already present in the URL's own query string.
    pub fn url_has_query_key(&self, key: &str) -> bool {
        Url::parse(&self.url)
            .map(|url| url.query_pairs().any(|(k, _)| k == key))
            .unwrap_or(false)
    }

    /// Whether `key` will be sent, either from the URL or the query map.
    pub fn has_query_key(&self, key: &str) -> bool {
        self.query.contains_key(key) || self.url_has_query_key(key)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ApiError::InvalidHeader(format!("{}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| ApiError::InvalidHeader(format!("{}: {}", name, e)))?;
    Ok((name, value))
}

/// A response with its body read to the end.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"))
    }

    /// `Location` of a 3xx response.
    pub fn redirect_location(&self) -> Option<&str> {
        if self.status.is_redirection() {
            self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
        } else {
            None
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request. Only network-level failures are errors here;
    /// every HTTP status is returned as a response.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).execute(request).await
    }
}

/// Transport backed by a `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client for API calls. Redirects are not followed so the executor can
    /// route object storage redirects away from the credentials.
    pub fn for_api(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::new(client))
    }

    /// Client without credentials for object storage and pre-signed targets.
    pub fn unauthenticated(
        user_agent: &str,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self::new(client))
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("{} {} {:?}", request.method, request.url, request.query);

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body {
            Some(HttpBody::Json(value)) => builder.json(&value),
            Some(HttpBody::Bytes(bytes)) => builder.body(bytes),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        debug!("{} ({} bytes)", status, body.len());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Adds a bearer token to every request passing through.
///
/// Token negotiation and refresh happen elsewhere; this only attaches an
/// already issued access token.
pub struct BearerAuth<T> {
    inner: T,
    value: HeaderValue,
}

impl<T: Transport> BearerAuth<T> {
    pub fn new(inner: T, token: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiError::InvalidHeader(format!("authorization: {}", e)))?;
        value.set_sensitive(true);
        debug!("Using access token {}", mask_token(token));
        Ok(Self { inner, value })
    }
}

#[async_trait]
impl<T: Transport> Transport for BearerAuth<T> {
    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if !request.headers.contains_key(AUTHORIZATION) {
            request.headers.insert(AUTHORIZATION, self.value.clone());
        }
        self.inner.execute(request).await
    }
}

/// Masks a secret for logging: first and last four characters only.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
