//! Executes single resource operations under the client's policy.

use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::options::CallOptions;

/// Query key and value that give collection GETs a stable order, which
/// unlimited cursor pagination requires.
pub const ORDER_PARAM: &str = "order";
pub const DEFAULT_ORDER: &str = "id(asc)";

/// Upper bound on API-to-API redirects followed for one operation.
pub const MAX_REDIRECTS: usize = 5;

/// Decoded body of a resource operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceResponse {
    Json(Value),
    Bytes(Vec<u8>),
    NoContent,
}

impl ResourceResponse {
    pub fn into_json(self) -> Result<Value> {
        match self {
            ResourceResponse::Json(value) => Ok(value),
            ResourceResponse::Bytes(bytes) => Err(ApiError::InvalidResponse(format!(
                "expected JSON, got {} bytes of other content",
                bytes.len()
            ))),
            ResourceResponse::NoContent => Err(ApiError::InvalidResponse(
                "expected JSON, got no content".to_string(),
            )),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            ResourceResponse::Bytes(bytes) => Ok(bytes),
            ResourceResponse::Json(value) => Ok(serde_json::to_vec(&value)?),
            ResourceResponse::NoContent => Ok(Vec::new()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResourceResponse::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_no_content(&self) -> bool {
        matches!(self, ResourceResponse::NoContent)
    }
}

/// Issues GET/POST/PATCH/DELETE through the API transport chain.
///
/// Rate-limit recovery lives in the transport chain itself; this layer adds
/// the default ordering, object storage redirects, strict status checking,
/// and decoding.
pub struct RequestExecutor {
    api: Arc<dyn Transport>,
    storage: Arc<dyn Transport>,
    raise_for_status: bool,
    object_storage_markers: Vec<String>,
}

impl RequestExecutor {
    pub fn new(api: Arc<dyn Transport>, storage: Arc<dyn Transport>, raise_for_status: bool) -> Self {
        Self {
            api,
            storage,
            raise_for_status,
            object_storage_markers: vec!["s3.".to_string()],
        }
    }

    /// Host fragments that identify object storage redirect targets.
    pub fn with_object_storage_markers(mut self, markers: Vec<String>) -> Self {
        self.object_storage_markers = markers;
        self
    }

    #[tracing::instrument(skip(self, options))]
    pub async fn get(&self, url: &str, options: &CallOptions) -> Result<ResourceResponse> {
        self.execute(Method::GET, url, None, options).await
    }

    #[tracing::instrument(skip(self, body, options))]
    pub async fn post(&self, url: &str, body: Value, options: &CallOptions) -> Result<ResourceResponse> {
        self.execute(Method::POST, url, Some(body), options).await
    }

    #[tracing::instrument(skip(self, body, options))]
    pub async fn patch(&self, url: &str, body: Value, options: &CallOptions) -> Result<ResourceResponse> {
        self.execute(Method::PATCH, url, Some(body), options).await
    }

    #[tracing::instrument(skip(self, options))]
    pub async fn delete(&self, url: &str, options: &CallOptions) -> Result<ResourceResponse> {
        self.execute(Method::DELETE, url, None, options).await
    }

    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: &CallOptions,
    ) -> Result<ResourceResponse> {
        let mut request = HttpRequest::new(method, url);
        options.apply(&mut request)?;
        if let Some(body) = body {
            request = request.with_json(body);
        }
        self.send(request).await
    }

    /// Sends a prepared request, following redirects.
    pub async fn send(&self, mut request: HttpRequest) -> Result<ResourceResponse> {
        for _ in 0..=MAX_REDIRECTS {
            if request.method == Method::GET && !request.has_query_key(ORDER_PARAM) {
                request.query.insert(ORDER_PARAM.to_string(), DEFAULT_ORDER.to_string());
            }

            let response = self.api.execute(request.clone()).await?;

            let location = response.redirect_location().map(str::to_owned);
            let Some(location) = location else {
                return self.finish(response);
            };
            let target = resolve_location(&request.url, &location)?;

            if self.is_object_storage(&target) {
                return self.fetch_object(target).await;
            }

            debug!("Following redirect {} -> {}", response.status, target);
            let mut next = HttpRequest::get(target.to_string());
            next.headers = request.headers.clone();
            request = next;
        }

        Err(ApiError::TooManyRedirects(MAX_REDIRECTS))
    }

    fn is_object_storage(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        self.object_storage_markers
            .iter()
            .any(|marker| host.contains(marker.as_str()))
    }

    /// Downloads from object storage without the API credentials.
    async fn fetch_object(&self, url: Url) -> Result<ResourceResponse> {
        info!("Fetching object from storage host {}", url.host_str().unwrap_or_default());
        let response = self.storage.execute(HttpRequest::get(url.to_string())).await?;
        if !response.status.is_success() {
            warn!("Object storage answered {}", response.status);
        }
        Ok(ResourceResponse::Bytes(response.body))
    }

    fn finish(&self, response: HttpResponse) -> Result<ResourceResponse> {
        if self.raise_for_status && response.status.as_u16() > 299 {
            let body = response.body_text();
            warn!("Non-200 status code {}: {}", response.status, body);
            return Err(ApiError::HttpStatus {
                status: response.status,
                body,
            });
        }

        if response.status == StatusCode::NO_CONTENT || response.body.is_empty() {
            return Ok(ResourceResponse::NoContent);
        }

        if response.is_json() {
            Ok(ResourceResponse::Json(serde_json::from_slice(&response.body)?))
        } else {
            Ok(ResourceResponse::Bytes(response.body))
        }
    }
}

fn resolve_location(base: &str, location: &str) -> Result<Url> {
    let joined = match Url::parse(base) {
        Ok(base) => base.join(location),
        Err(_) => Url::parse(location),
    };
    joined.map_err(|e| ApiError::InvalidUrl(format!("{}: {}", location, e)))
}
