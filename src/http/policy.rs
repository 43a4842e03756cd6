//! Rate-limit recovery as a transport wrapper.
//!
//! Two upstream behaviours are handled, each with exactly one resend:
//! - a proper `429 Too Many Requests` carrying `Retry-After` seconds
//! - a structured response whose payload is base64 text mentioning
//!   [`LEGACY_RATE_LIMIT_MARKER`], sent by older edges instead of a 429

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;

use super::ratelimit::RateLimitBudget;
use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::{ApiError, Result};

/// Text found in the decoded legacy payload when the request was throttled.
pub const LEGACY_RATE_LIMIT_MARKER: &str = "RateLimited";

/// Default wait when no usable `Retry-After` is available.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
enum DecodeWorkaroundFailure {
    #[error("payload has no string `data` field")]
    MissingData,
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not UTF-8 text: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Retries once on rate limiting and records the budget after each response.
pub struct RateLimitPolicy<T> {
    inner: T,
    enabled: bool,
    fallback: Duration,
    budget: Arc<RateLimitBudget>,
}

impl<T: Transport> RateLimitPolicy<T> {
    /// `enabled` gates the 429 handling and the budget updates.
    pub fn new(inner: T, enabled: bool, budget: Arc<RateLimitBudget>) -> Self {
        Self {
            inner,
            enabled,
            fallback: DEFAULT_FALLBACK_DELAY,
            budget,
        }
    }

    pub fn with_fallback(mut self, fallback: Duration) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn budget(&self) -> &Arc<RateLimitBudget> {
        &self.budget
    }
}

#[async_trait]
impl<T: Transport> Transport for RateLimitPolicy<T> {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut response = self.inner.execute(request.clone()).await?;

        if self.enabled && response.status == StatusCode::TOO_MANY_REQUESTS {
            let delay = retry_after(&response).unwrap_or(self.fallback);
            info!("Clio rate limit hit, Retry-After: {}s", delay.as_secs());
            tokio::time::sleep(delay).await;

            response = self.inner.execute(request.clone()).await?;
        }

        match legacy_rate_limit_signal(&response) {
            Ok(true) => {
                warn!(
                    "Rate limit reported in encoded payload, waiting {}s before retrying",
                    self.fallback.as_secs()
                );
                tokio::time::sleep(self.fallback).await;
                response = self.inner.execute(request).await?;
            }
            Ok(false) => {}
            Err(e) => {
                error!(
                    "Unable to decode b64 encoded payload ({}); using response with status {} as-is",
                    e, response.status
                );
            }
        }

        if self.enabled {
            self.budget.update_from_headers(&response.headers);
            let snapshot = self.budget.snapshot();
            debug!(
                "Rate limit: {} remaining of {}",
                snapshot.remaining, snapshot.limit
            );

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ApiError::HttpStatus {
                    status: response.status,
                    body: response.body_text(),
                });
            }
        }

        Ok(response)
    }
}

/// `Retry-After` as whole seconds. HTTP dates are not used by the API.
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Detects the base64 wrapped rate-limit error.
///
/// `Ok(false)` for anything that is not the wrapper; `Err` only when the
/// wrapper is present but its payload cannot be decoded.
fn legacy_rate_limit_signal(
    response: &HttpResponse,
) -> std::result::Result<bool, DecodeWorkaroundFailure> {
    if !response.is_json() {
        return Ok(false);
    }
    let Ok(json) = serde_json::from_slice::<Value>(&response.body) else {
        return Ok(false);
    };

    let encoding = json
        .get("metadata")
        .and_then(|m| m.get("encodingDecoded"))
        .and_then(Value::as_str);
    if encoding != Some("text/plain") {
        return Ok(false);
    }

    let data = json
        .get("data")
        .and_then(Value::as_str)
        .ok_or(DecodeWorkaroundFailure::MissingData)?;
    let decoded = String::from_utf8(STANDARD.decode(data.trim())?)?;

    Ok(decoded.contains(LEGACY_RATE_LIMIT_MARKER))
}
