//! High-level entry point tying the transport chain, executor, paginator,
//! and uploader together.

use std::sync::Arc;

use log::debug;
use serde_json::{Value, json};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::executor::{RequestExecutor, ResourceResponse};
use crate::http::{BearerAuth, RateLimitBudget, RateLimitPolicy, RateLimitSnapshot, ReqwestTransport, Transport};
use crate::options::CallOptions;
use crate::pagination::{Listing, Paginator};
use crate::upload::{DocumentUploader, ParentRef, ProgressFn, UploadRequest};

const WEBHOOK_FIELDS: &str = "id,shared_secret,status,expires_at";
const CUSTOM_ACTION_NONCE_PARAM: &str = "custom_action_nonce";

/// Client for the Clio v4 API.
///
/// ```no_run
/// # async fn run() -> hyacinth::Result<()> {
/// use hyacinth::{CallOptions, Client, ClientConfig};
///
/// let client = Client::new("access-token", ClientConfig::default())?;
/// let me = client.who_am_i(&CallOptions::fields("id,name")).await?;
/// println!("{}", me["data"]["name"]);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
    executor: Arc<RequestExecutor>,
    uploader: DocumentUploader,
    budget: Arc<RateLimitBudget>,
}

impl Client {
    /// Builds the production transport chain around an issued access token.
    pub fn new(token: &str, config: ClientConfig) -> Result<Self> {
        let budget = Arc::new(RateLimitBudget::new());
        let authenticated = BearerAuth::new(ReqwestTransport::for_api(&config.user_agent)?, token)?;
        let api = RateLimitPolicy::new(authenticated, config.ratelimit, budget.clone())
            .with_fallback(config.rate_limit_fallback);
        let storage = ReqwestTransport::unauthenticated(
            &config.user_agent,
            config.connect_timeout,
            config.download_timeout,
        )?;

        debug!(
            "Client for {} (ratelimit: {}, strict: {}, autopaginate: {})",
            config.api_base_url(),
            config.ratelimit,
            config.raise_for_status,
            config.autopaginate
        );
        Ok(Self::with_transports(config, Arc::new(api), Arc::new(storage), budget))
    }

    /// Assembles a client from caller-supplied transports. `budget` should be
    /// the one the API chain's [`RateLimitPolicy`] updates.
    pub fn with_transports(
        config: ClientConfig,
        api: Arc<dyn Transport>,
        storage: Arc<dyn Transport>,
        budget: Arc<RateLimitBudget>,
    ) -> Self {
        let executor = Arc::new(
            RequestExecutor::new(api, storage.clone(), config.raise_for_status)
                .with_object_storage_markers(config.object_storage_markers.clone()),
        );
        let uploader = DocumentUploader::new(executor.clone(), storage, config.clone());
        Self {
            config,
            executor,
            uploader,
            budget,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Rate-limit budget as of the latest API response.
    pub fn rate_limit(&self) -> RateLimitSnapshot {
        self.budget.snapshot()
    }

    pub fn make_url(&self, path: &str) -> String {
        self.config.make_url(path)
    }

    pub async fn get_resource(&self, url: &str, options: &CallOptions) -> Result<ResourceResponse> {
        self.executor.get(url, options).await
    }

    pub async fn post_resource(&self, url: &str, body: Value, options: &CallOptions) -> Result<ResourceResponse> {
        self.executor.post(url, body, options).await
    }

    pub async fn patch_resource(&self, url: &str, body: Value, options: &CallOptions) -> Result<ResourceResponse> {
        self.executor.patch(url, body, options).await
    }

    pub async fn delete_resource(&self, url: &str, options: &CallOptions) -> Result<ResourceResponse> {
        self.executor.delete(url, options).await
    }

    /// Lists a collection. With autopagination on nothing is fetched until
    /// the returned paginator is polled; with it off the first page is
    /// fetched and returned as is.
    pub async fn get_paginated(&self, url: &str, options: &CallOptions) -> Result<Listing> {
        if self.config.autopaginate {
            Ok(Listing::Items(self.paginate(url, options)))
        } else {
            let page = self.executor.get(url, options).await?.into_json()?;
            Ok(Listing::Page(page))
        }
    }

    /// Paginator over `url`, regardless of the autopaginate setting.
    pub fn paginate(&self, url: &str, options: &CallOptions) -> Paginator {
        Paginator::new(self.executor.clone(), url, options.clone())
    }

    pub async fn fetch(&self, collection: &str, id: u64, options: &CallOptions) -> Result<Value> {
        let url = self.make_url(&format!("{}/{}", collection, id));
        self.get_resource(&url, options).await?.into_json()
    }

    pub async fn list(&self, collection: &str, options: &CallOptions) -> Result<Listing> {
        let url = self.make_url(collection);
        self.get_paginated(&url, options).await
    }

    /// POSTs `data` wrapped in the `{"data": ...}` envelope.
    pub async fn create(&self, collection: &str, data: Value, options: &CallOptions) -> Result<Value> {
        let url = self.make_url(collection);
        self.post_resource(&url, json!({"data": data}), options)
            .await?
            .into_json()
    }

    /// PATCHes `data` wrapped in the `{"data": ...}` envelope.
    pub async fn update(&self, collection: &str, id: u64, data: Value, options: &CallOptions) -> Result<Value> {
        let url = self.make_url(&format!("{}/{}", collection, id));
        self.patch_resource(&url, json!({"data": data}), options)
            .await?
            .into_json()
    }

    pub async fn remove(&self, collection: &str, id: u64, options: &CallOptions) -> Result<ResourceResponse> {
        let url = self.make_url(&format!("{}/{}", collection, id));
        self.delete_resource(&url, options).await
    }

    pub async fn who_am_i(&self, options: &CallOptions) -> Result<Value> {
        self.fetch_path("users/who_am_i", options).await
    }

    /// Document content. The API answers with a redirect to object storage,
    /// which is fetched without credentials.
    pub async fn download_document(&self, id: u64, options: &CallOptions) -> Result<Vec<u8>> {
        let url = self.make_url(&format!("documents/{}/download", id));
        self.get_resource(&url, options).await?.into_bytes()
    }

    pub async fn create_folder(&self, name: &str, parent: &ParentRef, options: &CallOptions) -> Result<Value> {
        self.create("folders", json!({"name": name, "parent": parent.to_json()}), options)
            .await
    }

    pub async fn upload_document(&self, request: UploadRequest) -> Result<Value> {
        self.uploader.upload(request).await
    }

    pub async fn upload_document_with_progress(&self, request: UploadRequest, progress: &ProgressFn<'_>) -> Result<Value> {
        self.uploader.upload_with_progress(request, progress).await
    }

    /// Registers a webhook. `fields` is appended to the always-sent `id`.
    pub async fn create_webhook(
        &self,
        url: &str,
        model: &str,
        events: &[&str],
        fields: Option<&str>,
        expires_at: Option<&str>,
    ) -> Result<Value> {
        let model_fields = match fields {
            Some(fields) if !fields.is_empty() => format!("id,{}", fields),
            _ => "id".to_string(),
        };
        let mut data = json!({
            "fields": model_fields,
            "events": events,
            "model": model,
            "url": url,
        });
        if let Some(expires_at) = expires_at {
            data["expires_at"] = Value::String(expires_at.to_string());
        }
        self.create("webhooks", data, &CallOptions::fields(WEBHOOK_FIELDS))
            .await
    }

    /// Confirms a custom action request by fetching its subject with the nonce.
    /// `subject_url` is the path Clio sent, relative to the regional base URL.
    pub async fn verify_custom_action(&self, subject_url: &str, nonce: &str, options: &CallOptions) -> Result<Value> {
        let url = format!("{}{}", self.config.base_url(), subject_url);
        let options = options
            .clone()
            .with_param(CUSTOM_ACTION_NONCE_PARAM, nonce);
        self.get_resource(&url, &options).await?.into_json()
    }

    async fn fetch_path(&self, path: &str, options: &CallOptions) -> Result<Value> {
        let url = self.make_url(path);
        self.get_resource(&url, options).await?.into_json()
    }
}
