//! Client for the Clio Manage v4 REST API.
//!
//! Wraps an issued OAuth access token in a transport chain that can recover
//! from rate limits, walks cursor-paginated collections lazily, and uploads
//! documents through pre-signed object storage targets, splitting large files
//! into parts.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod options;
pub mod pagination;
pub mod upload;

pub use client::Client;
pub use config::{ClientConfig, Region, UploadConfig};
pub use error::{ApiError, Result};
pub use executor::{RequestExecutor, ResourceResponse};
pub use http::{RateLimitBudget, RateLimitSnapshot};
pub use options::CallOptions;
pub use pagination::{Listing, PageEnvelope, Paginator};
pub use upload::{DocumentUploader, ParentRef, UploadProgress, UploadRequest, UploadSource};
