//! Client configuration and regional endpoints.

use log::{info, warn};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const CLIO_BASE_URL_US: &str = "https://app.clio.com";
pub const CLIO_BASE_URL_CA: &str = "https://ca.app.clio.com";
pub const CLIO_BASE_URL_AU: &str = "https://au.app.clio.com";
pub const CLIO_BASE_URL_EU: &str = "https://eu.app.clio.com";

/// Path of the v4 REST API below a regional base URL.
pub const API_PATH: &str = "/api/v4";

/// Files larger than this are sent with the multipart protocol (100 MiB).
pub const PART_SIZE: u64 = 104_857_600;

/// Clio data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    Us,
    Ca,
    Au,
    Eu,
}

impl Region {
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Us => CLIO_BASE_URL_US,
            Region::Ca => CLIO_BASE_URL_CA,
            Region::Au => CLIO_BASE_URL_AU,
            Region::Eu => CLIO_BASE_URL_EU,
        }
    }

    /// Parses a region name, falling back to `Us` with a warning when it is unknown.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            warn!("Invalid region supplied: {}, defaulting to 'US'", s);
            info!("Region must be one of ['US', 'CA', 'EU', 'AU']");
            Region::Us
        })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Us => "US",
            Region::Ca => "CA",
            Region::Au => "AU",
            Region::Eu => "EU",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "ca" => Ok(Region::Ca),
            "au" => Ok(Region::Au),
            "eu" => Ok(Region::Eu),
            _ => anyhow::bail!("Unknown region '{}'. Expected one of US, CA, AU, EU.", s),
        }
    }
}

/// Settings for document uploads.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Size threshold and chunk size for multipart uploads
    pub part_size: u64,
    /// Number of part PUTs allowed in flight at once (1 = sequential)
    pub max_concurrent_parts: usize,
    /// Attach a base64 MD5 `content_md5` to every manifest entry
    pub part_checksums: bool,
    /// Overall timeout of a single PUT to a pre-signed target
    pub put_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: PART_SIZE,
            max_concurrent_parts: 1,
            part_checksums: false,
            put_timeout: Duration::from_secs(3600),
        }
    }
}

/// Behaviour switches for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub region: Region,
    /// Replaces the regional base URL (e.g. a proxy or a test server)
    pub base_url_override: Option<String>,
    /// Sleep and retry once when the API rate limits us, and track the budget
    pub ratelimit: bool,
    /// Turn non-success statuses into errors
    pub raise_for_status: bool,
    /// Follow `meta.paging.next` automatically on collection endpoints
    pub autopaginate: bool,
    /// Overall timeout for object storage downloads
    pub download_timeout: Duration,
    /// Connect timeout for object storage downloads
    pub connect_timeout: Duration,
    /// Wait used when the server signals a rate limit without a usable `Retry-After`
    pub rate_limit_fallback: Duration,
    pub user_agent: String,
    /// Redirect targets whose host contains one of these are object storage
    pub object_storage_markers: Vec<String>,
    pub upload: UploadConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: Region::Us,
            base_url_override: None,
            ratelimit: false,
            raise_for_status: false,
            autopaginate: true,
            download_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            rate_limit_fallback: Duration::from_secs(60),
            user_agent: concat!("hyacinth/", env!("CARGO_PKG_VERSION")).to_string(),
            object_storage_markers: vec!["s3.".to_string()],
            upload: UploadConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or_else(|| self.region.base_url())
    }

    pub fn api_base_url(&self) -> String {
        format!("{}{}", self.base_url(), API_PATH)
    }

    /// Builds the URL of an API resource, e.g. `contacts/1` to `.../api/v4/contacts/1.json`.
    pub fn make_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.api_base_url(), path.trim_matches('/'))
    }
}
