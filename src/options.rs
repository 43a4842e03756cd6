use std::collections::BTreeMap;

use crate::error::Result;
use crate::http::HttpRequest;

/// Per-call overrides understood by every resource operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Field projection, sent as the `fields` query parameter
    pub fields: Option<String>,
    pub extra_params: BTreeMap<String, String>,
    pub extra_headers: BTreeMap<String, String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(fields: impl Into<String>) -> Self {
        Self {
            fields: Some(fields.into()),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Prepends `base` to the caller's projection, e.g. for fields a
    /// workflow always needs.
    pub fn with_base_fields(&self, base: &str) -> Self {
        let fields = match self.fields.as_deref() {
            Some(extra) if !extra.is_empty() => format!("{},{}", base, extra),
            _ => base.to_string(),
        };
        Self {
            fields: Some(fields),
            ..self.clone()
        }
    }

    /// Copies the options onto a request. Query keys the URL already
    /// carries (as cursor links do) are left alone so they are not sent twice.
    pub fn apply(&self, request: &mut HttpRequest) -> Result<()> {
        let params = self
            .fields
            .iter()
            .map(|f| ("fields", f.as_str()))
            .chain(self.extra_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        for (key, value) in params {
            if !request.url_has_query_key(key) {
                request.query.insert(key.to_string(), value.to_string());
            }
        }

        for (name, value) in &self.extra_headers {
            request.insert_header(name, value)?;
        }
        Ok(())
    }
}
