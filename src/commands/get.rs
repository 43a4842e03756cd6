use anyhow::{Context, Result};
use std::io::Write;

use crate::client::Client;
use crate::options::CallOptions;

use super::write_json;

/// Print the authenticated user
#[tracing::instrument(skip(client, out))]
pub async fn whoami<W: Write>(client: &Client, fields: Option<&str>, out: &mut W) -> Result<()> {
    let options = fields.map(CallOptions::fields).unwrap_or_default();
    let me = client
        .who_am_i(&options)
        .await
        .context("Failed to fetch the current user")?;
    write_json(out, &me)
}

/// Print a single resource
#[tracing::instrument(skip(client, out))]
pub async fn get<W: Write>(
    client: &Client,
    collection: &str,
    id: u64,
    fields: Option<&str>,
    out: &mut W,
) -> Result<()> {
    let options = fields.map(CallOptions::fields).unwrap_or_default();
    let resource = client
        .fetch(collection, id, &options)
        .await
        .with_context(|| format!("Failed to fetch {} {}", collection, id))?;
    write_json(out, &resource)
}
