use anyhow::{Context, Result};
use log::info;
use std::path::Path;

use crate::client::Client;
use crate::options::CallOptions;

/// Download a document's content to `output`
#[tracing::instrument(skip(client))]
pub async fn download(client: &Client, document_id: u64, output: &Path) -> Result<u64> {
    let bytes = client
        .download_document(document_id, &CallOptions::new())
        .await
        .with_context(|| format!("Failed to download document {}", document_id))?;

    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", output))?;
    info!("Wrote {} bytes to {:?}", bytes.len(), output);
    Ok(bytes.len() as u64)
}
