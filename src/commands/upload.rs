use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::client::Client;
use crate::upload::{ParentRef, UploadProgress, UploadRequest, UploadSource};

#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub path: PathBuf,
    /// Document name; the file name when absent
    pub name: Option<String>,
    pub parent_id: u64,
    pub parent_type: String,
    pub category_id: Option<u64>,
}

impl UploadArgs {
    fn document_name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Cannot derive a document name from {:?}", self.path))
    }
}

/// Upload a file as a document, reporting progress to `progress_out`
#[tracing::instrument(skip(client, progress_out))]
pub async fn upload<W: Write + Send>(client: &Client, args: &UploadArgs, progress_out: &mut W) -> Result<Value> {
    let name = args.document_name()?;
    let mut request = UploadRequest::new(
        name.clone(),
        ParentRef::new(args.parent_id, args.parent_type.clone()),
        UploadSource::Path(args.path.clone()),
    );
    if let Some(category_id) = args.category_id {
        request = request.with_category(category_id);
    }

    let progress_out = Mutex::new(progress_out);
    let report = |event: UploadProgress| {
        let line = match event {
            UploadProgress::PartRead { part_number, total } => {
                format!("read part {}/{}", part_number, total)
            }
            UploadProgress::PartUploaded { part_number, total } => {
                format!("uploaded part {}/{}", part_number, total)
            }
        };
        if let Ok(mut out) = progress_out.lock()
            && let Err(e) = writeln!(out, "{}: {}", name, line)
        {
            debug!("Failed to write upload progress: {}", e);
        }
    };

    client
        .upload_document_with_progress(request, &report)
        .await
        .with_context(|| format!("Failed to upload {:?}", args.path))
}
