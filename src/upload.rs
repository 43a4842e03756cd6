//! Document uploads: single PUT or the multipart protocol.
//!
//! Uploading is three steps against two hosts:
//! 1. POST the document to the API, which answers with pre-signed target(s)
//! 2. PUT the bytes to those targets with only the headers the API supplied
//! 3. PATCH the document version as `fully_uploaded`
//!
//! Files above [`UploadConfig::part_size`] are split into parts, one target
//! each. Any failed PUT abandons the upload before step 3.

use std::collections::HashSet;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use reqwest::Method;
use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::{ClientConfig, UploadConfig};
use crate::error::{ApiError, Result};
use crate::executor::RequestExecutor;
use crate::http::{HttpRequest, Transport};
use crate::options::CallOptions;

const SINGLE_CREATE_FIELDS: &str = "id,latest_document_version{uuid,put_url,put_headers}";
const MULTIPART_CREATE_FIELDS: &str = "id,latest_document_version{uuid,put_headers,multiparts}";
const FINALIZE_FIELDS: &str = "id,name,latest_document_version{fully_uploaded}";

/// Where a document goes: a matter, contact, or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub id: u64,
    pub kind: String,
}

impl ParentRef {
    pub fn new(id: u64, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
        }
    }

    pub fn folder(id: u64) -> Self {
        Self::new(id, "Folder")
    }

    pub fn matter(id: u64) -> Self {
        Self::new(id, "Matter")
    }

    pub fn contact(id: u64) -> Self {
        Self::new(id, "Contact")
    }

    pub fn to_json(&self) -> Value {
        json!({"id": self.id, "type": self.kind})
    }
}

/// File content to upload.
pub enum UploadSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    /// A reader that yields exactly `size` bytes
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
    },
}

impl UploadSource {
    async fn open(self) -> Result<(Box<dyn AsyncRead + Send + Unpin>, u64)> {
        match self {
            UploadSource::Path(path) => {
                let size = tokio::fs::metadata(&path).await?.len();
                let file = tokio::fs::File::open(&path).await?;
                Ok((Box::new(file), size))
            }
            UploadSource::Bytes(bytes) => {
                let size = bytes.len() as u64;
                Ok((Box::new(std::io::Cursor::new(bytes)), size))
            }
            UploadSource::Reader { reader, size } => Ok((reader, size)),
        }
    }
}

pub struct UploadRequest {
    pub name: String,
    pub parent: ParentRef,
    pub source: UploadSource,
    pub document_category_id: Option<u64>,
    /// Extra fields and params for the finalize PATCH
    pub options: CallOptions,
}

impl UploadRequest {
    pub fn new(name: impl Into<String>, parent: ParentRef, source: UploadSource) -> Self {
        Self {
            name: name.into(),
            parent,
            source,
            document_category_id: None,
            options: CallOptions::default(),
        }
    }

    pub fn with_category(mut self, category_id: u64) -> Self {
        self.document_category_id = Some(category_id);
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

/// Progress events, reported once per part read and once per part uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadProgress {
    PartRead { part_number: u32, total: u32 },
    PartUploaded { part_number: u32, total: u32 },
}

pub type ProgressFn<'a> = dyn Fn(UploadProgress) + Send + Sync + 'a;

/// One chunk of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub part_number: u32,
    pub range: Range<u64>,
    pub bytes: Vec<u8>,
}

impl UploadPart {
    pub fn content_length(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn manifest_entry(&self, checksum: bool) -> Value {
        let mut entry = json!({
            "part_number": self.part_number,
            "content_length": self.content_length(),
        });
        if checksum {
            let digest = md5::compute(&self.bytes);
            entry["content_md5"] = Value::String(STANDARD.encode(digest.0));
        }
        entry
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartTarget {
    pub part_number: u32,
    pub put_url: String,
    #[serde(default)]
    pub put_headers: Vec<PutHeader>,
}

#[derive(Debug, Deserialize)]
struct DocumentVersion {
    uuid: String,
    #[serde(default)]
    put_url: Option<String>,
    #[serde(default)]
    put_headers: Vec<PutHeader>,
    #[serde(default)]
    multiparts: Vec<PartTarget>,
}

#[derive(Debug, Deserialize)]
struct CreatedDocumentData {
    id: u64,
    latest_document_version: DocumentVersion,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    data: CreatedDocumentData,
}

impl CreatedDocument {
    fn parse(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("unexpected document creation response: {}", e)))
    }
}

/// Upload targets negotiated for one multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUploadSession {
    pub document_id: u64,
    pub version_uuid: String,
    pub targets: Vec<PartTarget>,
}

/// Byte ranges of the parts a file of `size` bytes splits into.
pub fn plan_parts(size: u64, part_size: u64) -> Vec<Range<u64>> {
    let part_size = part_size.max(1);
    (0..size)
        .step_by(part_size as usize)
        .map(|start| start..(start + part_size).min(size))
        .collect()
}

pub struct DocumentUploader {
    executor: Arc<RequestExecutor>,
    storage: Arc<dyn Transport>,
    client_config: ClientConfig,
}

impl DocumentUploader {
    /// `storage` must not carry API credentials: pre-signed targets are
    /// authorised by their own headers.
    pub fn new(executor: Arc<RequestExecutor>, storage: Arc<dyn Transport>, client_config: ClientConfig) -> Self {
        Self {
            executor,
            storage,
            client_config,
        }
    }

    fn config(&self) -> &UploadConfig {
        &self.client_config.upload
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<Value> {
        self.upload_with_progress(request, &|_| {}).await
    }

    /// Uploads and finalizes a document, returning the finalized resource.
    #[tracing::instrument(skip(self, request, progress), fields(name = %request.name))]
    pub async fn upload_with_progress(&self, request: UploadRequest, progress: &ProgressFn<'_>) -> Result<Value> {
        let UploadRequest {
            name,
            parent,
            source,
            document_category_id,
            options,
        } = request;
        let (reader, size) = source.open().await?;
        let document = DocumentMeta {
            name,
            parent,
            document_category_id,
        };

        if size <= self.config().part_size {
            info!("Uploading {} ({} bytes) in a single request", document.name, size);
            self.upload_single(&document, reader, size, &options, progress).await
        } else {
            info!(
                "Uploading {} ({} bytes) in parts of {} bytes",
                document.name,
                size,
                self.config().part_size
            );
            self.upload_multipart(&document, reader, size, &options, progress)
                .await
        }
    }

    async fn upload_single(
        &self,
        document: &DocumentMeta,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
        options: &CallOptions,
        progress: &ProgressFn<'_>,
    ) -> Result<Value> {
        let mut bytes = Vec::with_capacity(size as usize);
        (&mut reader).take(size).read_to_end(&mut bytes).await?;
        if bytes.len() as u64 != size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, read {}", size, bytes.len()),
            )
            .into());
        }

        let created = self
            .create_document(document, None, SINGLE_CREATE_FIELDS)
            .await?;
        let version = created.data.latest_document_version;
        let put_url = version.put_url.ok_or_else(|| {
            ApiError::InvalidResponse("document version has no put_url".to_string())
        })?;

        let target = PartTarget {
            part_number: 1,
            put_url,
            put_headers: version.put_headers,
        };
        self.put_part(&target, bytes, true).await?;
        progress(UploadProgress::PartUploaded {
            part_number: 1,
            total: 1,
        });

        self.finalize(created.data.id, &version.uuid, options).await
    }

    async fn upload_multipart(
        &self,
        document: &DocumentMeta,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
        options: &CallOptions,
        progress: &ProgressFn<'_>,
    ) -> Result<Value> {
        let parts = self.read_parts(reader, size, progress).await?;
        let manifest: Vec<Value> = parts
            .iter()
            .map(|part| part.manifest_entry(self.config().part_checksums))
            .collect();

        let created = self
            .create_document(document, Some(manifest), MULTIPART_CREATE_FIELDS)
            .await?;
        let session = MultipartUploadSession {
            document_id: created.data.id,
            version_uuid: created.data.latest_document_version.uuid,
            targets: created.data.latest_document_version.multiparts,
        };
        debug!(
            "Document {} version {} has {} part targets",
            session.document_id,
            session.version_uuid,
            session.targets.len()
        );

        let jobs = pair_targets(session.targets, parts)?;
        self.put_parts(jobs, progress).await?;

        self.finalize(session.document_id, &session.version_uuid, options)
            .await
    }

    /// Reads the whole source into parts, reporting each as it is read.
    async fn read_parts(
        &self,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<UploadPart>> {
        let ranges = plan_parts(size, self.config().part_size);
        let total = ranges.len() as u32;
        let mut parts = Vec::with_capacity(ranges.len());

        for (index, range) in ranges.into_iter().enumerate() {
            let part_number = index as u32 + 1;
            let mut bytes = vec![0u8; (range.end - range.start) as usize];
            reader.read_exact(&mut bytes).await?;
            progress(UploadProgress::PartRead { part_number, total });
            parts.push(UploadPart {
                part_number,
                range,
                bytes,
            });
        }
        Ok(parts)
    }

    async fn put_parts(&self, jobs: Vec<(PartTarget, UploadPart)>, progress: &ProgressFn<'_>) -> Result<()> {
        let total = jobs.len() as u32;
        let concurrency = self.config().max_concurrent_parts.max(1);

        if concurrency == 1 {
            for (target, part) in jobs {
                self.put_part(&target, part.bytes, false).await?;
                progress(UploadProgress::PartUploaded {
                    part_number: target.part_number,
                    total,
                });
            }
            return Ok(());
        }

        // Dropping the stream on the first error cancels the PUTs still in flight.
        stream::iter(jobs)
            .map(|(target, part)| async move {
                self.put_part(&target, part.bytes, false).await?;
                progress(UploadProgress::PartUploaded {
                    part_number: target.part_number,
                    total,
                });
                Ok::<_, ApiError>(())
            })
            .buffer_unordered(concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn put_part(&self, target: &PartTarget, bytes: Vec<u8>, content_length: bool) -> Result<()> {
        let part_number = target.part_number;
        let length = bytes.len();
        let mut request = HttpRequest::new(Method::PUT, target.put_url.as_str())
            .with_timeout(self.config().put_timeout);
        if content_length {
            request.insert_header(CONTENT_LENGTH.as_str(), &length.to_string())?;
        }
        for header in &target.put_headers {
            request.append_header(&header.name, &header.value)?;
        }
        let request = request.with_bytes(bytes);

        debug!("PUT part {} ({} bytes)", part_number, length);
        let response = self
            .storage
            .execute(request)
            .await
            .map_err(|e| ApiError::PartUpload {
                part_number,
                reason: e.to_string(),
            })?;

        if !response.status.is_success() {
            return Err(ApiError::PartUpload {
                part_number,
                reason: format!("HTTP {}: {}", response.status, response.body_text()),
            });
        }
        Ok(())
    }

    async fn create_document(
        &self,
        document: &DocumentMeta,
        multiparts: Option<Vec<Value>>,
        fields: &str,
    ) -> Result<CreatedDocument> {
        let mut data = json!({
            "name": document.name,
            "parent": document.parent.to_json(),
        });
        if let Some(category_id) = document.document_category_id {
            data["document_category"] = json!({"id": category_id});
        }
        if let Some(multiparts) = multiparts {
            data["multiparts"] = Value::Array(multiparts);
        }

        let url = self.client_config.make_url("documents");
        let body = self
            .executor
            .post(&url, json!({"data": data}), &CallOptions::fields(fields))
            .await?
            .into_json()?;
        CreatedDocument::parse(body)
    }

    async fn finalize(&self, document_id: u64, version_uuid: &str, options: &CallOptions) -> Result<Value> {
        let url = self.client_config.make_url(&format!("documents/{}", document_id));
        let options = options.with_base_fields(FINALIZE_FIELDS);
        info!("Marking document {} version {} as fully uploaded", document_id, version_uuid);
        self.executor
            .patch(
                &url,
                json!({"data": {"uuid": version_uuid, "fully_uploaded": true}}),
                &options,
            )
            .await?
            .into_json()
    }
}

struct DocumentMeta {
    name: String,
    parent: ParentRef,
    document_category_id: Option<u64>,
}

/// Matches every part with its target, in part-number order.
fn pair_targets(mut targets: Vec<PartTarget>, parts: Vec<UploadPart>) -> Result<Vec<(PartTarget, UploadPart)>> {
    if targets.len() != parts.len() {
        return Err(ApiError::InvalidResponse(format!(
            "expected {} part targets, got {}",
            parts.len(),
            targets.len()
        )));
    }

    let mut seen = HashSet::new();
    for target in &targets {
        if target.part_number == 0 || target.part_number as usize > parts.len() || !seen.insert(target.part_number) {
            return Err(ApiError::InvalidResponse(format!(
                "unexpected part target number {}",
                target.part_number
            )));
        }
    }

    targets.sort_by_key(|t| t.part_number);
    Ok(targets.into_iter().zip(parts).collect())
}
