//! Resume storage. A PDF is base64-encoded and split across chunk documents in
//! the application's `resume-data` sub-collection, next to a `metadata`
//! document describing the expected chunk count and encoded length.

use std::collections::HashSet;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::db::models::{MemberApplication, ResumeChunk, ResumeChunkMetadata, ResumeStorageType};
use crate::db::{to_data, DocumentStore, Query, StoreError, WriteBatch, MEMBER_APPLICATIONS};
use crate::error::{AppError, AppResult};

/// Base64 characters per chunk document.
pub const CHUNK_SIZE: usize = 750_000;
pub const MAX_RESUME_BYTES: usize = 2 * 1024 * 1024;
pub const RESUME_MIME: &str = "application/pdf";

const METADATA_DOC: &str = "metadata";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResume {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub file_type: String,
}

pub fn resume_collection(application_id: &str) -> String {
    format!("{}/{}/resume-data", MEMBER_APPLICATIONS, application_id)
}

fn chunk_id(index: usize) -> String {
    format!("chunk_{}", index)
}

/// Checks an uploaded file before anything is written.
pub fn validate_upload(content_type: &str, size: usize) -> AppResult<()> {
    if !content_type.to_ascii_lowercase().contains("pdf") {
        return Err(AppError::validation("Please upload a PDF file"));
    }
    if size > MAX_RESUME_BYTES {
        return Err(AppError::validation("Resume file size must be less than 2MB"));
    }
    Ok(())
}

/// Splits base64 text into `CHUNK_SIZE` pieces; the last piece holds the remainder.
pub fn split_chunks(encoded: &str) -> Vec<&str> {
    // base64 output is ASCII, so byte offsets are char boundaries.
    encoded
        .as_bytes()
        .chunks(CHUNK_SIZE)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect()
}

/// Writes the resume for an existing application. Chunks, metadata and the
/// application's resume fields are committed as one batch, so a failed write
/// leaves nothing behind. Transient store failures are retried per `policy`.
pub async fn store_resume(
    db: &dyn DocumentStore,
    application_id: &str,
    bytes: &[u8],
    file_name: &str,
    file_type: &str,
    policy: RetryPolicy,
) -> AppResult<ResumeChunkMetadata> {
    validate_upload(file_type, bytes.len())?;
    if db.get(MEMBER_APPLICATIONS, application_id).await?.is_none() {
        return Err(AppError::not_found("Application not found"));
    }

    let encoded = STANDARD.encode(bytes);
    let now = Utc::now();
    let (batch, metadata) = build_batch(db, application_id, &encoded, file_name, file_type, now).await?;

    commit_with_retry(db, batch, application_id, policy).await?;

    tracing::info!(
        application_id = %application_id,
        total_chunks = metadata.total_chunks,
        total_size = metadata.total_size,
        "Resume stored"
    );
    Ok(metadata)
}

async fn build_batch(
    db: &dyn DocumentStore,
    application_id: &str,
    encoded: &str,
    file_name: &str,
    file_type: &str,
    now: DateTime<Utc>,
) -> AppResult<(WriteBatch, ResumeChunkMetadata)> {
    let collection = resume_collection(application_id);
    let pieces = split_chunks(encoded);

    let metadata = ResumeChunkMetadata {
        total_chunks: pieces.len(),
        total_size: encoded.len(),
        created_at: now,
        file_name: file_name.to_string(),
        file_type: file_type.to_string(),
    };

    let mut batch = WriteBatch::new();
    let mut chunk_ids = Vec::with_capacity(pieces.len());
    for (index, data) in pieces.into_iter().enumerate() {
        let id = chunk_id(index);
        let chunk = ResumeChunk {
            data: data.to_string(),
            index,
            created_at: now,
            application_id: application_id.to_string(),
            is_chunk: true,
        };
        batch.set(&collection, &id, to_data(&chunk)?);
        chunk_ids.push(id);
    }
    batch.set(&collection, METADATA_DOC, to_data(&metadata)?);

    // A previous, longer upload may have left chunks past the new count.
    let keep: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
    for stale in db.query(&collection, &Query::new()).await? {
        if stale.id != METADATA_DOC && !keep.contains(stale.id.as_str()) {
            batch.delete(&collection, &stale.id);
        }
    }

    let mut patch = Map::new();
    patch.insert("resumeStorageType".into(), to_data(&ResumeStorageType::Chunked)?);
    patch.insert("resumeChunks".into(), to_data(&chunk_ids)?);
    patch.insert("resumeMetadata".into(), to_data(&metadata)?);
    patch.insert("updatedAt".into(), to_data(&now)?);
    batch.update(MEMBER_APPLICATIONS, application_id, patch);

    Ok((batch, metadata))
}

async fn commit_with_retry(
    db: &dyn DocumentStore,
    batch: WriteBatch,
    application_id: &str,
    policy: RetryPolicy,
) -> AppResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match db.commit(batch.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    application_id = %application_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Resume write failed, retrying in {:?}: {}",
                    policy.delay,
                    e
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(StoreError::DocumentTooLarge { .. }) => {
                return Err(AppError::validation("Resume file size must be less than 2MB"));
            }
            Err(e) => {
                tracing::error!(application_id = %application_id, attempt, "Resume write failed: {}", e);
                return Err(AppError::Storage(format!("Failed to store resume: {}", e)));
            }
        }
    }
}

/// Reads and verifies a stored resume.
pub async fn load_resume(db: &dyn DocumentStore, application_id: &str) -> AppResult<DecodedResume> {
    let application: MemberApplication = db
        .get(MEMBER_APPLICATIONS, application_id)
        .await?
        .ok_or_else(|| AppError::not_found("Application not found"))?
        .decode()?;
    if application.resume_storage_type != Some(ResumeStorageType::Chunked) {
        return Err(AppError::not_found("No resume on file for this application"));
    }

    let collection = resume_collection(application_id);
    let metadata: ResumeChunkMetadata = db
        .get(&collection, METADATA_DOC)
        .await?
        .ok_or_else(|| AppError::not_found("Resume metadata not found"))?
        .decode()?;

    let mut chunks = Vec::new();
    for doc in db.query(&collection, &Query::new()).await? {
        if doc.id == METADATA_DOC {
            continue;
        }
        let chunk: ResumeChunk = doc
            .decode()
            .map_err(|_| AppError::Integrity("Resume data is corrupted".into()))?;
        chunks.push(chunk);
    }

    let bytes = reassemble(&metadata, chunks)?;
    Ok(DecodedResume {
        bytes,
        file_name: metadata.file_name,
        file_type: metadata.file_type,
    })
}

/// Orders chunks by their stored index and checks them against the metadata
/// before decoding.
pub fn reassemble(metadata: &ResumeChunkMetadata, mut chunks: Vec<ResumeChunk>) -> AppResult<Vec<u8>> {
    if chunks.len() != metadata.total_chunks {
        tracing::error!(
            expected = metadata.total_chunks,
            found = chunks.len(),
            "Resume chunk count mismatch"
        );
        return Err(AppError::Integrity("Resume data is incomplete".into()));
    }

    chunks.sort_by_key(|c| c.index);
    let encoded: String = chunks.iter().map(|c| c.data.as_str()).collect();
    if encoded.len() != metadata.total_size {
        tracing::error!(
            expected = metadata.total_size,
            found = encoded.len(),
            "Resume size mismatch"
        );
        return Err(AppError::Integrity("Resume data is corrupted".into()));
    }

    STANDARD
        .decode(encoded.as_bytes())
        .map_err(|_| AppError::Integrity("Resume data is corrupted".into()))
}

/// Removes every chunk and the metadata document; returns how many were removed.
pub async fn delete_resume(db: &dyn DocumentStore, application_id: &str) -> AppResult<usize> {
    let collection = resume_collection(application_id);
    let docs = db.query(&collection, &Query::new()).await?;
    if docs.is_empty() {
        return Ok(0);
    }
    let mut batch = WriteBatch::new();
    for doc in &docs {
        batch.delete(&collection, &doc.id);
    }
    db.commit(batch).await?;
    Ok(docs.len())
}
