//! Document lifecycle service: upload, re-upload, and delete, each paired
//! with the job bookkeeping that keeps retrieval consistent with what the
//! user can see. Validation happens before any row or blob is written so
//! a rejected upload leaves no trace.

use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use serde_json::json;
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator;
use crate::error::{AppError, AppResult};
use crate::extract::detect_file_type;
use crate::jobs::{self, job_type_for};
use crate::models::{Document, Job, NewDocument, DOCUMENT_STATUS_ACTIVE, DOCUMENT_STATUS_DELETED};
use crate::schema::documents;
use crate::state::AppState;
use crate::storage::{key_from_locator, storage_key_for};

const DOWNLOAD_URL_TTL: std::time::Duration = std::time::Duration::from_secs(900);

#[derive(Debug)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: Option<String>,
    pub owner_id: Uuid,
}

#[derive(Debug)]
pub struct DocumentWithJob {
    pub document: Document,
    pub job: Job,
}

pub async fn create_document(
    state: &Arc<AppState>,
    request: UploadRequest,
) -> AppResult<DocumentWithJob> {
    if request.bytes.is_empty() {
        return Err(AppError::validation("file must not be empty"));
    }

    let file_type = detect_file_type(request.content_type.as_deref(), &request.filename)
        .ok_or_else(|| AppError::UnsupportedFormat(request.filename.clone()))?;

    let document_id = Uuid::new_v4();
    let storage_key = storage_key_for(document_id, &request.filename);
    let filesize = request.bytes.len() as i64;

    state
        .storage
        .put_object(&storage_key, request.bytes, request.content_type.clone())
        .await?;

    let state_clone = state.clone();
    let filename = request.filename.clone();
    let owner_id = request.owner_id;
    let result = task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        conn.transaction(|conn| {
            let row = NewDocument {
                id: document_id,
                file_type: file_type.as_str().to_string(),
                filename: filename.clone(),
                filesize,
                page_count: 0,
                owner_id,
                storage_key: Some(storage_key.clone()),
                status: DOCUMENT_STATUS_ACTIVE.to_string(),
            };
            let document: Document = diesel::insert_into(documents::table)
                .values(&row)
                .get_result(conn)?;

            let job = jobs::create_job(
                conn,
                document.id,
                &job_type_for(file_type),
                json!({ "filename": filename }),
            )
            .map_err(job_error)?;

            Ok::<DocumentWithJob, AppError>(DocumentWithJob { document, job })
        })
    })
    .await
    .map_err(|err| AppError::internal(format!("upload task panicked: {err}")))??;

    info!(
        document_id = %result.document.id,
        job_id = %result.job.id,
        file_type = %result.document.file_type,
        "document created"
    );
    Ok(result)
}

/// Replace a document's content. The prior blob stays under its old key
/// (downloads in flight keep working), pending jobs are cancelled, and
/// vectors from earlier jobs are purged so retrieval never mixes old and
/// new content.
pub async fn reupload_document(
    state: &Arc<AppState>,
    document_id: Uuid,
    request: UploadRequest,
) -> AppResult<DocumentWithJob> {
    if request.bytes.is_empty() {
        return Err(AppError::validation("file must not be empty"));
    }

    let file_type = detect_file_type(request.content_type.as_deref(), &request.filename)
        .ok_or_else(|| AppError::UnsupportedFormat(request.filename.clone()))?;

    let existing = get_document(state, document_id).await?;
    if existing.status != DOCUMENT_STATUS_ACTIVE {
        return Err(AppError::not_found("document"));
    }

    // Cancel first, in its own committed transaction. A worker polling
    // between the purge below and the new-job transaction must not be
    // able to claim the superseded job and re-ingest the old blob.
    let state_clone = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        jobs::cancel_pending_jobs(&mut conn, document_id).map_err(job_error)?;
        Ok::<(), AppError>(())
    })
    .await
    .map_err(|err| AppError::internal(format!("reupload task panicked: {err}")))??;

    coordinator::purge_document(state, document_id).await?;

    let storage_key = storage_key_for(document_id, &request.filename);
    let filesize = request.bytes.len() as i64;
    state
        .storage
        .put_object(&storage_key, request.bytes, request.content_type.clone())
        .await?;

    let state_clone = state.clone();
    let filename = request.filename.clone();
    let result = task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        conn.transaction(|conn| {
            let now = Utc::now().naive_utc();
            let document: Document = diesel::update(documents::table.find(document_id))
                .set((
                    documents::file_type.eq(file_type.as_str()),
                    documents::filename.eq(&filename),
                    documents::filesize.eq(filesize),
                    documents::page_count.eq(0),
                    documents::storage_key.eq(&storage_key),
                    documents::updated_at.eq(now),
                ))
                .get_result(conn)?;

            let job = jobs::create_job(
                conn,
                document.id,
                &job_type_for(file_type),
                json!({ "filename": filename, "reupload": true }),
            )
            .map_err(job_error)?;

            Ok::<DocumentWithJob, AppError>(DocumentWithJob { document, job })
        })
    })
    .await
    .map_err(|err| AppError::internal(format!("reupload task panicked: {err}")))??;

    info!(
        document_id = %result.document.id,
        job_id = %result.job.id,
        "document content replaced"
    );
    Ok(result)
}

/// Soft-delete a document: the blob goes away, pending jobs are
/// cancelled, and every vector it ever produced is purged from both
/// stores. The row itself stays for audit.
pub async fn delete_document(state: &Arc<AppState>, document_id: Uuid) -> AppResult<()> {
    let document = get_document(state, document_id).await?;
    if document.status != DOCUMENT_STATUS_ACTIVE {
        return Err(AppError::not_found("document"));
    }

    if let Some(storage_key) = &document.storage_key {
        if let Err(err) = state.storage.delete_object(storage_key).await {
            warn!(document_id = %document_id, error = %err, "blob delete failed; continuing");
        }
    }

    let state_clone = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        conn.transaction(|conn| {
            let now = Utc::now().naive_utc();
            diesel::update(documents::table.find(document_id))
                .set((
                    documents::status.eq(DOCUMENT_STATUS_DELETED),
                    documents::deleted_at.eq(Some(now)),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?;
            jobs::cancel_pending_jobs(conn, document_id).map_err(job_error)?;
            Ok::<(), AppError>(())
        })
    })
    .await
    .map_err(|err| AppError::internal(format!("delete task panicked: {err}")))??;

    coordinator::purge_document(state, document_id).await?;

    info!(document_id = %document_id, "document deleted");
    Ok(())
}

/// Short-lived presigned URL for the document's current blob.
pub async fn download_url(state: &Arc<AppState>, document_id: Uuid) -> AppResult<String> {
    let document = get_document(state, document_id).await?;
    if document.status != DOCUMENT_STATUS_ACTIVE {
        return Err(AppError::not_found("document"));
    }
    let storage_key = document
        .storage_key
        .as_deref()
        .ok_or_else(|| AppError::not_found("document content"))?;

    let url = state
        .storage
        .presign_get_object(key_from_locator(storage_key), DOWNLOAD_URL_TTL)
        .await?;
    Ok(url)
}

pub async fn get_document(state: &Arc<AppState>, document_id: Uuid) -> AppResult<Document> {
    let state = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state.db()?;
        let document: Document = documents::table.find(document_id).first(&mut conn)?;
        Ok::<Document, AppError>(document)
    })
    .await
    .map_err(|err| AppError::internal(format!("lookup task panicked: {err}")))?
}

/// The authoritative job for a document's current indexed content.
pub async fn latest_job(state: &Arc<AppState>, document_id: Uuid) -> AppResult<Option<Job>> {
    let state = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state.db()?;
        jobs::latest_job_for_document(&mut conn, document_id).map_err(job_error)
    })
    .await
    .map_err(|err| AppError::internal(format!("lookup task panicked: {err}")))?
}

fn job_error(err: jobs::JobQueueError) -> AppError {
    match err {
        jobs::JobQueueError::Database(inner) => AppError::Database(inner),
        other => AppError::internal(other.to_string()),
    }
}
