use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::extract::FileType;
use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

const INGEST_JOB_PREFIX: &str = "ingest-";

pub fn job_type_for(file_type: FileType) -> String {
    format!("{INGEST_JOB_PREFIX}{}", file_type.as_str())
}

pub fn is_terminal_status(status: &str) -> bool {
    matches!(status, STATUS_SUCCESS | STATUS_FAILED | STATUS_CANCELLED)
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool exhausted: {0}")]
    Pool(String),
    #[error("worker task failed: {0}")]
    Task(String),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Insert a new pending job for a document, cancelling any still-pending
/// job in the same transaction so at most one job per document is ever
/// pending or in progress. Callers superseding a completed job must purge
/// its vectors before the new job becomes authoritative.
pub fn create_job(
    conn: &mut PgConnection,
    document_id: Uuid,
    job_type: &str,
    metadata: Value,
) -> JobQueueResult<Job> {
    conn.transaction(|conn| {
        cancel_pending_jobs(conn, document_id)?;

        let new_job = NewJob {
            id: Uuid::new_v4(),
            document_id,
            job_type: job_type.to_string(),
            status: STATUS_PENDING.to_string(),
            metadata,
        };

        diesel::insert_into(jobs::table)
            .values(&new_job)
            .execute(conn)?;

        let job = jobs::table.find(new_job.id).first(conn)?;
        Ok::<Job, JobQueueError>(job)
    })
}

/// Select up to `limit` pending ingest jobs created within the recency
/// window, oldest first. Pending jobs older than the window stay out of
/// automatic pickup and need an administrative re-enqueue.
pub fn enqueue_batch(
    conn: &mut PgConnection,
    limit: i64,
    recency_window: ChronoDuration,
) -> JobQueueResult<Vec<Job>> {
    let cutoff = (Utc::now() - recency_window).naive_utc();

    let batch = jobs::table
        .filter(jobs::status.eq(STATUS_PENDING))
        .filter(jobs::created_at.ge(cutoff))
        .filter(jobs::job_type.like(format!("{INGEST_JOB_PREFIX}%")))
        .order(jobs::created_at.asc())
        .limit(limit.max(0))
        .load(conn)?;

    Ok(batch)
}

/// Claim a pending job by committing the `in_progress` transition before
/// any pipeline I/O. Returns false when another runner already claimed it
/// or the job reached a terminal state.
pub fn mark_started(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<bool> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq(STATUS_PENDING)),
    )
    .set((
        jobs::status.eq(STATUS_IN_PROGRESS),
        jobs::started_at.eq(Some(now)),
        jobs::updated_at.eq(now),
    ))
    .execute(conn)?;

    Ok(updated == 1)
}

/// Record success for a claimed job. Guarded on `in_progress` so a job
/// that reached a terminal state in the meantime (a concurrent cancel,
/// another runner) is never transitioned out of it; returns whether the
/// transition was recorded.
pub fn mark_succeeded(
    conn: &mut PgConnection,
    job_id: Uuid,
    output: Value,
) -> JobQueueResult<bool> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq(STATUS_IN_PROGRESS)),
    )
    .set((
        jobs::status.eq(STATUS_SUCCESS),
        jobs::output.eq(Some(output)),
        jobs::error_message.eq::<Option<String>>(None),
        jobs::completed_at.eq(Some(now)),
        jobs::updated_at.eq(now),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

/// Record failure for a claimed job, or fail a still-pending job that can
/// never run (no registered handler). Terminal states are left alone.
pub fn mark_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<bool> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        jobs::table
            .find(job_id)
            .filter(jobs::status.eq_any([STATUS_PENDING, STATUS_IN_PROGRESS])),
    )
    .set((
        jobs::status.eq(STATUS_FAILED),
        jobs::error_message.eq(Some(error_message.to_string())),
        jobs::completed_at.eq(Some(now)),
        jobs::updated_at.eq(now),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

/// Cancel pending jobs for a document. Jobs already in progress are left
/// to reach a terminal state on their own; cancellation is cooperative
/// only at the pending boundary.
pub fn cancel_pending_jobs(conn: &mut PgConnection, document_id: Uuid) -> JobQueueResult<usize> {
    let now = Utc::now().naive_utc();
    let cancelled = diesel::update(
        jobs::table
            .filter(jobs::document_id.eq(document_id))
            .filter(jobs::status.eq(STATUS_PENDING)),
    )
    .set((
        jobs::status.eq(STATUS_CANCELLED),
        jobs::cancelled_at.eq(Some(now)),
        jobs::updated_at.eq(now),
    ))
    .execute(conn)?;

    Ok(cancelled)
}

pub fn get_job(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<Option<Job>> {
    let job = jobs::table.find(job_id).first(conn).optional()?;
    Ok(job)
}

/// Most recent non-cancelled job for a document; the authoritative record
/// for what retrieval can see.
pub fn latest_job_for_document(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> JobQueueResult<Option<Job>> {
    let job = jobs::table
        .filter(jobs::document_id.eq(document_id))
        .filter(jobs::status.ne(STATUS_CANCELLED))
        .order(jobs::created_at.desc())
        .first(conn)
        .optional()?;
    Ok(job)
}
