use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{error, info, warn};

use crate::{
    coordinator,
    extract::{self, Extraction, FileType},
    models::{Document, Job, DOCUMENT_STATUS_ACTIVE},
    schema::documents,
    state::AppState,
    storage::key_from_locator,
};

use super::{JobExecution, JobHandler};

pub const JOB_INGEST_PDF: &str = "ingest-pdf";
pub const JOB_INGEST_DOC: &str = "ingest-doc";
pub const JOB_INGEST_DOCX: &str = "ingest-docx";
pub const JOB_INGEST_JSON: &str = "ingest-json";
pub const JOB_INGEST_TXT: &str = "ingest-txt";

/// One handler instance per supported format; the worker dispatches on the
/// job type string, so each format registers under its own name.
pub struct IngestDocumentJob {
    file_type: FileType,
    job_type: &'static str,
}

impl IngestDocumentJob {
    pub fn new(file_type: FileType) -> Self {
        let job_type = match file_type {
            FileType::Pdf => JOB_INGEST_PDF,
            FileType::Doc => JOB_INGEST_DOC,
            FileType::Docx => JOB_INGEST_DOCX,
            FileType::Json => JOB_INGEST_JSON,
            FileType::Txt => JOB_INGEST_TXT,
        };
        Self {
            file_type,
            job_type,
        }
    }
}

pub fn all_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(IngestDocumentJob::new(FileType::Pdf)),
        Arc::new(IngestDocumentJob::new(FileType::Doc)),
        Arc::new(IngestDocumentJob::new(FileType::Docx)),
        Arc::new(IngestDocumentJob::new(FileType::Json)),
        Arc::new(IngestDocumentJob::new(FileType::Txt)),
    ]
}

#[async_trait]
impl JobHandler for IngestDocumentJob {
    fn job_type(&self) -> &'static str {
        self.job_type
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let state_clone = state.clone();
        let document_id = job.document_id;
        let document = match task::spawn_blocking(move || load_document(state_clone, document_id))
            .await
        {
            Ok(Ok(document)) => document,
            Ok(Err(err)) => {
                return JobExecution::Failed { error: err };
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "document lookup task panicked");
                return JobExecution::Failed {
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        let Some(storage_key) = document.storage_key.clone() else {
            return JobExecution::Failed {
                error: "document has no stored object".into(),
            };
        };

        let bytes = match state.storage.get_object(key_from_locator(&storage_key)).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to download document object");
                return JobExecution::Failed {
                    error: format!("object download failed: {err}"),
                };
            }
        };

        // Extraction is CPU-bound (page rendering, archive parsing); keep
        // it off the async runtime. The download is spooled to a scoped
        // temporary file that is removed on every exit path, including
        // extraction errors.
        let file_type = self.file_type;
        let extraction = match task::spawn_blocking(move || {
            let mut spool = NamedTempFile::new()?;
            spool.write_all(&bytes)?;
            spool.flush()?;
            drop(bytes);
            extract::extract_units(file_type, spool.path())
        })
        .await
        {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(err)) => {
                return JobExecution::Failed {
                    error: format!("extraction failed: {err}"),
                };
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "extraction task panicked");
                return JobExecution::Failed {
                    error: format!("worker panicked: {join_err}"),
                };
            }
        };

        let Extraction { units, page_count } = extraction;
        let unit_count = units.len();

        if let Err(err) = update_page_count(&state, document.id, page_count).await {
            warn!(job_id = %job.id, error = %err, "failed to record page count");
        }

        if let Err(err) = coordinator::persist_units(&state, &job, &document, units).await {
            return JobExecution::Failed {
                error: format!("vector persistence failed: {err}"),
            };
        }

        info!(
            job_id = %job.id,
            document_id = %document.id,
            unit_count,
            page_count,
            "document ingested"
        );

        JobExecution::Success {
            output: json!({
                "unit_count": unit_count,
                "page_count": page_count,
            }),
        }
    }
}

fn load_document(state: Arc<AppState>, document_id: uuid::Uuid) -> Result<Document, String> {
    let mut conn = state.db().map_err(|err| err.to_string())?;

    let document: Document = documents::table
        .find(document_id)
        .first(&mut conn)
        .map_err(|err| format!("document lookup failed: {err}"))?;

    if document.status != DOCUMENT_STATUS_ACTIVE {
        return Err("document is deleted".into());
    }

    Ok(document)
}

async fn update_page_count(
    state: &Arc<AppState>,
    document_id: uuid::Uuid,
    page_count: u32,
) -> Result<(), String> {
    let state = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state.db().map_err(|err| err.to_string())?;
        diesel::update(documents::table.find(document_id))
            .set((
                documents::page_count.eq(page_count as i32),
                documents::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .map_err(|err| err.to_string())?;
        Ok(())
    })
    .await
    .map_err(|err| err.to_string())?
}
