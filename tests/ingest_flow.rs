mod common;

use anyhow::Result;
use common::{acquire_db_lock, TestApp};
use httpmock::Method::{POST, PUT};
use paperquery::coordinator;
use paperquery::documents::{self, UploadRequest};
use paperquery::jobs;
use paperquery::workers::ingest::IngestDocumentJob;
use paperquery::workers::{JobExecution, JobHandler};
use paperquery::extract::FileType;
use uuid::Uuid;

fn upload(filename: &str, content_type: &str, bytes: &[u8]) -> UploadRequest {
    UploadRequest {
        bytes: bytes.to_vec(),
        filename: filename.to_string(),
        content_type: Some(content_type.to_string()),
        owner_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn txt_ingest_persists_active_vectors() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let upsert = app
        .index_server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/document_chunks/points");
            then.status(200)
                .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
        })
        .await;

    let created = documents::create_document(
        &app.state,
        upload("notes.txt", "text/plain", b"the quick brown fox"),
    )
    .await?;

    let handler = IngestDocumentJob::new(FileType::Txt);
    let outcome = handler.handle(app.state.clone(), created.job.clone()).await;

    let JobExecution::Success { output } = outcome else {
        panic!("ingest should succeed, got {outcome:?}");
    };
    assert_eq!(output["unit_count"], 1);
    assert_eq!(output["page_count"], 1);
    upsert.assert_async().await;

    let rows = app.vectors_for_job(created.job.id).await?;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_active);
    assert_eq!(rows[0].vector_id.len(), 64);
    assert_eq!(rows[0].text_content, "the quick brown fox");

    let document = app.load_document(created.document.id).await?;
    assert_eq!(document.page_count, 1);

    app.cleanup().await
}

#[tokio::test]
async fn json_ingest_lands_fields_in_their_collection() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let upsert = app
        .index_server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/json_fields/points");
            then.status(200)
                .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
        })
        .await;

    let body = br#"{"invoice": {"total": 41.5, "currency": "EUR"}}"#;
    let created = documents::create_document(
        &app.state,
        upload("invoice.json", "application/json", body),
    )
    .await?;

    let handler = IngestDocumentJob::new(FileType::Json);
    let outcome = handler.handle(app.state.clone(), created.job.clone()).await;

    let JobExecution::Success { output } = outcome else {
        panic!("ingest should succeed, got {outcome:?}");
    };
    assert_eq!(output["unit_count"], 2);
    upsert.assert_async().await;

    let rows = app.vectors_for_job(created.job.id).await?;
    assert_eq!(rows.len(), 2);
    let paths: Vec<String> = rows
        .iter()
        .filter_map(|row| {
            row.metadata
                .get("path")
                .and_then(|value| value.as_str())
                .map(str::to_string)
        })
        .collect();
    assert!(paths.contains(&"invoice.total".to_string()));
    assert!(paths.contains(&"invoice.currency".to_string()));

    app.cleanup().await
}

#[tokio::test]
async fn index_failure_fails_the_job_and_purge_cleans_up() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.index_server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/document_chunks/points");
            then.status(500).body("index unavailable");
        })
        .await;

    let created = documents::create_document(
        &app.state,
        upload("notes.txt", "text/plain", b"content that will not index"),
    )
    .await?;

    let handler = IngestDocumentJob::new(FileType::Txt);
    let outcome = handler.handle(app.state.clone(), created.job.clone()).await;
    assert!(
        matches!(outcome, JobExecution::Failed { .. }),
        "index failure must fail the job"
    );

    // Rows were written before the upload failed; the compensating purge
    // must deactivate them so retrieval never sees a failed job's output.
    common::mock_index_writes(&app.index_server).await;
    let deactivated = coordinator::purge_job(&app.state, created.job.id).await?;
    assert_eq!(deactivated, 1);

    let rows = app.vectors_for_job(created.job.id).await?;
    assert!(rows.iter().all(|row| !row.is_active));

    // A second purge is a no-op, not an error.
    let again = coordinator::purge_job(&app.state, created.job.id).await?;
    assert_eq!(again, 0);

    app.cleanup().await
}

#[tokio::test]
async fn reupload_after_success_purges_prior_vectors() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.index_server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/document_chunks/points");
            then.status(200)
                .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
        })
        .await;
    let chunk_delete = app
        .index_server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/collections/document_chunks/points/delete");
            then.status(200)
                .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
        })
        .await;
    let field_delete = app
        .index_server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/collections/json_fields/points/delete");
            then.status(200)
                .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
        })
        .await;

    let created = documents::create_document(
        &app.state,
        upload("notes.txt", "text/plain", b"first revision"),
    )
    .await?;

    let job_id = created.job.id;
    app.with_conn(move |conn| jobs::mark_started(conn, job_id).map_err(Into::into))
        .await?;
    let handler = IngestDocumentJob::new(FileType::Txt);
    let outcome = handler.handle(app.state.clone(), created.job.clone()).await;
    let JobExecution::Success { output } = outcome else {
        panic!("ingest should succeed, got {outcome:?}");
    };
    app.with_conn(move |conn| jobs::mark_succeeded(conn, job_id, output).map_err(Into::into))
        .await?;

    let rows = app.vectors_for_job(created.job.id).await?;
    assert!(rows.iter().all(|row| row.is_active));

    let second = documents::reupload_document(
        &app.state,
        created.document.id,
        upload("notes.txt", "text/plain", b"second revision"),
    )
    .await?;

    // Every vector from the succeeded job is inactive and the index was
    // told to drop them in both collections before the new job can run.
    let rows = app.vectors_for_job(created.job.id).await?;
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| !row.is_active));
    chunk_delete.assert_async().await;
    field_delete.assert_async().await;

    let first_job = app
        .with_conn(move |conn| jobs::get_job(conn, job_id).map_err(Into::into))
        .await?
        .expect("first job exists");
    assert_eq!(first_job.status, jobs::STATUS_SUCCESS);

    let latest = documents::latest_job(&app.state, created.document.id).await?;
    assert_eq!(latest.map(|job| job.id), Some(second.job.id));

    app.cleanup().await
}

#[tokio::test]
async fn legacy_doc_ingest_succeeds_with_no_units() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let created = documents::create_document(
        &app.state,
        upload("old.doc", "application/msword", &[0u8; 8192]),
    )
    .await?;

    let handler = IngestDocumentJob::new(FileType::Doc);
    let outcome = handler.handle(app.state.clone(), created.job.clone()).await;

    let JobExecution::Success { output } = outcome else {
        panic!("legacy ingest should succeed, got {outcome:?}");
    };
    assert_eq!(output["unit_count"], 0);
    assert_eq!(output["page_count"], 2);

    let rows = app.vectors_for_job(created.job.id).await?;
    assert!(rows.is_empty());

    app.cleanup().await
}
