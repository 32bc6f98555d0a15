use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use httpmock::MockServer;
use once_cell::sync::Lazy;
use paperquery::config::AppConfig;
use paperquery::db::{self, PgPool, MIGRATIONS};
use paperquery::embedding::StubEmbeddingClient;
use paperquery::index::VectorIndexService;
use paperquery::models::{Document, Job, VectorRecord};
use paperquery::state::AppState;
use paperquery::storage::ObjectStorage;
use tokio::sync::Mutex;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const STUB_EMBEDDING_DIMENSION: usize = 8;

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    storage: Arc<FakeStorage>,
    pub index_server: MockServer,
}

impl TestApp {
    /// Build the test harness against TEST_DATABASE_URL. Returns `None`
    /// when the variable is unset so the suite can skip in environments
    /// without Postgres.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };

        let index_server = MockServer::start_async().await;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            vector_index_url: index_server.base_url(),
            vector_index_api_key: None,
            embedding_endpoint: "http://127.0.0.1:1".to_string(),
            embedding_api_key: None,
            embedding_provider: "stub".to_string(),
            embedding_model: "byte-fold".to_string(),
            embedding_dimension: STUB_EMBEDDING_DIMENSION as u64,
            worker_poll_interval_secs: 1,
            worker_batch_size: 10,
            job_recency_window_hours: 24,
            search_max_distance: 0.75,
            aggregation_scan_limit: 10_000,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let embeddings = Arc::new(StubEmbeddingClient::new(STUB_EMBEDDING_DIMENSION));
        let index = Arc::new(VectorIndexService::from_config(&config)?);
        let state = Arc::new(AppState::new(
            pool,
            config,
            storage_for_state,
            embeddings,
            index,
        ));

        Ok(Some(Self {
            state,
            storage,
            index_server,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub async fn load_document(&self, document_id: Uuid) -> Result<Document> {
        self.with_conn(move |conn| {
            use paperquery::schema::documents::dsl::documents;
            documents
                .find(document_id)
                .first(conn)
                .context("failed to load document")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_for_document(&self, document_id: Uuid) -> Result<Vec<Job>> {
        self.with_conn(move |conn| {
            use paperquery::schema::jobs::dsl::{created_at, document_id as doc_col, jobs};
            jobs.filter(doc_col.eq(document_id))
                .order(created_at.asc())
                .load(conn)
                .context("failed to load jobs")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn vectors_for_job(&self, job_id: Uuid) -> Result<Vec<VectorRecord>> {
        self.with_conn(move |conn| {
            use paperquery::schema::vectors::dsl::{job_id as job_col, vectors};
            vectors
                .filter(job_col.eq(job_id))
                .load(conn)
                .context("failed to load vectors")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

/// Accept every index write and delete with a generic success body. Tests
/// that care about request shape register their own narrower mocks first.
#[allow(dead_code)]
pub async fn mock_index_writes(server: &MockServer) {
    for collection in ["document_chunks", "json_fields"] {
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::PUT)
                    .path(format!("/collections/{collection}/points"));
                then.status(200)
                    .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path(format!("/collections/{collection}/points/delete"));
                then.status(200)
                    .json_body(serde_json::json!({ "result": { "status": "acknowledged" } }));
            })
            .await;
    }
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE vectors, jobs, documents, ai_providers RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
