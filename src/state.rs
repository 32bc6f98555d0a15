use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    embedding::EmbeddingClient,
    error::{AppError, AppResult},
    index::VectorIndexService,
    storage::ObjectStorage,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Shared handles for the ingestion and query services. Collaborators are
/// injected here once instead of being global singletons.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub index: Arc<VectorIndexService>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        embeddings: Arc<dyn EmbeddingClient>,
        index: Arc<VectorIndexService>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            embeddings,
            index,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
