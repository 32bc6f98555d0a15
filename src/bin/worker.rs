use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use paperquery::{
    config::AppConfig,
    db,
    embedding::HttpEmbeddingClient,
    index::VectorIndexService,
    state::AppState,
    storage::S3Storage,
    workers::{default_handlers, Worker},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        embedding_model = %config.embedding_model,
        vector_index_url = %config.vector_index_url,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    {
        let mut conn = pool.get()?;
        db::run_migrations(&mut conn)?;
    }

    let storage = Arc::new(S3Storage::from_config(&config).await?);
    let embeddings = Arc::new(HttpEmbeddingClient::from_config(&config)?);
    let index = Arc::new(VectorIndexService::from_config(&config)?);

    index.ensure_collections(config.embedding_dimension).await?;

    let poll_interval = Duration::from_secs(config.worker_poll_interval_secs);
    let batch_size = config.worker_batch_size;
    let state = Arc::new(AppState::new(pool, config, storage, embeddings, index));
    let worker = Worker::new(state, default_handlers(), poll_interval, batch_size);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
