use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    coordinator,
    jobs::{self, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod ingest;

#[derive(Debug)]
pub enum JobExecution {
    Success { output: Value },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
    batch_size: i64,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
            batch_size,
        }
    }

    pub async fn run(&self) {
        info!("worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Pull one batch of recent pending jobs and run them oldest-first.
    /// Returns whether any job was processed so the caller knows to poll
    /// again immediately instead of sleeping.
    async fn tick(&self) -> Result<bool, JobQueueError> {
        let state = self.state.clone();
        let batch_size = self.batch_size;
        let recency_window =
            chrono::Duration::hours(self.state.config.job_recency_window_hours);
        let batch = task::spawn_blocking(move || {
            let mut conn = match state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    error!(?err, "failed to obtain database connection in worker");
                    return Ok(Vec::new());
                }
            };
            jobs::enqueue_batch(&mut conn, batch_size, recency_window)
        })
        .await
        .map_err(|err| JobQueueError::Task(err.to_string()))??;

        if batch.is_empty() {
            return Ok(false);
        }

        for job in batch {
            self.process(job).await?;
        }
        Ok(true)
    }

    async fn process(&self, job: Job) -> Result<(), JobQueueError> {
        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            let _ = self
                .with_conn(move |conn| jobs::mark_failed(conn, job.id, "no handler registered"))
                .await?;
            return Ok(());
        };

        // Claim before any I/O. A false claim means the job was cancelled
        // or taken by another worker between the batch read and now.
        let job_id = job.id;
        let claimed = self
            .with_conn(move |conn| jobs::mark_started(conn, job_id))
            .await?;
        if !claimed {
            info!(job_id = %job.id, "job no longer pending; skipping");
            return Ok(());
        }

        let result = handler.handle(self.state.clone(), job.clone()).await;
        match result {
            JobExecution::Success { output } => {
                let recorded = self
                    .with_conn(move |conn| jobs::mark_succeeded(conn, job_id, output))
                    .await?;
                if recorded {
                    info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
                } else {
                    warn!(job_id = %job.id, "job reached a terminal state before success could be recorded");
                }
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                let _ = self
                    .with_conn(move |conn| jobs::mark_failed(conn, job_id, &error))
                    .await?;
                // Compensating purge: a pipeline can fail after some vectors
                // were already written, and failed jobs must leave nothing
                // visible to retrieval.
                if let Err(err) = coordinator::purge_job(&self.state, job.id).await {
                    warn!(job_id = %job.id, error = %err, "compensating purge failed");
                }
            }
        }
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, JobQueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut diesel::PgConnection) -> Result<T, JobQueueError> + Send + 'static,
    {
        let state = self.state.clone();
        task::spawn_blocking(move || {
            let mut conn = state.db().map_err(|err| JobQueueError::Pool(err.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| JobQueueError::Task(err.to_string()))?
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    ingest::all_handlers()
}
