//! Storage interfaces used by the pipeline.
//!
//! Every stage talks to these traits, never to a pool directly, so the sweeper
//! runs the same against Postgres and against [`MemoryStore`](super::memory::MemoryStore).

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::{queries, render_queries};
use crate::models::job::{Job, JobStatus, PathField, VideoPathsRecord};
use crate::models::render::HeygenRenderTask;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No video record for job {0}")]
    RecordNotFound(i64),

    #[error("No job {0}")]
    JobNotFound(i64),

    #[error("Render task for job {0} already exists")]
    TaskExists(i64),

    #[error("No render task for job {0}")]
    TaskNotFound(i64),
}

/// Job and video-record persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>, StoreError>;

    async fn create_record(
        &self,
        job_id: i64,
        video_config: &serde_json::Value,
        theme: Option<&str>,
        profile: Option<&str>,
    ) -> Result<VideoPathsRecord, StoreError>;

    async fn get(&self, job_id: i64) -> Result<Option<VideoPathsRecord>, StoreError>;

    /// Idempotent single-field write; other fields are left untouched.
    async fn upsert_path(&self, job_id: i64, field: PathField, value: &str)
        -> Result<(), StoreError>;

    async fn set_config(&self, job_id: i64, video_config: &serde_json::Value)
        -> Result<(), StoreError>;

    async fn set_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Store the final path and mark the record completed. Returns false,
    /// writing nothing, when `owner` no longer holds the lease.
    async fn set_final_path(&self, job_id: i64, owner: Uuid, path: &str)
        -> Result<bool, StoreError>;

    async fn list_needing_processing(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<VideoPathsRecord>, StoreError>;

    /// Atomically move the record to `processing` under a lease.
    async fn claim(&self, job_id: i64, owner: Uuid, lease: Duration) -> Result<bool, StoreError>;

    async fn release(&self, job_id: i64, owner: Uuid, status: JobStatus)
        -> Result<(), StoreError>;

    /// Increment the retry count, set `failed` and the error. Returns the new
    /// count, or `None` when `owner` no longer holds the lease.
    async fn mark_failed(
        &self,
        job_id: i64,
        owner: Uuid,
        error: &str,
    ) -> Result<Option<i32>, StoreError>;
}

/// External render task persistence.
#[async_trait]
pub trait RenderTaskStore: Send + Sync {
    async fn get_task(&self, task_id: i64) -> Result<Option<HeygenRenderTask>, StoreError>;

    async fn insert_task(&self, task: &HeygenRenderTask) -> Result<(), StoreError>;

    /// Overwrite a task that ended in error, aborted or timeout with a fresh
    /// submission. Returns false, writing nothing, for any other stored status.
    async fn replace_failed_task(&self, task: &HeygenRenderTask) -> Result<bool, StoreError>;

    /// Write status plus urls/paths/error. A stored terminal status is kept.
    async fn update_task_status(&self, task: &HeygenRenderTask) -> Result<(), StoreError>;

    async fn set_task_paths(
        &self,
        task_id: i64,
        video_path: Option<&str>,
        thumbnail_path: Option<&str>,
    ) -> Result<(), StoreError>;
}

pub trait PipelineStore: JobStore + RenderTaskStore {}

impl<T: JobStore + RenderTaskStore> PipelineStore for T {}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn expect_row(affected: u64, job_id: i64) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::RecordNotFound(job_id));
    }
    Ok(())
}

#[async_trait]
impl JobStore for PgStore {
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn create_record(
        &self,
        job_id: i64,
        video_config: &serde_json::Value,
        theme: Option<&str>,
        profile: Option<&str>,
    ) -> Result<VideoPathsRecord, StoreError> {
        Ok(queries::create_record(&self.pool, job_id, video_config, theme, profile).await?)
    }

    async fn get(&self, job_id: i64) -> Result<Option<VideoPathsRecord>, StoreError> {
        Ok(queries::get_record(&self.pool, job_id).await?)
    }

    async fn upsert_path(
        &self,
        job_id: i64,
        field: PathField,
        value: &str,
    ) -> Result<(), StoreError> {
        Ok(queries::upsert_path(&self.pool, job_id, field, value).await?)
    }

    async fn set_config(
        &self,
        job_id: i64,
        video_config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let affected = queries::set_config(&self.pool, job_id, video_config).await?;
        expect_row(affected, job_id)
    }

    async fn set_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let affected = queries::set_status(&self.pool, job_id, status, error).await?;
        expect_row(affected, job_id)
    }

    async fn set_final_path(
        &self,
        job_id: i64,
        owner: Uuid,
        path: &str,
    ) -> Result<bool, StoreError> {
        let affected = queries::set_final_path(&self.pool, job_id, owner, path).await?;
        Ok(affected == 1)
    }

    async fn list_needing_processing(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<VideoPathsRecord>, StoreError> {
        Ok(queries::list_needing_processing(&self.pool, max_retries, limit).await?)
    }

    async fn claim(&self, job_id: i64, owner: Uuid, lease: Duration) -> Result<bool, StoreError> {
        Ok(queries::claim(&self.pool, job_id, owner, lease).await?)
    }

    async fn release(
        &self,
        job_id: i64,
        owner: Uuid,
        status: JobStatus,
    ) -> Result<(), StoreError> {
        queries::release(&self.pool, job_id, owner, status).await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: i64,
        owner: Uuid,
        error: &str,
    ) -> Result<Option<i32>, StoreError> {
        Ok(queries::mark_failed(&self.pool, job_id, owner, error).await?)
    }
}

#[async_trait]
impl RenderTaskStore for PgStore {
    async fn get_task(&self, task_id: i64) -> Result<Option<HeygenRenderTask>, StoreError> {
        Ok(render_queries::get_task(&self.pool, task_id).await?)
    }

    async fn insert_task(&self, task: &HeygenRenderTask) -> Result<(), StoreError> {
        match render_queries::insert_task(&self.pool, task).await {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::TaskExists(task.task_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_failed_task(&self, task: &HeygenRenderTask) -> Result<bool, StoreError> {
        let affected = render_queries::replace_failed_task(&self.pool, task).await?;
        Ok(affected == 1)
    }

    async fn update_task_status(&self, task: &HeygenRenderTask) -> Result<(), StoreError> {
        let affected = render_queries::update_task_status(&self.pool, task).await?;
        if affected == 0 {
            return Err(StoreError::TaskNotFound(task.task_id));
        }
        Ok(())
    }

    async fn set_task_paths(
        &self,
        task_id: i64,
        video_path: Option<&str>,
        thumbnail_path: Option<&str>,
    ) -> Result<(), StoreError> {
        let affected =
            render_queries::set_task_paths(&self.pool, task_id, video_path, thumbnail_path)
                .await?;
        if affected == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }
}
