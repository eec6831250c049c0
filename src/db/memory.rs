use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{JobStore, RenderTaskStore, StoreError};
use crate::models::job::{Job, JobStatus, PathField, VideoPathsRecord};
use crate::models::render::HeygenRenderTask;

#[derive(Default)]
struct Tables {
    jobs: HashMap<i64, Job>,
    records: HashMap<i64, VideoPathsRecord>,
    tasks: HashMap<i64, HeygenRenderTask>,
}

/// In-process store with the same semantics as the Postgres one.
///
/// Used by tests and by single-process runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, as the web layer would.
    pub async fn insert_job(&self, job: Job) {
        self.tables.lock().await.jobs.insert(job.job_id, job);
    }
}

fn record_mut(tables: &mut Tables, job_id: i64) -> Result<&mut VideoPathsRecord, StoreError> {
    tables
        .records
        .get_mut(&job_id)
        .ok_or(StoreError::RecordNotFound(job_id))
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, job_id: i64) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.lock().await.jobs.get(&job_id).cloned())
    }

    async fn create_record(
        &self,
        job_id: i64,
        video_config: &serde_json::Value,
        theme: Option<&str>,
        profile: Option<&str>,
    ) -> Result<VideoPathsRecord, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        let record = tables.records.entry(job_id).or_insert_with(|| {
            let mut record = VideoPathsRecord::new(job_id, video_config.clone(), Utc::now());
            record.theme = theme.map(str::to_string);
            record.profile = profile.map(str::to_string);
            record
        });
        Ok(record.clone())
    }

    async fn get(&self, job_id: i64) -> Result<Option<VideoPathsRecord>, StoreError> {
        Ok(self.tables.lock().await.records.get(&job_id).cloned())
    }

    async fn upsert_path(
        &self,
        job_id: i64,
        field: PathField,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        let now = Utc::now();
        let record = tables
            .records
            .entry(job_id)
            .or_insert_with(|| VideoPathsRecord::new(job_id, serde_json::json!({}), now));
        record.set_path(field, Some(value.to_string()));
        record.updated_at = now;
        Ok(())
    }

    async fn set_config(
        &self,
        job_id: i64,
        video_config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let record = record_mut(&mut tables, job_id)?;
        record.video_config = video_config.clone();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let record = record_mut(&mut tables, job_id)?;
        record.status = status;
        record.error_details = error.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_final_path(
        &self,
        job_id: i64,
        owner: Uuid,
        path: &str,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let record = record_mut(&mut tables, job_id)?;
        if record.lease_owner != Some(owner) {
            return Ok(false);
        }
        record.final_video_path = Some(path.to_string());
        record.status = JobStatus::Completed;
        record.error_details = None;
        record.lease_owner = None;
        record.lease_expires_at = None;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_needing_processing(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<VideoPathsRecord>, StoreError> {
        let tables = self.tables.lock().await;
        let now = Utc::now();
        let mut selected: Vec<VideoPathsRecord> = tables
            .records
            .values()
            .filter(|r| {
                (r.status == JobStatus::Pending
                    || (r.final_video_path.is_none() && r.status != JobStatus::Completed))
                    && r.retry_count < max_retries
                    && !r.is_leased(now)
            })
            .cloned()
            .collect();
        selected.sort_by_key(|r| (r.created_at, r.job_id));
        selected.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(selected)
    }

    async fn claim(&self, job_id: i64, owner: Uuid, lease: Duration) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let record = record_mut(&mut tables, job_id)?;
        if record.status == JobStatus::Completed || record.is_leased(now) {
            return Ok(false);
        }
        let lease =
            chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365));
        record.status = JobStatus::Processing;
        record.lease_owner = Some(owner);
        record.lease_expires_at = now.checked_add_signed(lease);
        record.updated_at = now;
        Ok(true)
    }

    async fn release(
        &self,
        job_id: i64,
        owner: Uuid,
        status: JobStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let record = record_mut(&mut tables, job_id)?;
        if record.lease_owner == Some(owner) {
            record.status = status;
            record.lease_owner = None;
            record.lease_expires_at = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: i64,
        owner: Uuid,
        error: &str,
    ) -> Result<Option<i32>, StoreError> {
        let mut tables = self.tables.lock().await;
        let record = record_mut(&mut tables, job_id)?;
        if record.lease_owner != Some(owner) {
            return Ok(None);
        }
        record.retry_count += 1;
        record.status = JobStatus::Failed;
        record.error_details = Some(error.to_string());
        record.lease_owner = None;
        record.lease_expires_at = None;
        record.updated_at = Utc::now();
        Ok(Some(record.retry_count))
    }
}

#[async_trait]
impl RenderTaskStore for MemoryStore {
    async fn get_task(&self, task_id: i64) -> Result<Option<HeygenRenderTask>, StoreError> {
        Ok(self.tables.lock().await.tasks.get(&task_id).cloned())
    }

    async fn insert_task(&self, task: &HeygenRenderTask) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.tasks.contains_key(&task.task_id) {
            return Err(StoreError::TaskExists(task.task_id));
        }
        tables.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn replace_failed_task(&self, task: &HeygenRenderTask) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.tasks.get_mut(&task.task_id) {
            Some(stored) if stored.status.is_failure() => {
                *stored = task.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::TaskNotFound(task.task_id)),
        }
    }

    async fn update_task_status(&self, task: &HeygenRenderTask) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .tasks
            .get_mut(&task.task_id)
            .ok_or(StoreError::TaskNotFound(task.task_id))?;
        if !stored.status.is_terminal() {
            stored.status = task.status;
        }
        fn keep(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        keep(&mut stored.video_url, &task.video_url);
        keep(&mut stored.thumbnail_url, &task.thumbnail_url);
        keep(&mut stored.video_path, &task.video_path);
        keep(&mut stored.thumbnail_path, &task.thumbnail_path);
        keep(&mut stored.error, &task.error);
        stored.last_updated_at = Utc::now();
        Ok(())
    }

    async fn set_task_paths(
        &self,
        task_id: i64,
        video_path: Option<&str>,
        thumbnail_path: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if let Some(path) = video_path {
            stored.video_path = Some(path.to_string());
        }
        if let Some(path) = thumbnail_path {
            stored.thumbnail_path = Some(path.to_string());
        }
        stored.last_updated_at = Utc::now();
        Ok(())
    }
}
