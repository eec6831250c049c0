//! Drives avatar renders on the external service.
//!
//! A task moves `processing -> completed | error | aborted | timeout`. Each
//! [`RenderAdapter::tick`] does at most one status query and one store write,
//! so the sweeper can advance renders without blocking on them.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::store::{RenderTaskStore, StoreError};
use crate::models::render::{HeygenRenderTask, RenderRequest, RenderStatus};
use crate::services::heygen::{RenderService, RenderServiceError};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Service(#[from] RenderServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Render {video_id} did not finish within {secs}s")]
    Timeout { video_id: String, secs: u64 },
}

pub struct RenderAdapter {
    service: Arc<dyn RenderService>,
    store: Arc<dyn RenderTaskStore>,
    poll_interval: Duration,
    timeout: Duration,
}

pub fn video_file_name(task_id: i64) -> String {
    format!("heygen_{task_id}.mp4")
}

pub fn thumbnail_file_name(task_id: i64) -> String {
    format!("heygen_{task_id}_thumbnail.jpg")
}

impl RenderAdapter {
    pub fn new(
        service: Arc<dyn RenderService>,
        store: Arc<dyn RenderTaskStore>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            store,
            poll_interval,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RenderTaskStore> {
        &self.store
    }

    /// Start a render for `job_id`. Nothing is stored unless the service accepted it.
    pub async fn submit(
        &self,
        job_id: i64,
        request: &RenderRequest,
    ) -> Result<HeygenRenderTask, RenderError> {
        let video_id = self.service.submit(request).await?;
        let task = HeygenRenderTask::submitted(job_id, video_id, Utc::now());
        self.store.insert_task(&task).await?;

        tracing::info!(
            job_id,
            heygen_video_id = %task.heygen_video_id,
            avatar_id = %request.avatar_id,
            "Avatar render submitted"
        );
        Ok(task)
    }

    /// Start a new render over a task that ended in error, aborted or timeout.
    pub async fn resubmit(
        &self,
        job_id: i64,
        request: &RenderRequest,
    ) -> Result<HeygenRenderTask, RenderError> {
        let video_id = self.service.submit(request).await?;
        let task = HeygenRenderTask::submitted(job_id, video_id, Utc::now());
        if !self.store.replace_failed_task(&task).await? {
            return Err(StoreError::TaskExists(job_id).into());
        }

        tracing::info!(
            job_id,
            heygen_video_id = %task.heygen_video_id,
            "Avatar render resubmitted after a failed attempt"
        );
        Ok(task)
    }

    fn expired(&self, task: &HeygenRenderTask) -> bool {
        let age = Utc::now() - task.created_at;
        age.to_std().map(|age| age >= self.timeout).unwrap_or(false)
    }

    async fn write_timeout(&self, task: &HeygenRenderTask) -> Result<HeygenRenderTask, RenderError> {
        let mut next = task.clone();
        next.status = RenderStatus::Timeout;
        next.error = Some(format!(
            "render not finished after {}s",
            self.timeout.as_secs()
        ));
        next.last_updated_at = Utc::now();
        self.store.update_task_status(&next).await?;
        self.record_terminal(&next);
        Ok(next)
    }

    fn record_terminal(&self, task: &HeygenRenderTask) {
        metrics::counter!("render_tasks_terminal", "status" => task.status.as_str()).increment(1);
        tracing::info!(
            job_id = task.task_id,
            heygen_video_id = %task.heygen_video_id,
            status = %task.status,
            "Avatar render reached a terminal status"
        );
    }

    /// Download video and thumbnail into `dest_dir`. Returns the local paths
    /// that were written; a failed video download yields no paths at all.
    async fn fetch_outputs(
        &self,
        task: &HeygenRenderTask,
        dest_dir: &Path,
    ) -> (Option<String>, Option<String>) {
        let Some(url) = task.video_url.as_deref() else {
            tracing::error!(
                job_id = task.task_id,
                heygen_video_id = %task.heygen_video_id,
                "Completed render has no video url"
            );
            return (None, None);
        };

        let video_path = dest_dir.join(video_file_name(task.task_id));
        if let Err(e) = self.service.download(url, &video_path).await {
            tracing::error!(
                job_id = task.task_id,
                error = %e,
                "Failed to download rendered video"
            );
            let _ = tokio::fs::remove_file(&video_path).await;
            return (None, None);
        }

        let mut thumbnail = None;
        if let Some(thumb_url) = task.thumbnail_url.as_deref() {
            let thumb_path = dest_dir.join(thumbnail_file_name(task.task_id));
            match self.service.download(thumb_url, &thumb_path).await {
                Ok(()) => thumbnail = Some(path_string(&thumb_path)),
                Err(e) => tracing::warn!(
                    job_id = task.task_id,
                    error = %e,
                    "Failed to download render thumbnail"
                ),
            }
        }

        (Some(path_string(&video_path)), thumbnail)
    }

    /// Advance `task` by at most one status query and one write.
    pub async fn tick(
        &self,
        task: &HeygenRenderTask,
        dest_dir: &Path,
    ) -> Result<HeygenRenderTask, RenderError> {
        if task.status.is_terminal() {
            return Ok(task.clone());
        }
        if self.expired(task) {
            return self.write_timeout(task).await;
        }

        let report = self.service.get_status(&task.heygen_video_id).await?;
        if report.status == task.status {
            tracing::debug!(
                job_id = task.task_id,
                status = %task.status,
                "Avatar render still running"
            );
            return Ok(task.clone());
        }

        let mut next = task.clone();
        next.status = report.status;
        next.video_url = report.video_url.or(next.video_url);
        next.thumbnail_url = report.thumbnail_url.or(next.thumbnail_url);
        next.error = report.error.or(next.error);
        next.last_updated_at = Utc::now();

        if next.status == RenderStatus::Completed {
            let (video, thumbnail) = self.fetch_outputs(&next, dest_dir).await;
            next.video_path = video;
            next.thumbnail_path = thumbnail;
        }

        self.store.update_task_status(&next).await?;
        if next.status.is_terminal() {
            self.record_terminal(&next);
        }
        Ok(next)
    }

    /// Tick until terminal, sleeping between polls. Gives up after the
    /// timeout budget, stores `timeout` and returns an error.
    pub async fn poll(
        &self,
        task: &HeygenRenderTask,
        dest_dir: &Path,
    ) -> Result<HeygenRenderTask, RenderError> {
        let started = Instant::now();
        let mut current = task.clone();

        loop {
            current = self.tick(&current, dest_dir).await?;
            if current.status == RenderStatus::Timeout {
                return Err(self.timeout_error(&current));
            }
            if current.status.is_terminal() {
                return Ok(current);
            }
            if started.elapsed() >= self.timeout {
                let timed_out = self.write_timeout(&current).await?;
                return Err(self.timeout_error(&timed_out));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn timeout_error(&self, task: &HeygenRenderTask) -> RenderError {
        RenderError::Timeout {
            video_id: task.heygen_video_id.clone(),
            secs: self.timeout.as_secs(),
        }
    }

    /// Retry the download of a completed render whose video never landed.
    /// The status is left as it is.
    pub async fn recover_download(
        &self,
        task: &HeygenRenderTask,
        dest_dir: &Path,
    ) -> Result<PathBuf, RenderError> {
        let url = task.video_url.as_deref().ok_or_else(|| {
            RenderServiceError::Api(format!(
                "render {} has no video url to download",
                task.heygen_video_id
            ))
        })?;

        let video_path = dest_dir.join(video_file_name(task.task_id));
        if let Err(e) = self.service.download(url, &video_path).await {
            let _ = tokio::fs::remove_file(&video_path).await;
            return Err(e.into());
        }

        let mut thumbnail = task.thumbnail_path.clone();
        let missing_thumbnail = thumbnail.is_none().then_some(task.thumbnail_url.as_deref());
        if let Some(Some(thumb_url)) = missing_thumbnail {
            let thumb_path = dest_dir.join(thumbnail_file_name(task.task_id));
            match self.service.download(thumb_url, &thumb_path).await {
                Ok(()) => thumbnail = Some(path_string(&thumb_path)),
                Err(e) => tracing::warn!(job_id = task.task_id, error = %e, "Thumbnail retry failed"),
            }
        }

        let video = path_string(&video_path);
        self.store
            .set_task_paths(task.task_id, Some(&video), thumbnail.as_deref())
            .await?;
        tracing::info!(job_id = task.task_id, path = %video, "Recovered rendered video");
        Ok(video_path)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
