//! Periodic sweep over unfinished jobs.
//!
//! This is the one place where errors become persisted job state: a job that
//! fails here gets `failed`, an error message and one more retry counted, and
//! is left alone once it has used up `max_retries`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::assembler::{resolvable_segments, Assemble};
use super::paths::OutputLayout;
use super::render::RenderAdapter;
use super::segments::SegmentStage;
use super::PipelineError;
use crate::config::video::{ConfigError, VideoConfig};
use crate::db::store::{PipelineStore, StoreError};
use crate::models::job::{Job, JobStatus, PathField, VideoPathsRecord};
use crate::models::render::{HeygenRenderTask, RenderStatus};
use crate::services::lock::SweepLock;

#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub max_retries: i32,
    pub batch_size: i64,
    pub lease: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            batch_size: 25,
            lease: Duration::from_secs(3600),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub selected: usize,
    pub completed: usize,
    pub waiting: usize,
    pub failed: usize,
    /// Claimed by another worker, either before our claim or after our
    /// lease ran out.
    pub skipped: usize,
    /// Final videos written during the sweep.
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug)]
enum JobOutcome {
    Completed(PathBuf),
    /// An avatar render is still running; try again next sweep.
    Waiting,
    Failed,
}

pub struct Scanner {
    store: Arc<dyn PipelineStore>,
    stage: Arc<dyn SegmentStage>,
    assembler: Arc<dyn Assemble>,
    render: Option<Arc<RenderAdapter>>,
    lock: Option<Arc<SweepLock>>,
    layout: OutputLayout,
    settings: ScanSettings,
    owner: Uuid,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        stage: Arc<dyn SegmentStage>,
        assembler: Arc<dyn Assemble>,
        layout: OutputLayout,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            stage,
            assembler,
            render: None,
            lock: None,
            layout,
            settings,
            owner: Uuid::new_v4(),
        }
    }

    pub fn with_render(mut self, render: Arc<RenderAdapter>) -> Self {
        self.render = Some(render);
        self
    }

    pub fn with_lock(mut self, lock: Arc<SweepLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Lease owner id written on every claim by this scanner.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Sweep under the redis lock when one is configured. Returns `None`
    /// when another worker holds it.
    pub async fn run_sweep(&self) -> Result<Option<SweepReport>, PipelineError> {
        let Some(lock) = &self.lock else {
            return Ok(Some(self.sweep().await?));
        };

        let Some(guard) = lock.acquire().await? else {
            tracing::info!("Another sweep holds the lock, skipping this cycle");
            return Ok(None);
        };
        let result = self.sweep().await;
        match lock.release(guard).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Sweep lock expired before release"),
            Err(e) => tracing::error!(error = %e, "Failed to release sweep lock"),
        }
        Ok(Some(result?))
    }

    /// Process every selectable job once, oldest first.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let started = Instant::now();
        let records = self
            .store
            .list_needing_processing(self.settings.max_retries, self.settings.batch_size)
            .await?;

        let mut report = SweepReport {
            selected: records.len(),
            ..SweepReport::default()
        };

        for record in records {
            let job_id = record.job_id;
            match self.process(record).await {
                Ok(Some(JobOutcome::Completed(path))) => {
                    report.completed += 1;
                    report.outputs.push(path);
                }
                Ok(Some(JobOutcome::Waiting)) => report.waiting += 1,
                Ok(Some(JobOutcome::Failed)) => report.failed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(job_id, error = %e, "Could not record job outcome");
                }
            }
        }

        metrics::histogram!("pipeline_sweep_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            selected = report.selected,
            completed = report.completed,
            waiting = report.waiting,
            failed = report.failed,
            skipped = report.skipped,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Claim, run and record one job. `Ok(None)` means the claim or the
    /// lease was lost.
    async fn process(&self, record: VideoPathsRecord) -> Result<Option<JobOutcome>, StoreError> {
        let job_id = record.job_id;
        let claimed = self
            .store
            .claim(job_id, self.owner, self.settings.lease)
            .await?;
        if !claimed {
            tracing::debug!(job_id, "Job claimed elsewhere, skipping");
            return Ok(None);
        }

        tracing::info!(job_id, retry_count = record.retry_count, "Processing job");
        match self.run_job(&record).await {
            Ok(JobOutcome::Completed(path)) => {
                let value = path.to_string_lossy();
                if !self.store.set_final_path(job_id, self.owner, &value).await? {
                    tracing::warn!(job_id, "Lease lost before completion, outcome dropped");
                    return Ok(None);
                }
                metrics::counter!("pipeline_jobs_completed").increment(1);
                tracing::info!(job_id, final_video_path = %value, "Job completed");
                Ok(Some(JobOutcome::Completed(path)))
            }
            Ok(JobOutcome::Waiting) => {
                let restored = match record.status {
                    JobStatus::Processing => JobStatus::Pending,
                    other => other,
                };
                self.store.release(job_id, self.owner, restored).await?;
                metrics::counter!("pipeline_jobs_waiting").increment(1);
                tracing::info!(job_id, "Avatar render still running, job left for the next sweep");
                Ok(Some(JobOutcome::Waiting))
            }
            Ok(JobOutcome::Failed) => Ok(Some(JobOutcome::Failed)),
            Err(e) => {
                let message = e.to_string();
                let Some(retry_count) = self.store.mark_failed(job_id, self.owner, &message).await?
                else {
                    tracing::warn!(job_id, error = %message, "Lease lost before failure was recorded");
                    return Ok(None);
                };
                metrics::counter!("pipeline_jobs_failed").increment(1);
                if retry_count >= self.settings.max_retries {
                    tracing::error!(
                        job_id,
                        retry_count,
                        error = %message,
                        "Job failed for the last time"
                    );
                } else {
                    tracing::warn!(job_id, retry_count, error = %message, "Job failed, will retry");
                }
                Ok(Some(JobOutcome::Failed))
            }
        }
    }

    async fn run_job(&self, record: &VideoPathsRecord) -> Result<JobOutcome, PipelineError> {
        let job = self
            .store
            .get_job(record.job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(record.job_id))?;
        let config = VideoConfig::from_value(&record.video_config)?;

        let mut record = self.stage.generate(&job, record, &config).await?;

        if config.heygen_short_video && record.short_video_path.is_none() {
            match self.advance_render(&job).await? {
                Some(video) => {
                    let value = video.to_string_lossy().into_owned();
                    for field in [PathField::ShortVideoPath, PathField::HygenShortVideo] {
                        self.store.upsert_path(job.job_id, field, &value).await?;
                        record.set_path(field, Some(value.clone()));
                    }
                }
                None => return Ok(JobOutcome::Waiting),
            }
        }

        if resolvable_segments(&record).await.is_empty() {
            return Err(PipelineError::NoSegments(job.job_id));
        }

        let path = self.assembler.assemble(&job, &record, &config).await?;
        Ok(JobOutcome::Completed(path))
    }

    /// One tick of the job's avatar render. `Some(path)` once the video is on disk.
    async fn advance_render(&self, job: &Job) -> Result<Option<PathBuf>, PipelineError> {
        let render = self
            .render
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("HEYGEN_API_KEY for avatar rendering".to_string()))?;
        let task = self
            .store
            .get_task(job.job_id)
            .await?
            .ok_or(StoreError::TaskNotFound(job.job_id))?;

        let dest_dir = self.layout.job_dir(job);
        let task = render.tick(&task, &dest_dir).await?;

        match task.status {
            RenderStatus::Pending | RenderStatus::Processing => Ok(None),
            RenderStatus::Error | RenderStatus::Aborted | RenderStatus::Timeout => {
                Err(PipelineError::RenderFailed {
                    status: task.status,
                    detail: task
                        .error
                        .clone()
                        .unwrap_or_else(|| "no detail from the render service".to_string()),
                })
            }
            RenderStatus::Completed => {
                let video = self.completed_video(render, &task, &dest_dir).await?;
                Ok(Some(video))
            }
        }
    }

    async fn completed_video(
        &self,
        render: &RenderAdapter,
        task: &HeygenRenderTask,
        dest_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        if let Some(path) = task.video_path.as_deref().map(PathBuf::from) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
        }
        Ok(render.recover_download(task, dest_dir).await?)
    }
}
