//! Fakes for the render service and pipeline stages, plus store seeding
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use podcast_video_pipeline::config::video::VideoConfig;
use podcast_video_pipeline::db::memory::MemoryStore;
use podcast_video_pipeline::db::store::{JobStore, RenderTaskStore, StoreError};
use podcast_video_pipeline::models::job::{Job, VideoPathsRecord};
use podcast_video_pipeline::models::render::{
    HeygenRenderTask, RenderRequest, RenderStatusReport,
};
use podcast_video_pipeline::pipeline::assembler::{Assemble, AssembleError};
use podcast_video_pipeline::pipeline::segments::SegmentStage;
use podcast_video_pipeline::pipeline::PipelineError;
use podcast_video_pipeline::services::heygen::{RenderService, RenderServiceError};

use crate::fixtures;

/// Register a job and create its video record.
pub async fn seed(store: &MemoryStore, job_id: i64, config: &serde_json::Value) -> VideoPathsRecord {
    store.insert_job(fixtures::job(job_id)).await;
    store
        .create_record(job_id, config, Some("dark"), Some("weekly"))
        .await
        .expect("create record")
}

pub fn render_request() -> RenderRequest {
    RenderRequest {
        avatar_id: "Judith_expressive_2024120201".to_string(),
        voice_id: "c4be407b9d94405a9eb403190d77c851".to_string(),
        input_text: "Welcome back to the show".to_string(),
        speed: 1.1,
        width: 1280,
        height: 720,
        background_asset_id: None,
    }
}

/// Render service that replays scripted status reports.
///
/// Reports are consumed in order; the last one repeats forever.
pub struct FakeRenderService {
    reports: Mutex<VecDeque<RenderStatusReport>>,
    submit_fails: bool,
    download_fails: AtomicBool,
    pub submits: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl FakeRenderService {
    pub fn reporting(reports: Vec<RenderStatusReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            submit_fails: false,
            download_fails: AtomicBool::new(false),
            submits: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn failing_submit() -> Self {
        Self {
            submit_fails: true,
            ..Self::reporting(Vec::new())
        }
    }

    pub fn set_download_fails(&self, fails: bool) {
        self.download_fails.store(fails, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderService for FakeRenderService {
    async fn submit(&self, _request: &RenderRequest) -> Result<String, RenderServiceError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.submit_fails {
            return Err(RenderServiceError::Api("connection reset".to_string()));
        }
        Ok("vid_123".to_string())
    }

    async fn get_status(
        &self,
        _external_id: &str,
    ) -> Result<RenderStatusReport, RenderServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut reports = self.reports.lock().unwrap();
        let report = if reports.len() > 1 {
            reports.pop_front()
        } else {
            reports.front().cloned()
        };
        report.ok_or_else(|| RenderServiceError::Api("no scripted status".to_string()))
    }

    async fn download(&self, _url: &str, local_path: &Path) -> Result<(), RenderServiceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.download_fails.load(Ordering::SeqCst) {
            return Err(RenderServiceError::Api("download refused".to_string()));
        }
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, b"rendered").await?;
        Ok(())
    }
}

/// Counts status writes on the way to an in-memory store.
pub struct CountingTaskStore {
    inner: Arc<MemoryStore>,
    pub status_writes: AtomicUsize,
}

impl CountingTaskStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            status_writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RenderTaskStore for CountingTaskStore {
    async fn get_task(&self, task_id: i64) -> Result<Option<HeygenRenderTask>, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn insert_task(&self, task: &HeygenRenderTask) -> Result<(), StoreError> {
        self.inner.insert_task(task).await
    }

    async fn replace_failed_task(&self, task: &HeygenRenderTask) -> Result<bool, StoreError> {
        self.inner.replace_failed_task(task).await
    }

    async fn update_task_status(&self, task: &HeygenRenderTask) -> Result<(), StoreError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_task_status(task).await
    }

    async fn set_task_paths(
        &self,
        task_id: i64,
        video_path: Option<&str>,
        thumbnail_path: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner
            .set_task_paths(task_id, video_path, thumbnail_path)
            .await
    }
}

/// Segment stage that either passes the record through or fails.
#[derive(Default)]
pub struct FakeStage {
    fail_with: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeStage {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SegmentStage for FakeStage {
    async fn generate(
        &self,
        _job: &Job,
        record: &VideoPathsRecord,
        _config: &VideoConfig,
    ) -> Result<VideoPathsRecord, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => Err(PipelineError::StageFailures(vec![message.clone()])),
            None => Ok(record.clone()),
        }
    }
}

/// Segment stage that lets another worker claim the job, then fails.
pub struct LeaseTakingStage {
    store: Arc<MemoryStore>,
    pub taker: Uuid,
}

impl LeaseTakingStage {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            taker: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl SegmentStage for LeaseTakingStage {
    async fn generate(
        &self,
        job: &Job,
        _record: &VideoPathsRecord,
        _config: &VideoConfig,
    ) -> Result<VideoPathsRecord, PipelineError> {
        let taken = self
            .store
            .claim(job.job_id, self.taker, Duration::from_secs(600))
            .await?;
        assert!(taken, "lease should have expired");
        Err(PipelineError::StageFailures(vec!["main: encode killed".to_string()]))
    }
}

/// Assembler that writes a placeholder final file.
pub struct FakeAssembler {
    dir: PathBuf,
    pub calls: AtomicUsize,
}

impl FakeAssembler {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Assemble for FakeAssembler {
    async fn assemble(
        &self,
        job: &Job,
        _record: &VideoPathsRecord,
        _config: &VideoConfig,
    ) -> Result<PathBuf, AssembleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("final_video_{}.mp4", job.job_id));
        tokio::fs::write(&path, b"final").await?;
        Ok(path)
    }
}
