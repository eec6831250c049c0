pub mod assembler;
pub mod audio;
pub mod composer;
pub mod mixer;
pub mod paths;
pub mod render;
pub mod scanner;
pub mod segments;
pub mod short_video;

use std::path::PathBuf;

use crate::config::video::ConfigError;
use crate::db::store::StoreError;
use crate::models::render::RenderStatus;
use crate::services::ffmpeg::MediaError;
use crate::services::lock::LockError;

/// Everything that can stop a job. The scanner turns these into
/// `error_details` on the job's record.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid video config: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audio mix failed: {0}")]
    Mix(#[from] mixer::MixError),

    #[error("Compose failed: {0}")]
    Compose(#[from] composer::ComposeError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Avatar render failed: {0}")]
    Render(#[from] render::RenderError),

    #[error("Assembly failed: {0}")]
    Assemble(#[from] assembler::AssembleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sweep lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Segment generation failed: {}", .0.join("; "))]
    StageFailures(Vec<String>),

    #[error("Job {0} has no segment files to assemble")]
    NoSegments(i64),

    #[error("Avatar render ended with status {status}: {detail}")]
    RenderFailed { status: RenderStatus, detail: String },

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Expected output was not written: {}", .0.display())]
    MissingOutput(PathBuf),
}
