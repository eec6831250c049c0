use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Status of an external avatar render.
///
/// `Completed`, `Error` and `Aborted` are reported by the service; `Timeout`
/// is declared locally when the polling budget runs out.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenderStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Aborted,
    Timeout,
}

impl RenderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RenderStatus::Completed | RenderStatus::Error | RenderStatus::Aborted | RenderStatus::Timeout
        )
    }

    /// Terminal without a video; a new render may replace it.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RenderStatus::Error | RenderStatus::Aborted | RenderStatus::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Map the service's status string. Unknown values count as still running.
    pub fn from_service(value: &str) -> Self {
        match value {
            "completed" => RenderStatus::Completed,
            "failed" | "error" => RenderStatus::Error,
            "aborted" => RenderStatus::Aborted,
            "pending" | "waiting" => RenderStatus::Pending,
            _ => RenderStatus::Processing,
        }
    }
}

/// A submitted avatar render, keyed by the job it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeygenRenderTask {
    pub task_id: i64,
    pub heygen_video_id: String,
    pub status: RenderStatus,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl HeygenRenderTask {
    pub fn submitted(task_id: i64, heygen_video_id: String, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            heygen_video_id,
            status: RenderStatus::Processing,
            video_url: None,
            thumbnail_url: None,
            video_path: None,
            thumbnail_path: None,
            error: None,
            created_at: now,
            last_updated_at: now,
        }
    }
}

/// What gets sent to the render service for one avatar clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderRequest {
    pub avatar_id: String,
    pub voice_id: String,
    pub input_text: String,
    pub speed: f64,
    pub width: u32,
    pub height: u32,
    pub background_asset_id: Option<String>,
}

/// One status observation returned by the render service.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStatusReport {
    pub status: RenderStatus,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
}
