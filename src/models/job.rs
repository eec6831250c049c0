use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

/// Lifecycle of a job's video record inside the pipeline.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A podcast job as created by the web layer. Read-only for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub topic: String,
    pub profile_name: String,
    pub customer_id: String,
    pub theme: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Nullable path columns of a video record.
///
/// The column name is derived from the variant, so only these names can ever
/// be interpolated into a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PathField {
    AudioPath,
    WelcomeAudioPath,
    IntroVideoPath,
    BumperVideoPath,
    ShortVideoPath,
    MainVideoPath,
    OutroVideoPath,
    WelcomeVideoAvatarPath,
    HygenShortVideo,
}

impl PathField {
    pub fn column(&self) -> &'static str {
        self.into()
    }
}

/// One row of `video_paths`: everything the pipeline knows about a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoPathsRecord {
    pub job_id: i64,
    pub audio_path: Option<String>,
    pub welcome_audio_path: Option<String>,
    pub intro_video_path: Option<String>,
    pub bumper_video_path: Option<String>,
    pub short_video_path: Option<String>,
    pub main_video_path: Option<String>,
    pub outro_video_path: Option<String>,
    pub welcome_video_avatar_path: Option<String>,
    pub hygen_short_video: Option<String>,
    pub final_video_path: Option<String>,
    pub video_config: serde_json::Value,
    pub theme: Option<String>,
    pub profile: Option<String>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub error_details: Option<String>,
    pub lease_owner: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoPathsRecord {
    /// Fresh record with every path unset.
    pub fn new(job_id: i64, video_config: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            audio_path: None,
            welcome_audio_path: None,
            intro_video_path: None,
            bumper_video_path: None,
            short_video_path: None,
            main_video_path: None,
            outro_video_path: None,
            welcome_video_avatar_path: None,
            hygen_short_video: None,
            final_video_path: None,
            video_config,
            theme: None,
            profile: None,
            status: JobStatus::Pending,
            retry_count: 0,
            error_details: None,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn path(&self, field: PathField) -> Option<&str> {
        match field {
            PathField::AudioPath => self.audio_path.as_deref(),
            PathField::WelcomeAudioPath => self.welcome_audio_path.as_deref(),
            PathField::IntroVideoPath => self.intro_video_path.as_deref(),
            PathField::BumperVideoPath => self.bumper_video_path.as_deref(),
            PathField::ShortVideoPath => self.short_video_path.as_deref(),
            PathField::MainVideoPath => self.main_video_path.as_deref(),
            PathField::OutroVideoPath => self.outro_video_path.as_deref(),
            PathField::WelcomeVideoAvatarPath => self.welcome_video_avatar_path.as_deref(),
            PathField::HygenShortVideo => self.hygen_short_video.as_deref(),
        }
    }

    pub fn set_path(&mut self, field: PathField, value: Option<String>) {
        let slot = match field {
            PathField::AudioPath => &mut self.audio_path,
            PathField::WelcomeAudioPath => &mut self.welcome_audio_path,
            PathField::IntroVideoPath => &mut self.intro_video_path,
            PathField::BumperVideoPath => &mut self.bumper_video_path,
            PathField::ShortVideoPath => &mut self.short_video_path,
            PathField::MainVideoPath => &mut self.main_video_path,
            PathField::OutroVideoPath => &mut self.outro_video_path,
            PathField::WelcomeVideoAvatarPath => &mut self.welcome_video_avatar_path,
            PathField::HygenShortVideo => &mut self.hygen_short_video,
        };
        *slot = value;
    }

    /// Whether a live lease held by someone is still in force at `now`.
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        matches!(
            (self.lease_owner, self.lease_expires_at),
            (Some(_), Some(expires)) if expires > now
        )
    }
}
