//! Generates every enabled segment a job is still missing.
//!
//! Each segment is attempted on its own; a failure does not stop the others.
//! Paths are written to the store as soon as their file exists, so a rerun
//! only redoes what failed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::composer::{
    exists, AudioInput, LogoOverlay, SegmentComposer, SegmentRequest, SegmentText,
};
use super::mixer::ConversationMixer;
use super::paths::OutputLayout;
use super::render::RenderAdapter;
use super::short_video::{ShortRequest, ShortSpeaker, ShortVideoComposer};
use super::PipelineError;
use crate::config::video::{ConfigError, MainVideoStyle, SegmentSettings, VideoConfig};
use crate::db::store::JobStore;
use crate::models::job::{Job, PathField, VideoPathsRecord};
use crate::models::render::RenderRequest;
use crate::models::segment::SegmentKind;
use crate::services::ffmpeg::Ffmpeg;

#[async_trait]
pub trait SegmentStage: Send + Sync {
    /// Produce missing segments and return the record with the new paths set.
    async fn generate(
        &self,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<VideoPathsRecord, PipelineError>;
}

pub struct SegmentGenerator {
    store: Arc<dyn JobStore>,
    ffmpeg: Arc<Ffmpeg>,
    composer: SegmentComposer,
    shorts: ShortVideoComposer,
    mixer: ConversationMixer,
    render: Option<Arc<RenderAdapter>>,
    layout: OutputLayout,
}

/// Where the short segment's voice comes from.
#[derive(Debug, Clone, PartialEq)]
enum ShortVoice {
    /// Played whole.
    Welcome(PathBuf),
    /// The conversation audio, cut to the preview length.
    Preview(PathBuf),
}

impl ShortVoice {
    fn path(&self) -> &Path {
        match self {
            ShortVoice::Welcome(path) | ShortVoice::Preview(path) => path,
        }
    }

    fn into_path(self) -> PathBuf {
        match self {
            ShortVoice::Welcome(path) | ShortVoice::Preview(path) => path,
        }
    }

    /// Segment length for a voice track of `natural_secs`.
    fn segment_secs(&self, natural_secs: f64, preview_secs: f64) -> f64 {
        match self {
            ShortVoice::Welcome(_) => natural_secs,
            ShortVoice::Preview(_) => natural_secs.min(preview_secs),
        }
    }
}

fn text_of(settings: &SegmentSettings) -> SegmentText {
    SegmentText {
        title: settings.title.clone(),
        subtitle: settings.subtitle.clone(),
        footer: settings.footer.clone(),
    }
}

fn music_of(config: &VideoConfig) -> Option<AudioInput> {
    config.audio.music_path.as_ref().map(|path| AudioInput {
        path: path.clone(),
        volume: config.audio.music_volume,
    })
}

impl SegmentGenerator {
    pub fn new(
        store: Arc<dyn JobStore>,
        ffmpeg: Arc<Ffmpeg>,
        render: Option<Arc<RenderAdapter>>,
        layout: OutputLayout,
    ) -> Self {
        Self {
            store,
            composer: SegmentComposer::new(ffmpeg.clone()),
            shorts: ShortVideoComposer::new(ffmpeg.clone()),
            mixer: ConversationMixer::new(ffmpeg.clone()),
            ffmpeg,
            render,
            layout,
        }
    }

    async fn record_path(
        &self,
        record: &mut VideoPathsRecord,
        field: PathField,
        path: &Path,
    ) -> Result<(), PipelineError> {
        if !exists(path).await {
            return Err(PipelineError::MissingOutput(path.to_path_buf()));
        }
        let value = path.to_string_lossy();
        self.store.upsert_path(record.job_id, field, &value).await?;
        record.set_path(field, Some(value.into_owned()));
        Ok(())
    }

    async fn mix_conversation(
        &self,
        job: &Job,
        manifest: &Path,
        config: &VideoConfig,
    ) -> Result<PathBuf, PipelineError> {
        let output = self
            .layout
            .file_path(job, &format!("conversation_audio_{}.wav", job.job_id))
            .await?;
        let report = self
            .mixer
            .mix_manifest(manifest, &config.mixer, &output)
            .await?;
        Ok(report.output)
    }

    /// Returns `None` when the segment is handed to the avatar service and
    /// will arrive later.
    async fn generate_segment(
        &self,
        kind: SegmentKind,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<Option<PathBuf>, PipelineError> {
        match kind {
            SegmentKind::Short if config.heygen_short_video => {
                self.submit_render(job, config).await?;
                Ok(None)
            }
            SegmentKind::Short => self.compose_short(kind, job, record, config).await.map(Some),
            SegmentKind::Bumper if config.hygen_bumper => {
                self.compose_short(kind, job, record, config).await.map(Some)
            }
            _ => {
                let settings = config
                    .segment(kind)
                    .ok_or_else(|| ConfigError::Missing(format!("{kind} settings")))?;
                if let Some(fixed) = &settings.fixed_video_path {
                    if !exists(fixed).await {
                        return Err(PipelineError::MissingOutput(fixed.clone()));
                    }
                    tracing::info!(job_id = job.job_id, segment = %kind, "Using fixed clip");
                    return Ok(Some(fixed.clone()));
                }
                self.compose_standard(kind, settings, job, record, config)
                    .await
                    .map(Some)
            }
        }
    }

    async fn compose_standard(
        &self,
        kind: SegmentKind,
        settings: &SegmentSettings,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<PathBuf, PipelineError> {
        let conversation = match kind {
            SegmentKind::Main => {
                let audio = record.audio_path.as_deref().ok_or_else(|| {
                    ConfigError::Missing("audio_path for the main segment".to_string())
                })?;
                Some(PathBuf::from(audio))
            }
            _ => None,
        };
        let voiceover = conversation
            .clone()
            .or_else(|| settings.voiceover_path.clone())
            .map(|path| AudioInput {
                path,
                volume: config.audio.voiceover_volume,
            });

        // main runs as long as the conversation
        let duration_secs = match &conversation {
            Some(audio) => self.ffmpeg.probe_duration(audio).await?,
            None => settings.duration_secs,
        };

        let background = match (kind, config.main_video_style, &settings.images_dir) {
            (SegmentKind::Main, MainVideoStyle::Images, Some(dir)) => {
                self.composer.resolve_slideshow(kind, dir, duration_secs).await?
            }
            _ => {
                self.composer
                    .resolve_background(kind, settings, duration_secs)
                    .await?
            }
        };

        let request = SegmentRequest {
            kind,
            background,
            text: text_of(settings),
            logo: config.logo.as_ref().map(|logo| LogoOverlay {
                path: logo.path.clone(),
                width_px: logo.width_px,
                padding_px: logo.padding_px,
                corner: logo.corner,
            }),
            music: music_of(config),
            voiceover,
            duration_secs,
            output: self.layout.file_path(job, &kind.file_name(job.job_id)).await?,
        };
        Ok(self.composer.compose(&request, &config.output, &config.text).await?)
    }

    /// Voice for the short segment: the welcome audio when asked for and
    /// present, otherwise a preview cut from the conversation audio.
    async fn short_voice(
        &self,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Option<ShortVoice> {
        if config.short.use_welcome_audio {
            if let Some(welcome) = record.welcome_audio_path.as_deref().map(PathBuf::from) {
                if exists(&welcome).await {
                    return Some(ShortVoice::Welcome(welcome));
                }
                tracing::warn!(
                    job_id = record.job_id,
                    path = %welcome.display(),
                    "Welcome audio missing, using conversation audio"
                );
            }
        }
        record
            .audio_path
            .as_deref()
            .map(|path| ShortVoice::Preview(PathBuf::from(path)))
    }

    async fn compose_short(
        &self,
        kind: SegmentKind,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<PathBuf, PipelineError> {
        let short = &config.short;
        let background = short
            .background_path
            .clone()
            .ok_or_else(|| ConfigError::Missing("short.background_path".to_string()))?;

        let (voice, text, duration_secs) = if kind == SegmentKind::Bumper {
            (None, text_of(&config.bumper), config.bumper.duration_secs)
        } else {
            let voice = self
                .short_voice(record, config)
                .await
                .ok_or_else(|| ConfigError::Missing("audio for the short segment".to_string()))?;
            let natural_secs = self.shorts.voice_duration(voice.path()).await?;
            let duration_secs = voice.segment_secs(natural_secs, short.preview_secs);
            let voice = voice.into_path();
            let text = SegmentText {
                title: short.title.clone(),
                subtitle: short.subtitle.clone(),
                footer: short.footer.clone(),
            };
            let voice = AudioInput {
                path: voice,
                volume: config.audio.voiceover_volume,
            };
            (Some(voice), text, duration_secs)
        };

        let request = ShortRequest {
            kind,
            background,
            background_dim: short.background_dim,
            speakers: short
                .speakers
                .iter()
                .map(|s| ShortSpeaker {
                    name: s.name.clone(),
                    media: s.media_path.clone(),
                })
                .collect(),
            speaker_size: short.speaker_size,
            name_font_size: short.name_font_size,
            text,
            voice,
            music: music_of(config),
            duration_secs,
            fade_out_secs: short.fade_out_secs,
            mask: self.layout.work_dir(job).await?.join(format!("{kind}_mask.png")),
            output: self.layout.file_path(job, &kind.file_name(job.job_id)).await?,
        };
        Ok(self.shorts.compose(&request, &config.output, &config.text).await?)
    }

    async fn submit_render(&self, job: &Job, config: &VideoConfig) -> Result<(), PipelineError> {
        let render = self
            .render
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("HEYGEN_API_KEY for avatar rendering".to_string()))?;

        let existing = render.store().get_task(job.job_id).await?;
        if existing.as_ref().is_some_and(|task| !task.status.is_failure()) {
            return Ok(());
        }

        let heygen = &config.heygen;
        let script = heygen
            .script
            .clone()
            .ok_or_else(|| ConfigError::Missing("heygen.script".to_string()))?;
        let request = RenderRequest {
            avatar_id: heygen.avatar_id.clone(),
            voice_id: heygen.voice_id.clone(),
            input_text: script,
            speed: heygen.speed,
            width: heygen.width,
            height: heygen.height,
            background_asset_id: heygen.background_asset_id.clone(),
        };
        match existing {
            Some(_) => render.resubmit(job.job_id, &request).await?,
            None => render.submit(job.job_id, &request).await?,
        };
        Ok(())
    }
}

#[async_trait]
impl SegmentStage for SegmentGenerator {
    async fn generate(
        &self,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<VideoPathsRecord, PipelineError> {
        let mut record = record.clone();
        let mut failures = Vec::new();

        if record.audio_path.is_none() {
            if let Some(manifest) = &config.conversation_manifest {
                let mixed = self.mix_conversation(job, manifest, config).await;
                match mixed {
                    Ok(path) => {
                        let recorded =
                            self.record_path(&mut record, PathField::AudioPath, &path).await;
                        if let Err(e) = recorded {
                            failures.push(format!("audio: {e}"));
                        }
                    }
                    Err(e) => failures.push(format!("audio: {e}")),
                }
            }
        }

        for kind in SegmentKind::ASSEMBLY_ORDER {
            if !config.is_enabled(kind) || record.path(kind.path_field()).is_some() {
                continue;
            }

            let generated = self.generate_segment(kind, job, &record, config).await;
            let outcome = match generated {
                Ok(Some(path)) => self.record_path(&mut record, kind.path_field(), &path).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                tracing::error!(
                    job_id = job.job_id,
                    segment = %kind,
                    error = %e,
                    "Segment generation failed"
                );
                failures.push(format!("{kind}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(record)
        } else {
            Err(PipelineError::StageFailures(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn job(job_id: i64) -> Job {
        Job {
            job_id,
            topic: "Ownership".into(),
            profile_name: "weekly".into(),
            customer_id: "acme".into(),
            theme: None,
            created_at: Utc::now(),
        }
    }

    async fn setup(job_id: i64) -> (Arc<MemoryStore>, VideoPathsRecord) {
        let store = Arc::new(MemoryStore::new());
        store.insert_job(job(job_id)).await;
        let record = store.create_record(job_id, &json!({}), None, None).await.unwrap();
        (store, record)
    }

    #[tokio::test]
    async fn test_fixed_clips_are_recorded_without_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let intro = dir.path().join("intro.mp4");
        let outro = dir.path().join("outro.mp4");
        tokio::fs::write(&intro, b"clip").await.unwrap();
        tokio::fs::write(&outro, b"clip").await.unwrap();

        let (store, record) = setup(5).await;
        let config = VideoConfig::from_value(&json!({
            "intro_video": true,
            "outro_video": true,
            "intro": { "fixed_video_path": intro },
            "outro": { "fixed_video_path": outro },
        }))
        .unwrap();

        let generator = SegmentGenerator::new(
            store.clone(),
            Arc::new(Ffmpeg::default()),
            None,
            OutputLayout::new(dir.path()),
        );
        let updated = generator.generate(&job(5), &record, &config).await.unwrap();
        assert_eq!(updated.intro_video_path.as_deref(), Some(intro.to_str().unwrap()));

        let stored = store.get(5).await.unwrap().unwrap();
        assert_eq!(stored.outro_video_path.as_deref(), Some(outro.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_every_failed_segment_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outro = dir.path().join("outro.mp4");
        tokio::fs::write(&outro, b"clip").await.unwrap();

        let (store, record) = setup(6).await;
        let config = VideoConfig::from_value(&json!({
            "intro_video": true,
            "bumper_video": true,
            "outro_video": true,
            "intro": { "fixed_video_path": dir.path().join("gone.mp4") },
            "bumper": { "fixed_video_path": dir.path().join("also_gone.mp4") },
            "outro": { "fixed_video_path": outro },
        }))
        .unwrap();

        let generator = SegmentGenerator::new(
            store.clone(),
            Arc::new(Ffmpeg::default()),
            None,
            OutputLayout::new(dir.path()),
        );
        let err = generator.generate(&job(6), &record, &config).await.unwrap_err();
        match err {
            PipelineError::StageFailures(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("intro:"));
                assert!(failures[1].starts_with("bumper:"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        // the segment that worked is kept for the retry
        let stored = store.get(6).await.unwrap().unwrap();
        assert!(stored.outro_video_path.is_some());
    }

    #[tokio::test]
    async fn test_main_without_conversation_audio_fails() {
        let dir = tempfile::tempdir().unwrap();
        let background = dir.path().join("bg.png");
        image::GrayImage::new(4, 4).save(&background).unwrap();

        let (store, record) = setup(8).await;
        let config = VideoConfig::from_value(&json!({
            "main_video": true,
            "main": { "background_image_path": background },
        }))
        .unwrap();

        let generator = SegmentGenerator::new(
            store.clone(),
            Arc::new(Ffmpeg::default()),
            None,
            OutputLayout::new(dir.path()),
        );
        let err = generator.generate(&job(8), &record, &config).await.unwrap_err();
        match err {
            PipelineError::StageFailures(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("main:"));
                assert!(failures[0].contains("audio_path for the main segment"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(store.get(8).await.unwrap().unwrap().main_video_path.is_none());
    }

    #[test]
    fn test_conversation_fallback_is_cut_to_preview() {
        let preview = ShortVoice::Preview("/o/conversation.wav".into());
        assert_eq!(preview.segment_secs(42.3, 10.0), 10.0);
        assert_eq!(preview.segment_secs(6.5, 10.0), 6.5);

        let welcome = ShortVoice::Welcome("/o/welcome.wav".into());
        assert_eq!(welcome.segment_secs(42.3, 10.0), 42.3);
    }

    #[tokio::test]
    async fn test_short_prefers_welcome_audio_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let welcome = dir.path().join("welcome.wav");
        tokio::fs::write(&welcome, b"wav").await.unwrap();

        let (store, mut record) = setup(9).await;
        record.audio_path = Some("/o/conversation.wav".to_string());
        let generator = SegmentGenerator::new(
            store,
            Arc::new(Ffmpeg::default()),
            None,
            OutputLayout::new(dir.path()),
        );

        let mut config = VideoConfig::default();
        config.short.use_welcome_audio = true;
        // welcome audio not recorded yet
        assert_eq!(
            generator.short_voice(&record, &config).await,
            Some(ShortVoice::Preview("/o/conversation.wav".into()))
        );

        record.welcome_audio_path = Some(welcome.to_string_lossy().into_owned());
        assert_eq!(
            generator.short_voice(&record, &config).await,
            Some(ShortVoice::Welcome(welcome))
        );
    }

    #[tokio::test]
    async fn test_avatar_short_without_client_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (store, record) = setup(7).await;
        let config = VideoConfig::from_value(&json!({
            "heygen_short_video": true,
            "heygen": { "script": "Welcome back" },
        }))
        .unwrap();

        let generator = SegmentGenerator::new(
            store,
            Arc::new(Ffmpeg::default()),
            None,
            OutputLayout::new(dir.path()),
        );
        let err = generator.generate(&job(7), &record, &config).await.unwrap_err();
        assert!(err.to_string().contains("short: "));
    }
}
