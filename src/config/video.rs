//! Per-job video configuration.
//!
//! Stored as JSON on the job's video record and parsed into these typed
//! settings before any stage runs. Parsing validates ranges with `garde` and
//! checks that every enabled segment has something to render from.

use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::segment::SegmentKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("video config is not valid JSON for this schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("video config failed validation: {0}")]
    Invalid(#[from] garde::Report),

    #[error("video config is missing {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainVideoStyle {
    #[default]
    Video,
    Images,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VideoConfig {
    #[garde(dive)]
    pub output: OutputSettings,

    #[garde(skip)]
    pub intro_video: bool,
    #[garde(skip)]
    pub bumper_video: bool,
    #[garde(skip)]
    pub short_video: bool,
    #[garde(skip)]
    pub main_video: bool,
    #[garde(skip)]
    pub outro_video: bool,

    /// Render the short segment through the external avatar service.
    #[garde(skip)]
    pub heygen_short_video: bool,

    /// Build the bumper with the circular-overlay composer, music only.
    #[garde(skip)]
    pub hygen_bumper: bool,

    /// Crossfade between consecutive segments, in seconds.
    #[garde(range(min = 0.0, max = 5.0))]
    pub transition_secs: f64,

    #[garde(skip)]
    pub main_video_style: MainVideoStyle,

    #[garde(dive)]
    pub text: TextSettings,

    #[garde(dive)]
    pub logo: Option<LogoSettings>,

    #[garde(dive)]
    pub audio: AudioSettings,

    #[garde(dive)]
    pub intro: SegmentSettings,
    #[garde(dive)]
    pub bumper: SegmentSettings,
    #[garde(dive)]
    pub main: SegmentSettings,
    #[garde(dive)]
    pub outro: SegmentSettings,

    #[garde(dive)]
    pub short: ShortSettings,

    #[garde(dive)]
    pub heygen: HeygenSettings,

    #[garde(dive)]
    pub mixer: MixerSettings,

    /// JSON manifest of conversation turns to mix into the main audio.
    #[garde(skip)]
    pub conversation_manifest: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output: OutputSettings::default(),
            intro_video: false,
            bumper_video: false,
            short_video: false,
            main_video: false,
            outro_video: false,
            heygen_short_video: false,
            hygen_bumper: false,
            transition_secs: 1.0,
            main_video_style: MainVideoStyle::Video,
            text: TextSettings::default(),
            logo: None,
            audio: AudioSettings::default(),
            intro: SegmentSettings::default(),
            bumper: SegmentSettings {
                duration_secs: 10.0,
                ..SegmentSettings::default()
            },
            main: SegmentSettings::default(),
            outro: SegmentSettings::default(),
            short: ShortSettings::default(),
            heygen: HeygenSettings::default(),
            mixer: MixerSettings::default(),
            conversation_manifest: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OutputSettings {
    #[garde(range(min = 16, max = 7680))]
    pub width: u32,
    #[garde(range(min = 16, max = 4320))]
    pub height: u32,
    #[garde(range(min = 1, max = 120))]
    pub fps: u32,
    #[garde(length(min = 1, max = 32))]
    pub video_codec: String,
    #[garde(length(min = 1, max = 32))]
    pub audio_codec: String,
    #[garde(length(min = 1, max = 16))]
    pub video_bitrate: String,
    #[garde(length(min = 1, max = 16))]
    pub audio_bitrate: String,
    #[garde(length(min = 1, max = 16))]
    pub preset: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            video_bitrate: "8000k".to_string(),
            audio_bitrate: "128k".to_string(),
            preset: "medium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TextSettings {
    #[garde(skip)]
    pub font_file: Option<PathBuf>,
    #[garde(length(min = 1, max = 32))]
    pub font_color: String,
    #[garde(range(min = 8, max = 300))]
    pub title_font_size: u32,
    #[garde(range(min = 8, max = 300))]
    pub subtitle_font_size: u32,
    #[garde(range(min = 8, max = 200))]
    pub footer_font_size: u32,
    /// Gap between the title's baseline box and the subtitle.
    #[garde(range(max = 400))]
    pub title_spacing_px: u32,
    #[garde(range(min = 10, max = 400))]
    pub footer_band_height: u32,
    #[garde(range(min = 0.0, max = 1.0))]
    pub footer_band_opacity: f64,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            font_file: None,
            font_color: "white".to_string(),
            title_font_size: 70,
            subtitle_font_size: 40,
            footer_font_size: 30,
            title_spacing_px: 30,
            footer_band_height: 60,
            footer_band_opacity: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LogoSettings {
    #[garde(skip)]
    pub path: PathBuf,
    #[serde(default = "default_logo_width")]
    #[garde(range(min = 16, max = 1024))]
    pub width_px: u32,
    #[serde(default = "default_logo_padding")]
    #[garde(range(max = 400))]
    pub padding_px: u32,
    #[serde(default)]
    #[garde(skip)]
    pub corner: Corner,
}

fn default_logo_width() -> u32 {
    120
}

fn default_logo_padding() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AudioSettings {
    #[garde(skip)]
    pub music_path: Option<PathBuf>,
    #[garde(range(min = 0.0, max = 1.0))]
    pub music_volume: f64,
    #[garde(range(min = 0.0, max = 2.0))]
    pub voiceover_volume: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            music_path: None,
            music_volume: 0.1,
            voiceover_volume: 1.0,
        }
    }
}

/// Background, text and timing of one composed segment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SegmentSettings {
    #[garde(range(min = 0.5, max = 3600.0))]
    pub duration_secs: f64,
    #[garde(length(max = 200))]
    pub title: Option<String>,
    #[garde(length(max = 200))]
    pub subtitle: Option<String>,
    #[garde(length(max = 300))]
    pub footer: Option<String>,
    #[garde(skip)]
    pub background_video_dir: Option<PathBuf>,
    #[garde(skip)]
    pub background_video_path: Option<PathBuf>,
    #[garde(skip)]
    pub background_image_path: Option<PathBuf>,
    /// Directory of stills for the `images` main style.
    #[garde(skip)]
    pub images_dir: Option<PathBuf>,
    /// Pre-rendered clip used as-is instead of composing.
    #[garde(skip)]
    pub fixed_video_path: Option<PathBuf>,
    /// Voiceover mixed over the music bed.
    #[garde(skip)]
    pub voiceover_path: Option<PathBuf>,
    /// Pick a random subclip of a long background instead of the centred one.
    #[garde(skip)]
    pub random_subclip: bool,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            title: None,
            subtitle: None,
            footer: None,
            background_video_dir: None,
            background_video_path: None,
            background_image_path: None,
            images_dir: None,
            fixed_video_path: None,
            voiceover_path: None,
            random_subclip: true,
        }
    }
}

impl SegmentSettings {
    pub fn has_background(&self) -> bool {
        self.background_video_dir.is_some()
            || self.background_video_path.is_some()
            || self.background_image_path.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SpeakerSettings {
    #[garde(length(min = 1, max = 80))]
    pub name: String,
    /// Portrait image or looping video shown inside the circle.
    #[garde(skip)]
    pub media_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShortSettings {
    #[garde(skip)]
    pub background_path: Option<PathBuf>,
    #[garde(length(max = 2), dive)]
    pub speakers: Vec<SpeakerSettings>,
    /// Circle diameter in pixels; derived from the frame when unset.
    #[garde(range(min = 32, max = 2048))]
    pub speaker_size: Option<u32>,
    #[garde(skip)]
    pub use_welcome_audio: bool,
    /// Length of the conversation excerpt used when there is no welcome audio.
    #[garde(range(min = 1.0, max = 120.0))]
    pub preview_secs: f64,
    #[garde(range(min = 0.0, max = 10.0))]
    pub fade_out_secs: f64,
    #[garde(range(min = 0.0, max = 1.0))]
    pub background_dim: f64,
    #[garde(length(max = 200))]
    pub title: Option<String>,
    #[garde(length(max = 200))]
    pub subtitle: Option<String>,
    #[garde(length(max = 300))]
    pub footer: Option<String>,
    #[garde(range(min = 8, max = 200))]
    pub name_font_size: u32,
}

impl Default for ShortSettings {
    fn default() -> Self {
        Self {
            background_path: None,
            speakers: Vec::new(),
            speaker_size: None,
            use_welcome_audio: false,
            preview_secs: 10.0,
            fade_out_secs: 1.5,
            background_dim: 0.5,
            title: None,
            subtitle: None,
            footer: None,
            name_font_size: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HeygenSettings {
    #[garde(length(min = 1, max = 128))]
    pub avatar_id: String,
    #[garde(length(min = 1, max = 128))]
    pub voice_id: String,
    #[garde(range(min = 0.5, max = 1.5))]
    pub speed: f64,
    #[garde(range(min = 16, max = 3840))]
    pub width: u32,
    #[garde(range(min = 16, max = 3840))]
    pub height: u32,
    #[garde(length(min = 1, max = 128))]
    pub background_asset_id: Option<String>,
    /// Text the avatar speaks.
    #[garde(length(min = 1, max = 5000))]
    pub script: Option<String>,
}

impl Default for HeygenSettings {
    fn default() -> Self {
        Self {
            avatar_id: "Judith_expressive_2024120201".to_string(),
            voice_id: "c4be407b9d94405a9eb403190d77c851".to_string(),
            speed: 1.1,
            width: 1280,
            height: 720,
            background_asset_id: None,
            script: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MixerSettings {
    #[garde(range(min = 8000, max = 96000))]
    pub sample_rate: u32,
    #[garde(range(min = 1, max = 2))]
    pub channels: u16,
    /// Silence between consecutive turns of the same speaker.
    #[garde(range(max = 5000))]
    pub same_speaker_pause_ms: u32,
    /// Silence when the speaker changes.
    #[garde(range(max = 5000))]
    pub speaker_change_pause_ms: u32,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            same_speaker_pause_ms: 300,
            speaker_change_pause_ms: 800,
        }
    }
}

impl VideoConfig {
    /// Parse and validate the JSON blob stored on a video record.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let config: VideoConfig = serde_json::from_value(value.clone())?;
        config.validate()?;
        config.check_sources()?;
        Ok(config)
    }

    pub fn is_enabled(&self, kind: SegmentKind) -> bool {
        match kind {
            SegmentKind::Intro => self.intro_video,
            SegmentKind::Short => self.short_video || self.heygen_short_video,
            SegmentKind::Bumper => self.bumper_video,
            SegmentKind::Main => self.main_video,
            SegmentKind::Outro => self.outro_video,
        }
    }

    /// Settings of a composed segment. The short segment has its own block.
    pub fn segment(&self, kind: SegmentKind) -> Option<&SegmentSettings> {
        match kind {
            SegmentKind::Intro => Some(&self.intro),
            SegmentKind::Bumper => Some(&self.bumper),
            SegmentKind::Main => Some(&self.main),
            SegmentKind::Outro => Some(&self.outro),
            SegmentKind::Short => None,
        }
    }

    fn check_sources(&self) -> Result<(), ConfigError> {
        for kind in [SegmentKind::Intro, SegmentKind::Outro] {
            if self.is_enabled(kind) {
                self.require_background(kind)?;
            }
        }

        if self.bumper_video {
            if self.hygen_bumper {
                if self.short.background_path.is_none() {
                    return Err(ConfigError::Missing("short.background_path".to_string()));
                }
            } else {
                self.require_background(SegmentKind::Bumper)?;
            }
        }

        if self.main_video && self.main.fixed_video_path.is_none() {
            match self.main_video_style {
                MainVideoStyle::Video => {
                    if !self.main.has_background() {
                        return Err(ConfigError::Missing("main background".to_string()));
                    }
                }
                MainVideoStyle::Images => {
                    if self.main.images_dir.is_none() {
                        return Err(ConfigError::Missing("main.images_dir".to_string()));
                    }
                }
            }
        }

        if self.heygen_short_video {
            if self.heygen.script.is_none() {
                return Err(ConfigError::Missing("heygen.script".to_string()));
            }
        } else if self.short_video && self.short.background_path.is_none() {
            return Err(ConfigError::Missing("short.background_path".to_string()));
        }

        Ok(())
    }

    fn require_background(&self, kind: SegmentKind) -> Result<(), ConfigError> {
        match self.segment(kind) {
            Some(settings) if settings.fixed_video_path.is_some() || settings.has_background() => {
                Ok(())
            }
            _ => Err(ConfigError::Missing(format!("{} background", kind))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_blob_uses_defaults() {
        let config = VideoConfig::from_value(&json!({})).unwrap();
        assert_eq!(config.output.width, 1920);
        assert_eq!(config.transition_secs, 1.0);
        assert_eq!(config.bumper.duration_secs, 10.0);
        assert_eq!(config.mixer.speaker_change_pause_ms, 800);
        assert!(!config.is_enabled(SegmentKind::Intro));
    }

    #[test]
    fn test_enabled_intro_without_background_is_rejected() {
        let err = VideoConfig::from_value(&json!({"intro_video": true})).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref m) if m.contains("intro")));
    }

    #[test]
    fn test_fixed_clip_satisfies_background() {
        let config = VideoConfig::from_value(&json!({
            "outro_video": true,
            "outro": {"fixed_video_path": "/media/outro.mp4"}
        }))
        .unwrap();
        assert!(config.is_enabled(SegmentKind::Outro));
    }

    #[test]
    fn test_out_of_range_volume_is_invalid() {
        let err = VideoConfig::from_value(&json!({"audio": {"music_volume": 3.5}})).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_three_speakers_rejected() {
        let speaker = json!({"name": "A", "media_path": "/a.png"});
        let err = VideoConfig::from_value(&json!({
            "short": {"speakers": [speaker.clone(), speaker.clone(), speaker]}
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_heygen_requires_script() {
        let err = VideoConfig::from_value(&json!({"heygen_short_video": true})).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref m) if m == "heygen.script"));

        let config = VideoConfig::from_value(&json!({
            "heygen_short_video": true,
            "heygen": {"script": "Welcome to the show"}
        }))
        .unwrap();
        assert!(config.is_enabled(SegmentKind::Short));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = VideoConfig::from_value(&json!({"transition_secs": "one"})).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
