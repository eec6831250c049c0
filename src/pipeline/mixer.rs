//! Conversation mixer.
//!
//! Turns are concatenated in order. Each overlap (a short interjection from
//! another speaker) ends `LEAD_MS` before the end of the track as it stands
//! when the overlap is placed, so it lands over the tail of the turn it
//! interrupts. Both sides are ducked over the shared span, the interjection is
//! faded in and out, and the two are summed. The track only ever grows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::audio::AudioTrack;
use crate::config::video::MixerSettings;
use crate::models::conversation::ConversationManifest;
use crate::services::ffmpeg::{Ffmpeg, MediaError};

pub const LEAD_MS: u64 = 500;
pub const BASE_DUCK_DB: f64 = 2.0;
pub const OVERLAY_DUCK_DB: f64 = 4.0;
pub const CROSSFADE_MS: u64 = 300;
pub const HEADROOM_DB: f64 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum MixError {
    #[error("Conversation clip not found: {}", .0.display())]
    MissingClip(PathBuf),

    #[error("Conversation has no turns")]
    Empty,

    #[error("Clip of speaker {0} does not match the mix layout")]
    Layout(String),

    #[error("Invalid conversation manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LoadedTurn {
    pub speaker: String,
    pub clip: AudioTrack,
    pub overlaps: Vec<LoadedOverlap>,
}

#[derive(Debug, Clone)]
pub struct LoadedOverlap {
    pub speaker: String,
    pub clip: AudioTrack,
}

/// Silence inserted between turns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pauses {
    pub same_speaker_ms: u64,
    pub speaker_change_ms: u64,
}

impl From<&MixerSettings> for Pauses {
    fn from(settings: &MixerSettings) -> Self {
        Self {
            same_speaker_ms: settings.same_speaker_pause_ms as u64,
            speaker_change_ms: settings.speaker_change_pause_ms as u64,
        }
    }
}

/// Where an overlap ended up, in frames of the output track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub turn: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
pub struct MixOutcome {
    pub track: AudioTrack,
    pub placements: Vec<Placement>,
    pub skipped: usize,
}

/// Start frame of an overlay ending `lead` frames before `track_frames`, clamped at zero.
pub fn overlap_start(track_frames: usize, overlay_frames: usize, lead_frames: usize) -> usize {
    track_frames
        .saturating_sub(overlay_frames)
        .saturating_sub(lead_frames)
}

/// Mix already decoded turns. All clips must share the layout of the first one.
pub fn mix_turns(turns: &[LoadedTurn], pauses: Pauses) -> Result<MixOutcome, MixError> {
    let first = turns.first().ok_or(MixError::Empty)?;
    let (rate, channels) = (first.clip.sample_rate(), first.clip.channels());
    let mut track = AudioTrack::new(rate, channels, Vec::new());
    let lead = track.ms_to_frames(LEAD_MS);
    let mut placements = Vec::new();
    let mut skipped = 0;

    for (index, turn) in turns.iter().enumerate() {
        if !turn.clip.same_layout(&track) {
            return Err(MixError::Layout(turn.speaker.clone()));
        }

        if index > 0 {
            let pause = if turns[index - 1].speaker == turn.speaker {
                pauses.same_speaker_ms
            } else {
                pauses.speaker_change_ms
            };
            track.append_silence_ms(pause);
        }
        track.append(&turn.clip);

        for overlap in &turn.overlaps {
            if overlap.speaker == turn.speaker {
                tracing::warn!(
                    speaker = %turn.speaker,
                    turn = index,
                    "Skipping overlap by the speaker of the turn itself"
                );
                skipped += 1;
                continue;
            }
            if !overlap.clip.same_layout(&track) {
                return Err(MixError::Layout(overlap.speaker.clone()));
            }

            let mut clip = overlap.clip.clone();
            clip.gain_db(-OVERLAY_DUCK_DB);
            if clip.duration_ms() > 2 * CROSSFADE_MS {
                clip.fade_in_ms(CROSSFADE_MS);
                clip.fade_out_ms(CROSSFADE_MS);
            }

            let start = overlap_start(track.frames(), clip.frames(), lead);
            let end = start + clip.frames();
            track.pad_to(end);
            track.gain_range_db(start, end, -BASE_DUCK_DB);
            track.overlay_at(&clip, start);

            placements.push(Placement {
                turn: index,
                start,
                end,
            });
        }
    }

    track.normalize_peak(HEADROOM_DB);

    Ok(MixOutcome {
        track,
        placements,
        skipped,
    })
}

/// Summary of a mixed conversation written to disk.
#[derive(Debug, Clone)]
pub struct MixReport {
    pub output: PathBuf,
    pub duration_ms: u64,
    pub overlaps: usize,
}

/// Loads clips with ffmpeg, mixes them and writes the result.
pub struct ConversationMixer {
    ffmpeg: Arc<Ffmpeg>,
}

impl ConversationMixer {
    pub fn new(ffmpeg: Arc<Ffmpeg>) -> Self {
        Self { ffmpeg }
    }

    pub async fn load_manifest(path: &Path) -> Result<ConversationManifest, MixError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let manifest: ConversationManifest = serde_json::from_str(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(manifest.resolve_against(base))
    }

    async fn load_clip(
        &self,
        path: &Path,
        settings: &MixerSettings,
    ) -> Result<AudioTrack, MixError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MixError::MissingClip(path.to_path_buf()));
        }
        let samples = self
            .ffmpeg
            .decode_pcm(path, settings.sample_rate, settings.channels)
            .await?;
        Ok(AudioTrack::new(settings.sample_rate, settings.channels, samples))
    }

    /// Mix the manifest at `manifest_path` into `output`.
    ///
    /// Any missing clip aborts the whole mix.
    pub async fn mix_manifest(
        &self,
        manifest_path: &Path,
        settings: &MixerSettings,
        output: &Path,
    ) -> Result<MixReport, MixError> {
        let manifest = Self::load_manifest(manifest_path).await?;

        let mut turns = Vec::with_capacity(manifest.turns.len());
        for turn in &manifest.turns {
            let mut overlaps = Vec::with_capacity(turn.overlaps.len());
            for overlap in &turn.overlaps {
                overlaps.push(LoadedOverlap {
                    speaker: overlap.speaker.clone(),
                    clip: self.load_clip(&overlap.clip, settings).await?,
                });
            }
            turns.push(LoadedTurn {
                speaker: turn.speaker.clone(),
                clip: self.load_clip(&turn.clip, settings).await?,
                overlaps,
            });
        }

        let outcome = mix_turns(&turns, Pauses::from(settings))?;
        let duration_ms = outcome.track.duration_ms();
        let overlaps = outcome.placements.len();

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.ffmpeg
            .encode_pcm(
                outcome.track.samples(),
                settings.sample_rate,
                settings.channels,
                output,
            )
            .await?;

        tracing::info!(
            output = %output.display(),
            turns = turns.len(),
            overlaps,
            skipped = outcome.skipped,
            duration_ms,
            "Conversation mixed"
        );

        Ok(MixReport {
            output: output.to_path_buf(),
            duration_ms,
            overlaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    fn clip(ms: u64, level: f32) -> AudioTrack {
        AudioTrack::new(RATE, 1, vec![level; ms as usize])
    }

    fn turn(speaker: &str, ms: u64, overlaps: Vec<(&str, u64)>) -> LoadedTurn {
        LoadedTurn {
            speaker: speaker.to_string(),
            clip: clip(ms, 0.5),
            overlaps: overlaps
                .into_iter()
                .map(|(s, len)| LoadedOverlap {
                    speaker: s.to_string(),
                    clip: clip(len, 0.5),
                })
                .collect(),
        }
    }

    #[test]
    fn test_overlap_start_clamps_at_zero() {
        assert_eq!(overlap_start(3000, 1000, 500), 1500);
        assert_eq!(overlap_start(800, 1000, 500), 0);
        assert_eq!(overlap_start(1200, 1000, 500), 0);
    }

    #[test]
    fn test_overlap_ends_half_a_second_before_turn_end() {
        let turns = vec![turn("ana", 4000, vec![("ben", 1000)])];
        let outcome = mix_turns(&turns, Pauses::default()).unwrap();

        assert_eq!(
            outcome.placements,
            vec![Placement {
                turn: 0,
                start: 2500,
                end: 3500
            }]
        );
        assert_eq!(outcome.track.frames(), 4000);
    }

    #[test]
    fn test_long_overlap_pads_instead_of_truncating() {
        let turns = vec![turn("ana", 600, vec![("ben", 2000)])];
        let outcome = mix_turns(&turns, Pauses::default()).unwrap();

        let placement = outcome.placements[0];
        assert_eq!(placement.start, 0);
        assert_eq!(placement.end, 2000);
        assert_eq!(outcome.track.frames(), 2000);
    }

    #[test]
    fn test_placements_stay_within_track() {
        let turns = vec![
            turn("ana", 3000, vec![("ben", 700), ("cleo", 400)]),
            turn("ben", 200, vec![("ana", 900)]),
            turn("ana", 1500, vec![]),
        ];
        let outcome = mix_turns(&turns, Pauses::default()).unwrap();

        let len = outcome.track.frames();
        for p in &outcome.placements {
            assert!(p.start <= len);
            assert!(p.end <= len);
        }
        let clips_total: usize = 3000 + 200 + 1500;
        assert!(len >= clips_total);
    }

    #[test]
    fn test_second_overlap_uses_current_track_length() {
        let turns = vec![turn("ana", 1000, vec![("ben", 1500), ("cleo", 300)])];
        let outcome = mix_turns(&turns, Pauses::default()).unwrap();

        // first overlap pads the track to 1500 frames
        assert_eq!(outcome.placements[0].start, 0);
        assert_eq!(outcome.placements[1].start, 1500 - 300 - 500);
    }

    #[test]
    fn test_pauses_depend_on_speaker_change() {
        let pauses = Pauses {
            same_speaker_ms: 300,
            speaker_change_ms: 800,
        };
        let turns = vec![
            turn("ana", 1000, vec![]),
            turn("ana", 1000, vec![]),
            turn("ben", 1000, vec![]),
        ];
        let outcome = mix_turns(&turns, pauses).unwrap();
        assert_eq!(outcome.track.duration_ms(), 3000 + 300 + 800);
    }

    #[test]
    fn test_self_overlap_is_skipped() {
        let turns = vec![turn("ana", 2000, vec![("ana", 500)])];
        let outcome = mix_turns(&turns, Pauses::default()).unwrap();
        assert!(outcome.placements.is_empty());
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_result_is_peak_normalized() {
        let turns = vec![turn("ana", 2000, vec![("ben", 1000)])];
        let outcome = mix_turns(&turns, Pauses::default()).unwrap();
        let peak = outcome.track.peak();
        assert!((peak - crate::pipeline::audio::db_to_gain(-HEADROOM_DB)).abs() < 1e-4);
    }

    #[test]
    fn test_empty_conversation_is_an_error() {
        assert!(matches!(mix_turns(&[], Pauses::default()), Err(MixError::Empty)));
    }

    #[tokio::test]
    async fn test_missing_clip_aborts_the_mix() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("conversation.json");
        std::fs::write(
            &manifest,
            r#"{"turns": [{"speaker": "ana", "clip": "missing.wav"}]}"#,
        )
        .unwrap();

        let mixer = ConversationMixer::new(Arc::new(Ffmpeg::default()));
        let err = mixer
            .mix_manifest(&manifest, &MixerSettings::default(), &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixError::MissingClip(p) if p.ends_with("missing.wav")));
    }
}
