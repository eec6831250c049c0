//! Final assembly: every generated segment in fixed order, joined with
//! crossfades and encoded once.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::composer::{encode_args, exists, secs, Inputs};
use super::paths::OutputLayout;
use crate::config::video::{OutputSettings, VideoConfig};
use crate::models::job::{Job, VideoPathsRecord};
use crate::models::segment::SegmentKind;
use crate::services::ffmpeg::{Ffmpeg, MediaError};

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("No segment files to assemble")]
    NoSegments,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Assemble: Send + Sync {
    /// Join the record's segments into one file and return its path.
    async fn assemble(
        &self,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<PathBuf, AssembleError>;
}

/// Segment paths set on the record, in assembly order.
pub fn ordered_segments(record: &VideoPathsRecord) -> Vec<(SegmentKind, PathBuf)> {
    SegmentKind::ASSEMBLY_ORDER
        .iter()
        .filter_map(|kind| {
            record
                .path(kind.path_field())
                .filter(|p| !p.is_empty())
                .map(|p| (*kind, PathBuf::from(p)))
        })
        .collect()
}

/// Ordered segments whose files are present on disk.
pub async fn resolvable_segments(record: &VideoPathsRecord) -> Vec<(SegmentKind, PathBuf)> {
    let mut found = Vec::new();
    for (kind, path) in ordered_segments(record) {
        if exists(&path).await {
            found.push((kind, path));
        } else {
            tracing::warn!(
                job_id = record.job_id,
                segment = %kind,
                path = %path.display(),
                "Segment file missing, skipping"
            );
        }
    }
    found
}

/// Where each crossfade starts and how long the result is.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    /// One per join; never longer than either clip it joins.
    pub transitions: Vec<f64>,
    /// Start of each transition on the output timeline.
    pub offsets: Vec<f64>,
    pub total_secs: f64,
}

pub fn plan_timeline(durations: &[f64], transition_secs: f64) -> Timeline {
    let mut transitions = Vec::new();
    let mut offsets = Vec::new();
    let mut elapsed = durations.first().copied().unwrap_or(0.0);

    for pair in durations.windows(2) {
        let t = transition_secs.min(pair[0]).min(pair[1]).max(0.0);
        offsets.push(elapsed - t);
        transitions.push(t);
        elapsed += pair[1] - t;
    }

    Timeline {
        transitions,
        offsets,
        total_secs: elapsed,
    }
}

/// Probed facts about one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

pub fn build_assembly_args(
    clips: &[ClipInfo],
    transition_secs: f64,
    output: &OutputSettings,
    path: &Path,
) -> Vec<OsString> {
    let (w, h) = (output.width, output.height);
    let mut inputs = Inputs::default();
    let mut graph = Vec::new();

    for (n, clip) in clips.iter().enumerate() {
        let i = inputs.push(&[], &clip.path);
        let d = secs(clip.duration_secs);

        let mut video = Vec::new();
        if (clip.width, clip.height) != (w, h) {
            video.push(format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
            ));
        }
        video.push("setsar=1".to_string());
        video.push(format!("fps={}", output.fps));
        video.push(format!("trim=duration={d}"));
        video.push("setpts=PTS-STARTPTS".to_string());
        video.push("format=yuv420p".to_string());
        graph.push(format!("[{i}:v]{}[v{n}]", video.join(",")));

        let audio_in = if clip.has_audio {
            format!("[{i}:a]")
        } else {
            let silent = inputs.push_lavfi("anullsrc=r=44100:cl=stereo", clip.duration_secs);
            format!("[{silent}:a]")
        };
        graph.push(format!(
            "{audio_in}aformat=sample_rates=44100:channel_layouts=stereo,apad=whole_dur={d},atrim=0:{d},asetpts=PTS-STARTPTS[a{n}]"
        ));
    }

    let durations: Vec<f64> = clips.iter().map(|c| c.duration_secs).collect();
    let timeline = plan_timeline(&durations, transition_secs);

    if clips.len() == 1 {
        graph.push("[v0]null[vout]".to_string());
        graph.push("[a0]anull[aout]".to_string());
    } else if timeline.transitions.iter().all(|t| *t <= 0.0) {
        let labels: String = (0..clips.len()).map(|n| format!("[v{n}][a{n}]")).collect();
        graph.push(format!("{labels}concat=n={}:v=1:a=1[vout][aout]", clips.len()));
    } else {
        let last = clips.len() - 1;
        let mut video = "[v0]".to_string();
        let mut audio = "[a0]".to_string();
        for (j, (t, offset)) in timeline.transitions.iter().zip(&timeline.offsets).enumerate() {
            let n = j + 1;
            let (vout, aout) = if n == last {
                ("[vout]".to_string(), "[aout]".to_string())
            } else {
                (format!("[vx{n}]"), format!("[ax{n}]"))
            };
            graph.push(format!(
                "{video}[v{n}]xfade=transition=fade:duration={}:offset={}{vout}",
                secs(*t),
                secs(*offset)
            ));
            graph.push(format!("{audio}[a{n}]acrossfade=d={}:c1=tri:c2=tri{aout}", secs(*t)));
            video = vout;
            audio = aout;
        }
    }

    let mut args = inputs.into_args();
    let mut encode = encode_args(&graph, timeline.total_secs, output, path);
    // the temporary name has no extension ffmpeg can infer a muxer from
    let target = encode.pop();
    encode.extend([OsString::from("-f"), OsString::from("mp4")]);
    encode.extend(target);
    args.extend(encode);
    args
}

pub fn final_file_name(job_id: i64) -> String {
    format!("final_video_{job_id}.mp4")
}

pub struct FfmpegAssembler {
    ffmpeg: Arc<Ffmpeg>,
    layout: OutputLayout,
}

impl FfmpegAssembler {
    pub fn new(ffmpeg: Arc<Ffmpeg>, layout: OutputLayout) -> Self {
        Self { ffmpeg, layout }
    }

    async fn probe(&self, path: &Path) -> Result<ClipInfo, MediaError> {
        let duration_secs = self.ffmpeg.probe_duration(path).await?;
        let (width, height) = self.ffmpeg.probe_dimensions(path).await?;
        let has_audio = self.ffmpeg.has_audio(path).await?;
        Ok(ClipInfo {
            path: path.to_path_buf(),
            duration_secs,
            width,
            height,
            has_audio,
        })
    }
}

#[async_trait]
impl Assemble for FfmpegAssembler {
    async fn assemble(
        &self,
        job: &Job,
        record: &VideoPathsRecord,
        config: &VideoConfig,
    ) -> Result<PathBuf, AssembleError> {
        let segments = resolvable_segments(record).await;
        if segments.is_empty() {
            return Err(AssembleError::NoSegments);
        }

        let mut clips = Vec::with_capacity(segments.len());
        for (_, path) in &segments {
            clips.push(self.probe(path).await?);
        }

        let final_path = self.layout.file_path(job, &final_file_name(job.job_id)).await?;
        let mut partial = final_path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let args = build_assembly_args(&clips, config.transition_secs, &config.output, &partial);
        if let Err(e) = self.ffmpeg.run(&args).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&partial, &final_path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        let order: Vec<String> = segments.iter().map(|(k, _)| k.to_string()).collect();
        tracing::info!(
            job_id = job.job_id,
            segments = %order.join(","),
            output = %final_path.display(),
            "Final video assembled"
        );
        Ok(final_path)
    }
}
