//! Short segment with speakers shown in circles over a dimmed background.

use image::{GrayImage, Luma};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::composer::{
    audio_graph, drawtext, encode_args, exists, is_image, scale_crop, secs, text_filters,
    AudioInput, ComposeError, Inputs, SegmentText,
};
use crate::config::video::{OutputSettings, TextSettings};
use crate::models::segment::SegmentKind;
use crate::services::ffmpeg::Ffmpeg;

/// Circle centres sit this far down the frame.
const SPEAKER_Y_RATIO: f64 = 0.4;
const NAME_BOX_GAP: u32 = 5;
const NAME_BOX_HEIGHT: u32 = 50;
const NAME_BOX_OPACITY: f64 = 0.7;

/// Top-left corner and diameter of one speaker circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakerSlot {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

pub fn default_speaker_size(width: u32, height: u32) -> u32 {
    (width / 4).min(height / 3)
}

/// One speaker is centred; two sit symmetrically either side of the centre.
pub fn speaker_layout(width: u32, height: u32, size: Option<u32>, count: usize) -> Vec<SpeakerSlot> {
    let size = size.unwrap_or_else(|| default_speaker_size(width, height));
    let y = (height as f64 * SPEAKER_Y_RATIO).round() as u32;
    let center = width as f64 / 2.0;

    match count {
        0 => Vec::new(),
        1 => vec![SpeakerSlot {
            x: ((width.saturating_sub(size)) as f64 / 2.0).round() as u32,
            y,
            size,
        }],
        _ => {
            let spacing = size as f64 * 1.5;
            let left = (center - spacing).max(0.0).round() as u32;
            let right = (center + spacing - size as f64).max(0.0).round() as u32;
            vec![
                SpeakerSlot { x: left, y, size },
                SpeakerSlot { x: right, y, size },
            ]
        }
    }
}

/// Write a `size`x`size` grayscale mask: white disc on black.
pub fn write_circle_mask(path: &Path, size: u32) -> Result<(), image::ImageError> {
    let radius = size as f32 / 2.0;
    let mask = GrayImage::from_fn(size, size, |x, y| {
        let dx = x as f32 + 0.5 - radius;
        let dy = y as f32 + 0.5 - radius;
        let distance = (dx * dx + dy * dy).sqrt();
        // one pixel of soft edge
        let coverage = (radius - distance + 0.5).clamp(0.0, 1.0);
        Luma([(coverage * 255.0).round() as u8])
    });
    mask.save(path)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortSpeaker {
    pub name: String,
    pub media: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ShortRequest {
    pub kind: SegmentKind,
    /// Image or video, looped for the whole segment.
    pub background: PathBuf,
    pub background_dim: f64,
    pub speakers: Vec<ShortSpeaker>,
    pub speaker_size: Option<u32>,
    pub name_font_size: u32,
    pub text: SegmentText,
    pub voice: Option<AudioInput>,
    pub music: Option<AudioInput>,
    pub duration_secs: f64,
    pub fade_out_secs: f64,
    pub mask: PathBuf,
    pub output: PathBuf,
}

fn loop_options(path: &Path) -> Vec<String> {
    if is_image(path) {
        vec!["-loop".into(), "1".into()]
    } else {
        vec!["-stream_loop".into(), "-1".into()]
    }
}

pub fn build_short_args(
    request: &ShortRequest,
    output: &OutputSettings,
    style: &TextSettings,
) -> Vec<OsString> {
    let mut inputs = Inputs::default();
    let mut graph = Vec::new();
    let fit = scale_crop(output.width, output.height, output.fps);

    let bg = inputs.push(&loop_options(&request.background), &request.background);
    graph.push(format!(
        "[{bg}:v]{fit},drawbox=x=0:y=0:w=iw:h=ih:color=black@{:.2}:t=fill[bg]",
        request.background_dim
    ));

    let slots = speaker_layout(
        output.width,
        output.height,
        request.speaker_size,
        request.speakers.len(),
    );
    let mut current = "[bg]".to_string();
    let mut overlays = Vec::new();

    if !slots.is_empty() {
        let mask = inputs.push(&["-loop".into(), "1".into()], &request.mask);
        let splits: String = (0..slots.len()).map(|n| format!("[m{n}]")).collect();
        graph.push(format!(
            "[{mask}:v]format=gray,fps={},split={}{splits}",
            output.fps,
            slots.len()
        ));

        for (n, (speaker, slot)) in request.speakers.iter().zip(&slots).enumerate() {
            let i = inputs.push(&loop_options(&speaker.media), &speaker.media);
            let s = slot.size;
            graph.push(format!(
                "[{i}:v]scale={s}:{s}:force_original_aspect_ratio=increase,crop={s}:{s},fps={},format=rgba[raw{n}]",
                output.fps
            ));
            graph.push(format!("[raw{n}][m{n}]alphamerge[c{n}]"));
            graph.push(format!(
                "{current}[c{n}]overlay=x={}:y={}:shortest=0[o{n}]",
                slot.x, slot.y
            ));
            current = format!("[o{n}]");

            let box_y = slot.y + s + NAME_BOX_GAP;
            overlays.push(format!(
                "drawbox=x={}:y={box_y}:w={s}:h={NAME_BOX_HEIGHT}:color=black@{NAME_BOX_OPACITY:.2}:t=fill",
                slot.x
            ));
            overlays.push(drawtext(
                &speaker.name,
                request.name_font_size,
                &format!("{}+({s}-text_w)/2", slot.x),
                &format!("{box_y}+({NAME_BOX_HEIGHT}-text_h)/2"),
                style,
            ));
        }
    }

    let mut filters = text_filters(&request.text, output.height, style);
    filters.extend(overlays);
    let fade_start = (request.duration_secs - request.fade_out_secs).max(0.0);
    if request.fade_out_secs > 0.0 {
        filters.push(format!(
            "fade=t=out:st={}:d={}",
            secs(fade_start),
            secs(request.fade_out_secs)
        ));
    }
    filters.push("format=yuv420p".to_string());
    graph.push(format!("{current}{}[vout]", filters.join(",")));

    audio_graph(
        request.music.as_ref(),
        request.voice.as_ref(),
        request.duration_secs,
        "apre",
        &mut inputs,
        &mut graph,
    );
    if request.fade_out_secs > 0.0 {
        graph.push(format!(
            "[apre]afade=t=out:st={}:d={}[aout]",
            secs(fade_start),
            secs(request.fade_out_secs)
        ));
    } else {
        graph.push("[apre]anull[aout]".to_string());
    }

    let mut args = inputs.into_args();
    args.extend(encode_args(&graph, request.duration_secs, output, &request.output));
    args
}

/// Renders circular-overlay segments.
pub struct ShortVideoComposer {
    ffmpeg: Arc<Ffmpeg>,
}

impl ShortVideoComposer {
    pub fn new(ffmpeg: Arc<Ffmpeg>) -> Self {
        Self { ffmpeg }
    }

    /// Natural length of the voice track, which is the segment's duration.
    pub async fn voice_duration(&self, voice: &Path) -> Result<f64, ComposeError> {
        Ok(self.ffmpeg.probe_duration(voice).await?)
    }

    pub async fn compose(
        &self,
        request: &ShortRequest,
        output: &OutputSettings,
        style: &TextSettings,
    ) -> Result<PathBuf, ComposeError> {
        let mut assets = vec![request.background.clone()];
        assets.extend(request.speakers.iter().map(|s| s.media.clone()));
        assets.extend(request.voice.iter().map(|a| a.path.clone()));
        assets.extend(request.music.iter().map(|a| a.path.clone()));
        for asset in assets {
            if !exists(&asset).await {
                return Err(ComposeError::MissingAsset(asset));
            }
        }

        if let Some(slot) = speaker_layout(
            output.width,
            output.height,
            request.speaker_size,
            request.speakers.len(),
        )
        .first()
        {
            if let Some(parent) = request.mask.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let (mask, size) = (request.mask.clone(), slot.size);
            tokio::task::spawn_blocking(move || write_circle_mask(&mask, size))
                .await
                .map_err(std::io::Error::other)??;
        }
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_short_args(request, output, style);
        if let Err(e) = self.ffmpeg.run(&args).await {
            let _ = tokio::fs::remove_file(&request.output).await;
            return Err(e.into());
        }

        tracing::info!(
            segment = %request.kind,
            speakers = request.speakers.len(),
            duration_secs = request.duration_secs,
            output = %request.output.display(),
            "Circular-overlay segment composed"
        );
        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(duration_secs: f64) -> ShortRequest {
        ShortRequest {
            kind: SegmentKind::Short,
            background: "/media/bg.jpg".into(),
            background_dim: 0.5,
            speakers: vec![
                ShortSpeaker {
                    name: "Ana".into(),
                    media: "/media/ana.png".into(),
                },
                ShortSpeaker {
                    name: "Ben".into(),
                    media: "/media/ben.mp4".into(),
                },
            ],
            speaker_size: None,
            name_font_size: 30,
            text: SegmentText {
                title: Some("Coming up".into()),
                ..SegmentText::default()
            },
            voice: Some(AudioInput {
                path: "/media/welcome.wav".into(),
                volume: 1.0,
            }),
            music: None,
            duration_secs,
            fade_out_secs: 1.5,
            mask: "/work/mask.png".into(),
            output: "/out/short.mp4".into(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn test_two_speakers_are_symmetric_about_centre() {
        let slots = speaker_layout(1920, 1080, None, 2);
        assert_eq!(slots.len(), 2);
        let size = slots[0].size;
        assert_eq!(size, 360);

        let left_centre = slots[0].x as f64 + size as f64 / 2.0;
        let right_centre = slots[1].x as f64 + size as f64 / 2.0;
        assert!((960.0 - left_centre - (right_centre - 960.0)).abs() <= 1.0);
        assert_eq!(slots[0].y, 432);
        assert_eq!(slots[0].y, slots[1].y);
    }

    #[test]
    fn test_single_speaker_is_centred() {
        let slots = speaker_layout(1280, 720, Some(200), 1);
        assert_eq!(slots, vec![SpeakerSlot { x: 540, y: 288, size: 200 }]);
    }

    #[test]
    fn test_duration_follows_voice_and_fade_does_not_cut_it() {
        let args = strings(build_short_args(
            &request(42.3),
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        let t = args.iter().rposition(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "42.300");

        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_at + 1];
        assert!(graph.contains("fade=t=out:st=40.800:d=1.500"));
        assert!(graph.contains("[apre]afade=t=out:st=40.800:d=1.500[aout]"));
    }

    #[test]
    fn test_long_voice_is_cut_to_segment_length() {
        let mut req = request(10.0);
        req.voice = Some(AudioInput {
            path: "/media/conversation.wav".into(),
            volume: 1.0,
        });
        let args = strings(build_short_args(
            &req,
            &OutputSettings::default(),
            &TextSettings::default(),
        ));

        let voice = args.iter().position(|a| a == "/media/conversation.wav").unwrap();
        assert_eq!(args[voice - 3], "-t");
        assert_eq!(args[voice - 2], "10.000");

        let t = args.iter().rposition(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "10.000");
        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert!(args[graph_at + 1].contains("[apre]afade=t=out:st=8.500:d=1.500[aout]"));
    }

    #[test]
    fn test_speakers_are_masked_and_labelled() {
        let args = strings(build_short_args(
            &request(10.0),
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_at + 1];
        assert!(graph.contains("split=2[m0][m1]"));
        assert!(graph.contains("[raw1][m1]alphamerge[c1]"));
        assert!(graph.contains("text='Ana'"));
        assert!(graph.contains("text='Ben'"));

        // image portraits are held, video portraits looped
        let ana = args.iter().position(|a| a == "/media/ana.png").unwrap();
        assert_eq!(args[ana - 3], "-loop");
        let ben = args.iter().position(|a| a == "/media/ben.mp4").unwrap();
        assert_eq!(args[ben - 3], "-stream_loop");
    }

    #[test]
    fn test_circle_mask_is_white_inside_black_outside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        write_circle_mask(&path, 64).unwrap();

        let mask = image::open(&path).unwrap().to_luma8();
        assert_eq!(mask.dimensions(), (64, 64));
        assert_eq!(mask.get_pixel(32, 32)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }
}
