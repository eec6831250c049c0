//! Segment composer: one background, stacked text, optional logo and a mixed
//! soundtrack, rendered to a clip of an exact duration.

use rand::seq::SliceRandom;
use rand::Rng;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::video::{Corner, OutputSettings, SegmentSettings, TextSettings};
use crate::models::segment::SegmentKind;
use crate::services::ffmpeg::{Ffmpeg, MediaError};

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "mkv", "webm", "avi"];
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Vertical position of the title, as a share of the frame height.
const TITLE_Y_RATIO: f64 = 0.15;
/// Top edge of the footer band, as a share of the frame height.
const FOOTER_Y_RATIO: f64 = 0.85;

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("No usable background configured for the {0} segment")]
    NoBackground(SegmentKind),

    #[error("Asset not found: {}", .0.display())]
    MissingAsset(PathBuf),

    #[error("Cannot read media directory {}: {source}", dir.display())]
    MediaDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unreadable logo {}: {source}", path.display())]
    Logo {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Could not write mask image: {0}")]
    Mask(#[from] image::ImageError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the background stream is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundPlan {
    /// Video shorter than the segment, looped.
    Loop(PathBuf),
    /// Video at least as long as the segment, cut from `start_secs`.
    Subclip { path: PathBuf, start_secs: f64 },
    /// Image held for the whole segment.
    Still(PathBuf),
    /// Images shown one after another, equal time each.
    Slideshow {
        images: Vec<PathBuf>,
        per_image_secs: f64,
    },
}

impl BackgroundPlan {
    fn paths(&self) -> Vec<&Path> {
        match self {
            BackgroundPlan::Loop(p) | BackgroundPlan::Still(p) => vec![p.as_path()],
            BackgroundPlan::Subclip { path, .. } => vec![path.as_path()],
            BackgroundPlan::Slideshow { images, .. } => {
                images.iter().map(PathBuf::as_path).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentText {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogoOverlay {
    pub path: PathBuf,
    pub width_px: u32,
    pub padding_px: u32,
    pub corner: Corner,
}

/// An audio input scaled by `volume`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub path: PathBuf,
    pub volume: f64,
}

#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub kind: SegmentKind,
    pub background: BackgroundPlan,
    pub text: SegmentText,
    pub logo: Option<LogoOverlay>,
    /// Looped or trimmed to the segment duration.
    pub music: Option<AudioInput>,
    pub voiceover: Option<AudioInput>,
    pub duration_secs: f64,
    pub output: PathBuf,
}

/// Numbered ffmpeg inputs.
#[derive(Default)]
pub(crate) struct Inputs {
    args: Vec<OsString>,
    count: usize,
}

impl Inputs {
    pub(crate) fn push(&mut self, options: &[String], path: &Path) -> usize {
        self.args.extend(options.iter().map(OsString::from));
        self.args.push("-i".into());
        self.args.push(path.as_os_str().to_owned());
        self.count += 1;
        self.count - 1
    }

    pub(crate) fn push_lavfi(&mut self, source: &str, duration_secs: f64) -> usize {
        for arg in ["-f", "lavfi", "-t"] {
            self.args.push(arg.into());
        }
        self.args.push(secs(duration_secs).into());
        self.args.push("-i".into());
        self.args.push(source.into());
        self.count += 1;
        self.count - 1
    }

    pub(crate) fn into_args(self) -> Vec<OsString> {
        self.args
    }
}

pub(crate) fn secs(value: f64) -> String {
    format!("{value:.3}")
}

/// Escape text for a single-quoted drawtext value.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\:"),
            '\'' => out.push('\u{2019}'),
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

fn escape_filter_path(path: &Path) -> String {
    escape_drawtext(&path.to_string_lossy())
}

pub(crate) fn scale_crop(width: u32, height: u32, fps: u32) -> String {
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height},setsar=1,fps={fps}"
    )
}

pub(crate) fn drawtext(
    text: &str,
    size: u32,
    x: &str,
    y: &str,
    style: &TextSettings,
) -> String {
    let mut filter = format!(
        "drawtext=text='{}':expansion=none:fontcolor={}:fontsize={size}:x={x}:y={y}",
        escape_drawtext(text),
        style.font_color
    );
    if let Some(font) = &style.font_file {
        filter.push_str(&format!(":fontfile='{}'", escape_filter_path(font)));
    }
    filter
}

/// Title, subtitle and footer filters for a frame `height` pixels tall.
pub fn text_filters(text: &SegmentText, height: u32, style: &TextSettings) -> Vec<String> {
    let mut filters = Vec::new();
    let centered = "(w-text_w)/2";
    let mut y = (height as f64 * TITLE_Y_RATIO).round() as u32;

    if let Some(title) = text.title.as_deref().filter(|t| !t.is_empty()) {
        filters.push(drawtext(title, style.title_font_size, centered, &y.to_string(), style));
        y += style.title_font_size + style.title_spacing_px;
    }
    if let Some(subtitle) = text.subtitle.as_deref().filter(|t| !t.is_empty()) {
        filters.push(drawtext(
            subtitle,
            style.subtitle_font_size,
            centered,
            &y.to_string(),
            style,
        ));
    }
    if let Some(footer) = text.footer.as_deref().filter(|t| !t.is_empty()) {
        let band_y = (height as f64 * FOOTER_Y_RATIO).round() as u32;
        let band_h = style.footer_band_height;
        filters.push(format!(
            "drawbox=x=0:y={band_y}:w=iw:h={band_h}:color=black@{:.2}:t=fill",
            style.footer_band_opacity
        ));
        filters.push(drawtext(
            footer,
            style.footer_font_size,
            centered,
            &format!("{band_y}+({band_h}-text_h)/2"),
            style,
        ));
    }
    filters
}

fn logo_position(corner: Corner, padding: u32) -> (String, String) {
    let p = padding;
    match corner {
        Corner::TopLeft => (format!("{p}"), format!("{p}")),
        Corner::TopRight => (format!("main_w-overlay_w-{p}"), format!("{p}")),
        Corner::BottomLeft => (format!("{p}"), format!("main_h-overlay_h-{p}")),
        Corner::BottomRight => (
            format!("main_w-overlay_w-{p}"),
            format!("main_h-overlay_h-{p}"),
        ),
    }
}

/// Input options and filter producing `[bg]` for a background plan.
fn background_graph(
    plan: &BackgroundPlan,
    inputs: &mut Inputs,
    output: &OutputSettings,
    graph: &mut Vec<String>,
) {
    let fit = scale_crop(output.width, output.height, output.fps);
    match plan {
        BackgroundPlan::Loop(path) => {
            let i = inputs.push(&["-stream_loop".into(), "-1".into()], path);
            graph.push(format!("[{i}:v]{fit}[bg]"));
        }
        BackgroundPlan::Subclip { path, start_secs } => {
            let i = inputs.push(&["-ss".into(), secs(*start_secs)], path);
            graph.push(format!("[{i}:v]{fit}[bg]"));
        }
        BackgroundPlan::Still(path) => {
            let i = inputs.push(&["-loop".into(), "1".into()], path);
            graph.push(format!("[{i}:v]{fit}[bg]"));
        }
        BackgroundPlan::Slideshow {
            images,
            per_image_secs,
        } => {
            let mut labels = String::new();
            for (n, image) in images.iter().enumerate() {
                let i = inputs.push(
                    &["-loop".into(), "1".into(), "-t".into(), secs(*per_image_secs)],
                    image,
                );
                graph.push(format!(
                    "[{i}:v]{fit},trim=duration={},setpts=PTS-STARTPTS[s{n}]",
                    secs(*per_image_secs)
                ));
                labels.push_str(&format!("[s{n}]"));
            }
            graph.push(format!("{labels}concat=n={}:v=1:a=0[bg]", images.len()));
        }
    }
}

/// Audio graph ending in `[{label}]`: music bed and voiceover mixed, or silence.
pub(crate) fn audio_graph(
    music: Option<&AudioInput>,
    voiceover: Option<&AudioInput>,
    duration_secs: f64,
    label: &str,
    inputs: &mut Inputs,
    graph: &mut Vec<String>,
) {
    let music_label = music.map(|m| {
        let i = inputs.push(&["-stream_loop".into(), "-1".into()], &m.path);
        graph.push(format!("[{i}:a]volume={:.3}[music]", m.volume));
        "[music]"
    });
    let voice_label = voiceover.map(|v| {
        let i = inputs.push(&["-t".into(), secs(duration_secs)], &v.path);
        graph.push(format!("[{i}:a]volume={:.3}[voice]", v.volume));
        "[voice]"
    });

    match (music_label, voice_label) {
        (Some(m), Some(v)) => graph.push(format!(
            "{m}{v}amix=inputs=2:duration=longest:dropout_transition=0:normalize=0[{label}]"
        )),
        (Some(only), None) | (None, Some(only)) => {
            graph.push(format!("{only}anull[{label}]"))
        }
        (None, None) => {
            let i = inputs.push_lavfi("anullsrc=r=44100:cl=stereo", duration_secs);
            graph.push(format!("[{i}:a]anull[{label}]"));
        }
    }
}

/// Map `[vout]`/`[aout]`, cut at `duration_secs` and encode.
pub(crate) fn encode_args(
    graph: &[String],
    duration_secs: f64,
    output: &OutputSettings,
    path: &Path,
) -> Vec<OsString> {
    let graph = graph.join(";");
    let duration = secs(duration_secs);
    let fps = output.fps.to_string();
    let mut args: Vec<OsString> = [
        "-filter_complex",
        graph.as_str(),
        "-map",
        "[vout]",
        "-map",
        "[aout]",
        "-t",
        duration.as_str(),
        "-r",
        fps.as_str(),
        "-c:v",
        output.video_codec.as_str(),
        "-preset",
        output.preset.as_str(),
        "-b:v",
        output.video_bitrate.as_str(),
        "-pix_fmt",
        "yuv420p",
        "-c:a",
        output.audio_codec.as_str(),
        "-b:a",
        output.audio_bitrate.as_str(),
        "-movflags",
        "+faststart",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Full ffmpeg argument list for a composed segment.
pub fn build_segment_args(
    request: &SegmentRequest,
    output: &OutputSettings,
    style: &TextSettings,
) -> Vec<OsString> {
    let mut inputs = Inputs::default();
    let mut graph = Vec::new();

    background_graph(&request.background, &mut inputs, output, &mut graph);

    let texts = text_filters(&request.text, output.height, style);
    let mut current = if texts.is_empty() {
        "[bg]".to_string()
    } else {
        graph.push(format!("[bg]{}[txt]", texts.join(",")));
        "[txt]".to_string()
    };

    if let Some(logo) = &request.logo {
        let i = inputs.push(&["-loop".into(), "1".into()], &logo.path);
        let (x, y) = logo_position(logo.corner, logo.padding_px);
        graph.push(format!("[{i}:v]scale={}:-2[logo]", logo.width_px));
        graph.push(format!("{current}[logo]overlay=x={x}:y={y}:shortest=1[logo_out]"));
        current = "[logo_out]".to_string();
    }
    graph.push(format!("{current}format=yuv420p[vout]"));

    audio_graph(
        request.music.as_ref(),
        request.voiceover.as_ref(),
        request.duration_secs,
        "aout",
        &mut inputs,
        &mut graph,
    );

    let mut args = inputs.into_args();
    args.extend(encode_args(&graph, request.duration_secs, output, &request.output));
    args
}

/// Loop a short background, otherwise cut a subclip of exactly `duration_secs`.
pub fn plan_video_background<R: Rng + ?Sized>(
    path: PathBuf,
    background_secs: f64,
    duration_secs: f64,
    random_subclip: bool,
    rng: &mut R,
) -> BackgroundPlan {
    if background_secs < duration_secs {
        return BackgroundPlan::Loop(path);
    }
    let slack = background_secs - duration_secs;
    let start_secs = if random_subclip && slack > 0.0 {
        rng.gen_range(0.0..=slack)
    } else {
        slack / 2.0
    };
    BackgroundPlan::Subclip { path, start_secs }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

pub fn is_image(path: &Path) -> bool {
    has_extension(path, &IMAGE_EXTENSIONS)
}

/// Files in `dir` with one of `extensions`, sorted by name.
pub(crate) async fn list_media(
    dir: &Path,
    extensions: &[&str],
) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if has_extension(&path, extensions) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// [`list_media`] with the directory named in the error.
async fn read_media_dir(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, ComposeError> {
    list_media(dir, extensions)
        .await
        .map_err(|source| ComposeError::MediaDir {
            dir: dir.to_path_buf(),
            source,
        })
}

pub(crate) async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Renders composed segments with ffmpeg.
pub struct SegmentComposer {
    ffmpeg: Arc<Ffmpeg>,
}

impl SegmentComposer {
    pub fn new(ffmpeg: Arc<Ffmpeg>) -> Self {
        Self { ffmpeg }
    }

    pub fn ffmpeg(&self) -> &Ffmpeg {
        &self.ffmpeg
    }

    /// Pick a background for `kind`: a random video from the directory, then
    /// the single video, then the still image.
    pub async fn resolve_background(
        &self,
        kind: SegmentKind,
        settings: &SegmentSettings,
        duration_secs: f64,
    ) -> Result<BackgroundPlan, ComposeError> {
        if let Some(dir) = &settings.background_video_dir {
            let videos = read_media_dir(dir, &VIDEO_EXTENSIONS).await?;
            let picked = {
                let mut rng = rand::thread_rng();
                videos.choose(&mut rng).cloned()
            };
            match picked {
                Some(video) => return self.video_plan(video, duration_secs, settings).await,
                None => tracing::warn!(
                    segment = %kind,
                    dir = %dir.display(),
                    "Background directory has no videos"
                ),
            }
        }

        if let Some(video) = &settings.background_video_path {
            if exists(video).await {
                return self.video_plan(video.clone(), duration_secs, settings).await;
            }
            tracing::warn!(segment = %kind, path = %video.display(), "Background video missing");
        }

        if let Some(image) = &settings.background_image_path {
            if exists(image).await {
                return Ok(BackgroundPlan::Still(image.clone()));
            }
        }

        Err(ComposeError::NoBackground(kind))
    }

    async fn video_plan(
        &self,
        video: PathBuf,
        duration_secs: f64,
        settings: &SegmentSettings,
    ) -> Result<BackgroundPlan, ComposeError> {
        let background_secs = self.ffmpeg.probe_duration(&video).await?;
        let mut rng = rand::thread_rng();
        Ok(plan_video_background(
            video,
            background_secs,
            duration_secs,
            settings.random_subclip,
            &mut rng,
        ))
    }

    /// Stills from `dir`, each shown for an equal share of `duration_secs`.
    pub async fn resolve_slideshow(
        &self,
        kind: SegmentKind,
        dir: &Path,
        duration_secs: f64,
    ) -> Result<BackgroundPlan, ComposeError> {
        let images = read_media_dir(dir, &IMAGE_EXTENSIONS).await?;
        if images.is_empty() {
            return Err(ComposeError::NoBackground(kind));
        }
        let per_image_secs = duration_secs / images.len() as f64;
        Ok(BackgroundPlan::Slideshow {
            images,
            per_image_secs,
        })
    }

    async fn check_assets(&self, request: &SegmentRequest) -> Result<(), ComposeError> {
        for path in request.background.paths() {
            if !exists(path).await {
                return Err(ComposeError::MissingAsset(path.to_path_buf()));
            }
        }
        for audio in [&request.music, &request.voiceover].into_iter().flatten() {
            if !exists(&audio.path).await {
                return Err(ComposeError::MissingAsset(audio.path.clone()));
            }
        }
        if let Some(logo) = &request.logo {
            if !exists(&logo.path).await {
                return Err(ComposeError::MissingAsset(logo.path.clone()));
            }
            let path = logo.path.clone();
            tokio::task::spawn_blocking(move || image::image_dimensions(&path))
                .await
                .map_err(std::io::Error::other)?
                .map_err(|source| ComposeError::Logo {
                    path: logo.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Render the segment; a failed encode leaves no file behind.
    pub async fn compose(
        &self,
        request: &SegmentRequest,
        output: &OutputSettings,
        style: &TextSettings,
    ) -> Result<PathBuf, ComposeError> {
        self.check_assets(request).await?;
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = std::time::Instant::now();
        let args = build_segment_args(request, output, style);
        if let Err(e) = self.ffmpeg.run(&args).await {
            let _ = tokio::fs::remove_file(&request.output).await;
            return Err(e.into());
        }

        metrics::histogram!("segment_compose_seconds", "segment" => request.kind.to_string())
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            segment = %request.kind,
            output = %request.output.display(),
            duration_secs = request.duration_secs,
            "Segment composed"
        );

        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn to_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    fn value_after(args: &[String], flag: &str) -> String {
        let i = args.iter().position(|a| a == flag).expect("flag present");
        args[i + 1].clone()
    }

    fn request(background: BackgroundPlan) -> SegmentRequest {
        SegmentRequest {
            kind: SegmentKind::Intro,
            background,
            text: SegmentText {
                title: Some("The Weekly Stack".to_string()),
                subtitle: Some("Episode 12: Lifetimes".to_string()),
                footer: Some("example.com".to_string()),
            },
            logo: None,
            music: Some(AudioInput {
                path: PathBuf::from("/media/music.mp3"),
                volume: 0.1,
            }),
            voiceover: None,
            duration_secs: 5.0,
            output: PathBuf::from("/out/intro.mp4"),
        }
    }

    #[test]
    fn test_escape_drawtext() {
        assert_eq!(escape_drawtext("Episode 12: Rust's"), "Episode 12\\: Rust\u{2019}s");
        assert_eq!(escape_drawtext("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_short_background_loops_and_long_one_is_cut() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = plan_video_background("/bg.mp4".into(), 3.0, 5.0, true, &mut rng);
        assert_eq!(plan, BackgroundPlan::Loop("/bg.mp4".into()));

        let plan = plan_video_background("/bg.mp4".into(), 25.0, 5.0, false, &mut rng);
        assert_eq!(
            plan,
            BackgroundPlan::Subclip {
                path: "/bg.mp4".into(),
                start_secs: 10.0
            }
        );

        match plan_video_background("/bg.mp4".into(), 25.0, 5.0, true, &mut rng) {
            BackgroundPlan::Subclip { start_secs, .. } => {
                assert!((0.0..=20.0).contains(&start_secs))
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_output_is_cut_at_duration() {
        let args = to_strings(&build_segment_args(
            &request(BackgroundPlan::Still("/bg.png".into())),
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        assert_eq!(value_after(&args, "-t"), "5.000");
        assert_eq!(args.last().unwrap(), "/out/intro.mp4");
        assert_eq!(value_after(&args, "-c:v"), "libx264");
    }

    #[test]
    fn test_music_is_looped_and_scaled() {
        let args = to_strings(&build_segment_args(
            &request(BackgroundPlan::Still("/bg.png".into())),
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        let music_input = args.iter().position(|a| a == "/media/music.mp3").unwrap();
        assert_eq!(args[music_input - 3], "-stream_loop");
        let graph = value_after(&args, "-filter_complex");
        assert!(graph.contains("volume=0.100[music]"));
        assert!(graph.contains("[music]anull[aout]"));
    }

    #[test]
    fn test_subtitle_sits_below_title() {
        let style = TextSettings::default();
        let filters = text_filters(
            &SegmentText {
                title: Some("T".into()),
                subtitle: Some("S".into()),
                footer: None,
            },
            1080,
            &style,
        );
        assert_eq!(filters.len(), 2);
        assert!(filters[0].contains(":y=162"));
        let expected = 162 + style.title_font_size + style.title_spacing_px;
        assert!(filters[1].contains(&format!(":y={expected}")));
    }

    #[test]
    fn test_footer_gets_band() {
        let filters = text_filters(
            &SegmentText {
                footer: Some("Subscribe".into()),
                ..SegmentText::default()
            },
            1000,
            &TextSettings::default(),
        );
        assert!(filters[0].starts_with("drawbox=x=0:y=850"));
        assert!(filters[0].contains("black@0.70"));
        assert!(filters[1].contains("Subscribe"));
    }

    #[test]
    fn test_logo_goes_to_configured_corner() {
        let mut req = request(BackgroundPlan::Still("/bg.png".into()));
        req.logo = Some(LogoOverlay {
            path: "/media/logo.png".into(),
            width_px: 120,
            padding_px: 20,
            corner: Corner::TopRight,
        });
        let args = to_strings(&build_segment_args(
            &req,
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        let graph = value_after(&args, "-filter_complex");
        assert!(graph.contains("scale=120:-2[logo]"));
        assert!(graph.contains("overlay=x=main_w-overlay_w-20:y=20"));
    }

    #[test]
    fn test_voice_and_music_are_mixed() {
        let mut req = request(BackgroundPlan::Loop("/bg.mp4".into()));
        req.voiceover = Some(AudioInput {
            path: "/media/voice.wav".into(),
            volume: 1.0,
        });
        let args = to_strings(&build_segment_args(
            &req,
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        let graph = value_after(&args, "-filter_complex");
        assert!(graph.contains("[music][voice]amix=inputs=2"));
    }

    #[test]
    fn test_silent_segment_gets_null_audio() {
        let mut req = request(BackgroundPlan::Still("/bg.png".into()));
        req.music = None;
        let args = to_strings(&build_segment_args(
            &req,
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        assert!(args.iter().any(|a| a.starts_with("anullsrc")));
    }

    #[test]
    fn test_slideshow_concats_every_image() {
        let req = request(BackgroundPlan::Slideshow {
            images: vec!["/i/1.png".into(), "/i/2.png".into(), "/i/3.png".into()],
            per_image_secs: 2.0,
        });
        let args = to_strings(&build_segment_args(
            &req,
            &OutputSettings::default(),
            &TextSettings::default(),
        ));
        let graph = value_after(&args, "-filter_complex");
        assert!(graph.contains("[s0][s1][s2]concat=n=3:v=1:a=0[bg]"));
    }

    #[tokio::test]
    async fn test_directory_without_videos_falls_through_to_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("bg.png");
        image::GrayImage::new(4, 4).save(&image).unwrap();

        let settings = SegmentSettings {
            background_video_dir: Some(dir.path().to_path_buf()),
            background_image_path: Some(image.clone()),
            ..SegmentSettings::default()
        };
        let composer = SegmentComposer::new(Arc::new(Ffmpeg::default()));
        let plan = composer
            .resolve_background(SegmentKind::Outro, &settings, 5.0)
            .await
            .unwrap();
        assert_eq!(plan, BackgroundPlan::Still(image));
    }

    #[tokio::test]
    async fn test_unreadable_background_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("bg.png");
        image::GrayImage::new(4, 4).save(&image).unwrap();

        let settings = SegmentSettings {
            background_video_dir: Some(dir.path().join("no_such_dir")),
            background_image_path: Some(image),
            ..SegmentSettings::default()
        };
        let composer = SegmentComposer::new(Arc::new(Ffmpeg::default()));
        let err = composer
            .resolve_background(SegmentKind::Outro, &settings, 5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::MediaDir { dir, .. } if dir.ends_with("no_such_dir")));

        let err = composer
            .resolve_slideshow(SegmentKind::Main, &dir.path().join("no_images"), 30.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::MediaDir { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_logo_fails_before_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("bg.png");
        image::GrayImage::new(4, 4).save(&image).unwrap();
        let logo = dir.path().join("logo.png");
        tokio::fs::write(&logo, b"not a png").await.unwrap();

        let mut req = request(BackgroundPlan::Still(image));
        req.music = None;
        req.logo = Some(LogoOverlay {
            path: logo.clone(),
            width_px: 120,
            padding_px: 20,
            corner: Corner::TopLeft,
        });
        req.output = dir.path().join("intro.mp4");

        let composer = SegmentComposer::new(Arc::new(Ffmpeg::default()));
        let err = composer
            .compose(&req, &OutputSettings::default(), &TextSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Logo { path, .. } if path == logo));
    }

    #[tokio::test]
    async fn test_nothing_resolvable_is_an_error() {
        let composer = SegmentComposer::new(Arc::new(Ffmpeg::default()));
        let err = composer
            .resolve_background(SegmentKind::Intro, &SegmentSettings::default(), 5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::NoBackground(SegmentKind::Intro)));
    }

    #[tokio::test]
    async fn test_missing_music_fails_before_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("bg.png");
        image::GrayImage::new(4, 4).save(&image).unwrap();

        let mut req = request(BackgroundPlan::Still(image));
        req.output = dir.path().join("intro.mp4");
        let composer = SegmentComposer::new(Arc::new(Ffmpeg::default()));
        let err = composer
            .compose(&req, &OutputSettings::default(), &TextSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::MissingAsset(p) if p.ends_with("music.mp3")));
    }
}
