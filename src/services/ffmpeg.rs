use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Lines of stderr kept in an error.
const STDERR_TAIL_LINES: usize = 12;

/// Thin async wrapper around the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    /// Container duration in seconds.
    pub async fn probe_duration(&self, path: &Path) -> Result<f64, MediaError> {
        let stdout = self
            .probe(&[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ], path)
            .await?;

        let value = stdout.trim();
        value.parse::<f64>().map_err(|_| MediaError::Probe {
            path: path.to_path_buf(),
            detail: format!("unparsable duration '{value}'"),
        })
    }

    /// Width and height of the first video stream.
    pub async fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32), MediaError> {
        let stdout = self
            .probe(&[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ], path)
            .await?;

        parse_dimensions(stdout.trim()).ok_or_else(|| MediaError::Probe {
            path: path.to_path_buf(),
            detail: format!("unparsable dimensions '{}'", stdout.trim()),
        })
    }

    /// Whether the file carries at least one audio stream.
    pub async fn has_audio(&self, path: &Path) -> Result<bool, MediaError> {
        let stdout = self
            .probe(&[
                "-v",
                "error",
                "-select_streams",
                "a",
                "-show_entries",
                "stream=index",
                "-of",
                "csv=p=0",
            ], path)
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn probe(&self, args: &[&str], path: &Path) -> Result<String, MediaError> {
        let output = Command::new(&self.ffprobe_bin)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                program: self.ffprobe_bin.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(MediaError::Probe {
                path: path.to_path_buf(),
                detail: stderr_tail(&output.stderr),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| MediaError::Probe {
            path: path.to_path_buf(),
            detail: "non-UTF8 ffprobe output".to_string(),
        })
    }

    /// Run ffmpeg with `args`. A non-zero exit carries the stderr tail.
    pub async fn run(&self, args: &[OsString]) -> Result<(), MediaError> {
        tracing::debug!(args = ?args, "Running ffmpeg");

        let output = Command::new(&self.ffmpeg_bin)
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                program: self.ffmpeg_bin.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            tracing::warn!(status = ?output.status.code(), stderr = %stderr, "ffmpeg failed");
            return Err(MediaError::Failed {
                status: output.status.code(),
                stderr,
            });
        }

        Ok(())
    }

    /// Decode any audio file to interleaved f32 samples at a fixed layout.
    pub async fn decode_pcm(
        &self,
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Vec<f32>, MediaError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MediaError::Missing(path.to_path_buf()));
        }

        let output = Command::new(&self.ffmpeg_bin)
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-vn", "-f", "f32le", "-acodec", "pcm_f32le"])
            .args(["-ac", &channels.to_string(), "-ar", &sample_rate.to_string()])
            .arg("-")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                program: self.ffmpeg_bin.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(MediaError::Failed {
                status: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Encode interleaved f32 samples to `output`; the codec follows the extension.
    pub async fn encode_pcm(
        &self,
        samples: &[f32],
        sample_rate: u32,
        channels: u16,
        output: &Path,
    ) -> Result<(), MediaError> {
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "f32le"])
            .args(["-ar", &sample_rate.to_string(), "-ac", &channels.to_string()])
            .args(["-i", "-"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MediaError::Spawn {
                program: self.ffmpeg_bin.display().to_string(),
                source,
            })?;

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let written = match child.stdin.take() {
            Some(mut stdin) => match stdin.write_all(&bytes).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            },
            None => Ok(()),
        };
        if written.is_err() {
            // the child is reaped below either way
            let _ = child.start_kill();
        }

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(MediaError::Failed {
                status: result.status.code(),
                stderr: stderr_tail(&result.stderr),
            });
        }
        written?;
        Ok(())
    }
}

fn parse_dimensions(value: &str) -> Option<(u32, u32)> {
    let first_line = value.lines().next()?;
    let (w, h) = first_line.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("Could not probe {}: {detail}", path.display())]
    Probe { path: PathBuf, detail: String },

    #[error("Media file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
