use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub mod video;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Ops server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Address the worker serves its Prometheus scrape endpoint on. Unset disables it.
    pub worker_metrics_addr: Option<String>,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the sweep lock. Unset runs without a lock.
    pub redis_url: Option<String>,

    /// HeyGen API key. Unset disables avatar rendering.
    pub heygen_api_key: Option<String>,

    /// HeyGen REST base URL
    #[serde(default = "default_heygen_base_url")]
    pub heygen_base_url: String,

    /// Root directory for every generated file
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Attempts before a job is left in `failed` for good
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Seconds between two sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Jobs fetched per sweep
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: i64,

    /// How long a claim on a job stays valid
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Delay between two status polls of an avatar render
    #[serde(default = "default_render_poll_interval_secs")]
    pub render_poll_interval_secs: u64,

    /// Budget after which a render is declared timed out
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,

    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,

    /// Run a single sweep and exit (cron mode)
    #[serde(default)]
    pub run_once: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_heygen_base_url() -> String {
    "https://api.heygen.com".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}

fn default_max_retries() -> i32 {
    3
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_size() -> i64 {
    25
}

fn default_lease_secs() -> u64 {
    3600
}

fn default_render_poll_interval_secs() -> u64 {
    5
}

fn default_render_timeout_secs() -> u64 {
    600
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_bin() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn render_poll_interval(&self) -> Duration {
        Duration::from_secs(self.render_poll_interval_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}
