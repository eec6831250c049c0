use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::models::job::Job;

/// Where generated files go:
/// `<root>/<profile>/<customer_id>/<job_id>/<timestamp>_<filename>`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

fn safe_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job: &Job) -> PathBuf {
        self.root
            .join(safe_component(&job.profile_name))
            .join(safe_component(&job.customer_id))
            .join(job.job_id.to_string())
    }

    /// Timestamped path inside the job directory, which is created if missing.
    pub async fn file_path(&self, job: &Job, filename: &str) -> std::io::Result<PathBuf> {
        let dir = self.job_dir(job);
        tokio::fs::create_dir_all(&dir).await?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        Ok(dir.join(format!("{timestamp}_{filename}")))
    }

    /// Scratch directory for intermediate files of one job.
    pub async fn work_dir(&self, job: &Job) -> std::io::Result<PathBuf> {
        let dir = self.job_dir(job).join("work");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job {
            job_id: 17,
            topic: "topic".to_string(),
            profile_name: "tech talk".to_string(),
            customer_id: "cust/../42".to_string(),
            theme: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_job_dir_is_sanitized() {
        let layout = OutputLayout::new("/srv/out");
        assert_eq!(
            layout.job_dir(&job()),
            PathBuf::from("/srv/out/tech_talk/cust____42/17")
        );
    }

    #[tokio::test]
    async fn test_file_path_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(root.path());

        let path = layout.file_path(&job(), "final_video_17.mp4").await.unwrap();
        assert!(path.parent().unwrap().is_dir());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_final_video_17.mp4"));
        assert_eq!(name.len(), "YYYYmmdd_HHMMSS_final_video_17.mp4".len());
    }
}
