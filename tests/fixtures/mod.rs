//! Jobs and video configs shared by the integration tests
#![allow(dead_code)]

use chrono::Utc;
use podcast_video_pipeline::models::job::Job;
use podcast_video_pipeline::models::render::{RenderStatus, RenderStatusReport};
use serde_json::{json, Value};
use std::path::Path;

pub const VIDEO_URL: &str = "https://cdn.example.com/renders/abc.mp4";
pub const THUMBNAIL_URL: &str = "https://cdn.example.com/renders/abc.jpg";

pub fn job(job_id: i64) -> Job {
    Job {
        job_id,
        topic: "Borrow checker war stories".to_string(),
        profile_name: "weekly".to_string(),
        customer_id: "acme".to_string(),
        theme: Some("dark".to_string()),
        created_at: Utc::now(),
    }
}

/// Main segment only, taken from an existing clip.
pub fn fixed_main_config(clip: &Path) -> Value {
    json!({
        "main_video": true,
        "main": { "fixed_video_path": clip },
        "transition_secs": 1.0
    })
}

/// Short segment rendered by the avatar service.
pub fn avatar_config() -> Value {
    json!({
        "heygen_short_video": true,
        "heygen": {
            "script": "Welcome back to the show",
            "avatar_id": "Judith_expressive_2024120201"
        }
    })
}

/// Fails typed parsing: the transition is out of range.
pub fn invalid_config() -> Value {
    json!({ "transition_secs": 12.0 })
}

pub fn report(status: RenderStatus) -> RenderStatusReport {
    RenderStatusReport {
        status,
        video_url: None,
        thumbnail_url: None,
        error: None,
    }
}

pub fn completed_report() -> RenderStatusReport {
    RenderStatusReport {
        status: RenderStatus::Completed,
        video_url: Some(VIDEO_URL.to_string()),
        thumbnail_url: Some(THUMBNAIL_URL.to_string()),
        error: None,
    }
}

pub fn failed_report(message: &str) -> RenderStatusReport {
    RenderStatusReport {
        status: RenderStatus::Error,
        video_url: None,
        thumbnail_url: None,
        error: Some(message.to_string()),
    }
}
