use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::models::render::{RenderRequest, RenderStatus, RenderStatusReport};

/// Asynchronous avatar render service.
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Start a render and return the service's id for it.
    async fn submit(&self, request: &RenderRequest) -> Result<String, RenderServiceError>;

    async fn get_status(&self, external_id: &str)
        -> Result<RenderStatusReport, RenderServiceError>;

    /// Stream `url` into `local_path`.
    async fn download(&self, url: &str, local_path: &Path) -> Result<(), RenderServiceError>;
}

/// Client for the HeyGen REST API.
pub struct HeygenClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    video_inputs: Vec<VideoInput<'a>>,
    dimension: Dimension,
}

#[derive(Serialize)]
struct VideoInput<'a> {
    character: Character<'a>,
    voice: Voice<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<Background<'a>>,
}

#[derive(Serialize)]
struct Character<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    avatar_id: &'a str,
    avatar_style: &'static str,
}

#[derive(Serialize)]
struct Voice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    input_text: &'a str,
    voice_id: &'a str,
    speed: f64,
}

#[derive(Serialize)]
struct Background<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    video_asset_id: &'a str,
    play_style: &'static str,
    fit: &'static str,
}

#[derive(Serialize)]
struct Dimension {
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct GenerateData {
    video_id: String,
}

#[derive(Deserialize)]
struct StatusData {
    status: String,
    video_url: Option<String>,
    thumbnail_url: Option<String>,
    error: Option<serde_json::Value>,
}

impl HeygenClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn api_error(error: Option<ApiError>) -> RenderServiceError {
        RenderServiceError::Api(
            error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "response carried no data".to_string()),
        )
    }
}

fn generate_body(request: &RenderRequest) -> GenerateRequest<'_> {
    GenerateRequest {
        video_inputs: vec![VideoInput {
            character: Character {
                kind: "avatar",
                avatar_id: &request.avatar_id,
                avatar_style: "normal",
            },
            voice: Voice {
                kind: "text",
                input_text: &request.input_text,
                voice_id: &request.voice_id,
                speed: request.speed,
            },
            background: request.background_asset_id.as_deref().map(|asset| Background {
                kind: "video",
                video_asset_id: asset,
                play_style: "loop",
                fit: "cover",
            }),
        }],
        dimension: Dimension {
            width: request.width,
            height: request.height,
        },
    }
}

#[async_trait]
impl RenderService for HeygenClient {
    async fn submit(&self, request: &RenderRequest) -> Result<String, RenderServiceError> {
        let url = format!("{}/v2/video/generate", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&generate_body(request))
            .send()
            .await?
            .error_for_status()?;

        let body: Envelope<GenerateData> = response.json().await?;
        match body.data {
            Some(data) => Ok(data.video_id),
            None => Err(Self::api_error(body.error)),
        }
    }

    async fn get_status(
        &self,
        external_id: &str,
    ) -> Result<RenderStatusReport, RenderServiceError> {
        let url = format!("{}/v1/video_status.get", self.base_url);

        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&[("video_id", external_id)])
            .send()
            .await?
            .error_for_status()?;

        let body: Envelope<StatusData> = response.json().await?;
        let data = body.data.ok_or_else(|| Self::api_error(body.error))?;

        Ok(RenderStatusReport {
            status: RenderStatus::from_service(&data.status),
            video_url: data.video_url,
            thumbnail_url: data.thumbnail_url,
            error: data.error.map(|e| e.to_string()),
        })
    }

    async fn download(&self, url: &str, local_path: &Path) -> Result<(), RenderServiceError> {
        let mut response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local_path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Render service returned an error: {0}")]
    Api(String),

    #[error("I/O error while downloading: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RenderRequest {
        RenderRequest {
            avatar_id: "Judith_expressive_2024120201".to_string(),
            voice_id: "voice-1".to_string(),
            input_text: "Welcome back to the show".to_string(),
            speed: 1.1,
            width: 1280,
            height: 720,
            background_asset_id: None,
        }
    }

    #[test]
    fn test_generate_body_shape() {
        let req = request();
        let body = serde_json::to_value(generate_body(&req)).unwrap();

        assert_eq!(body["video_inputs"][0]["character"]["type"], "avatar");
        assert_eq!(body["video_inputs"][0]["voice"]["input_text"], "Welcome back to the show");
        assert_eq!(body["dimension"]["width"], 1280);
        assert!(body["video_inputs"][0].get("background").is_none());
    }

    #[test]
    fn test_background_asset_loops() {
        let mut req = request();
        req.background_asset_id = Some("asset-9".to_string());
        let body = serde_json::to_value(generate_body(&req)).unwrap();

        let background = &body["video_inputs"][0]["background"];
        assert_eq!(background["video_asset_id"], "asset-9");
        assert_eq!(background["play_style"], "loop");
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = HeygenClient::new("https://api.heygen.com/", "key");
        assert_eq!(client.base_url, "https://api.heygen.com");
    }
}
