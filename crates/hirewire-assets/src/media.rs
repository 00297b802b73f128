use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct RenderedVideo {
    pub video_url: String,
    pub poster_url: Option<String>,
    pub duration_seconds: u32,
}

/// Seam for the non-text generation backends. Text planning goes through
/// the task orchestrator; pixels go through this.
#[async_trait]
pub trait MediaGenerator: Send + Sync {
    async fn generate_image(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<GeneratedImage>;

    async fn render_video(
        &self,
        config: &Value,
        storyboard: &Value,
        cancel: CancellationToken,
    ) -> anyhow::Result<RenderedVideo>;
}

/// HTTP media backend speaking a minimal JSON contract:
/// `POST {base}/images` and `POST {base}/videos`.
pub struct HttpMediaGenerator {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpMediaGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl MediaGenerator for HttpMediaGenerator {
    async fn generate_image(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<GeneratedImage> {
        let mut req = self
            .client
            .post(format!("{}/images", self.base_url))
            .json(&json!({"prompt": prompt}));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("image generation cancelled"),
            sent = req.send() => sent?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("image backend failed with status {status}: {body}");
        }
        let value: Value = response.json().await?;
        let image_url = value
            .get("imageUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("image backend returned no imageUrl"))?
            .to_string();
        Ok(GeneratedImage { image_url })
    }

    async fn render_video(
        &self,
        config: &Value,
        storyboard: &Value,
        cancel: CancellationToken,
    ) -> anyhow::Result<RenderedVideo> {
        let mut req = self
            .client
            .post(format!("{}/videos", self.base_url))
            .json(&json!({"config": config, "storyboard": storyboard}));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("video render cancelled"),
            sent = req.send() => sent?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("video backend failed with status {status}: {body}");
        }
        let value: Value = response.json().await?;
        let video_url = value
            .get("videoUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("video backend returned no videoUrl"))?
            .to_string();
        Ok(RenderedVideo {
            video_url,
            poster_url: value
                .get("posterUrl")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            duration_seconds: value
                .get("durationSeconds")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        })
    }
}
