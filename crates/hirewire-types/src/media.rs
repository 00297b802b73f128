use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::failure::TaskFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaPhase {
    Idle,
    Prompting,
    Generating,
    Ready,
    Failed,
}

impl MediaPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaPhase::Ready | MediaPhase::Failed)
    }
}

/// At most one hero image per job; replaced only by an explicit
/// force-refresh request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroImage {
    pub status: MediaPhase,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    pub updated_at: DateTime<Utc>,
}

impl HeroImage {
    pub fn idle() -> Self {
        Self {
            status: MediaPhase::Idle,
            provider: String::new(),
            model: String::new(),
            image_url: None,
            caption: None,
            hashtags: Vec::new(),
            failure: None,
            updated_at: Utc::now(),
        }
    }
}

/// One video per job, built through the staged planning pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub status: MediaPhase,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storyboard: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    pub updated_at: DateTime<Utc>,
}
