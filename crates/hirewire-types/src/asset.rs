use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::ChannelId;
use crate::failure::TaskFailure;

/// Closed set of creative formats an asset run can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormatId {
    LinkedinJobPosting,
    LinkedinFeedPost,
    XPost,
    XThreadOpener,
    FacebookFeedPost,
    FacebookJobListing,
    InstagramCaption,
    SocialImageCaption,
    ShortVideoTiktok,
    GoogleJobsListing,
    IndeedListing,
}

impl FormatId {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatId::LinkedinJobPosting => "LINKEDIN_JOB_POSTING",
            FormatId::LinkedinFeedPost => "LINKEDIN_FEED_POST",
            FormatId::XPost => "X_POST",
            FormatId::XThreadOpener => "X_THREAD_OPENER",
            FormatId::FacebookFeedPost => "FACEBOOK_FEED_POST",
            FormatId::FacebookJobListing => "FACEBOOK_JOB_LISTING",
            FormatId::InstagramCaption => "INSTAGRAM_CAPTION",
            FormatId::SocialImageCaption => "SOCIAL_IMAGE_CAPTION",
            FormatId::ShortVideoTiktok => "SHORT_VIDEO_TIKTOK",
            FormatId::GoogleJobsListing => "GOOGLE_JOBS_LISTING",
            FormatId::IndeedListing => "INDEED_LISTING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl AssetStatus {
    /// READY and FAILED never transition further within the same run.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetStatus::Ready | AssetStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub format_id: FormatId,
    pub channel_id: ChannelId,
    pub status: AssetStatus,
    #[serde(default)]
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRunStatus {
    Planning,
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRun {
    pub status: AssetRunStatus,
    pub planned_count: u32,
    pub completed_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AssetRun {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AssetRunStatus::Planning | AssetRunStatus::Generating
        )
    }
}
