use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::{AssetRecord, AssetRun};
use crate::channel::ChannelRecommendation;
use crate::copilot::CopilotMessage;
use crate::draft::JobDraft;
use crate::failure::TaskFailure;
use crate::media::{HeroImage, VideoRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineMetadata {
    pub improvement_score: u8,
    pub original_score: u8,
    #[serde(default)]
    pub key_improvements: Vec<String>,
    pub impact_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeSource {
    Original,
    Refined,
    Edited,
}

impl FinalizeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalizeSource::Original => "original",
            FinalizeSource::Refined => "refined",
            FinalizeSource::Edited => "edited",
        }
    }
}

/// The user's approval of one draft variant. `source` is immutable within a
/// finalization event; re-finalizing produces a fresh record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finalization {
    pub source: FinalizeSource,
    pub finalized_at: DateTime<Utc>,
}

/// The durable per-job document. One document per job id; the store is the
/// single source of truth and the UI polls snapshots of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub state: JobDraft,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined: Option<JobDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RefineMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine_failure: Option<TaskFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalization: Option<Finalization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_recommendations: Vec<ChannelRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_failure: Option<TaskFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_run: Option<AssetRun>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub assets: HashMap<String, AssetRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<HeroImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copilot: Vec<CopilotMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, state: JobDraft) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            state,
            refined: None,
            refine_summary: None,
            metadata: None,
            refined_at: None,
            refine_failure: None,
            finalization: None,
            channel_recommendations: Vec::new(),
            channel_updated_at: None,
            channel_failure: None,
            asset_run: None,
            assets: HashMap::new(),
            hero_image: None,
            video: None,
            copilot: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The draft variant finalization points at; falls back to the working
    /// draft before any finalization happened.
    pub fn final_draft(&self) -> &JobDraft {
        match self.finalization.as_ref().map(|f| f.source) {
            Some(FinalizeSource::Refined) => self.refined.as_ref().unwrap_or(&self.state),
            _ => &self.state,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalization.is_some()
    }
}
