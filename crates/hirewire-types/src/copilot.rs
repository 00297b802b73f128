use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::ChannelRecommendation;
use crate::draft::FieldId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopilotStage {
    Wizard,
    Refine,
    Channels,
    Assets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<FieldId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.client_message_id.is_none()
            && self.field_id.is_none()
            && self.rationale.is_none()
            && self.value.is_none()
            && self.confidence.is_none()
            && self.source.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl CopilotMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>, client_message_id: Option<String>) -> Self {
        let mut msg = Self::new(MessageRole::User, content);
        msg.metadata.client_message_id = client_message_id;
        msg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    pub field_id: FieldId,
    pub value: Value,
}

/// Actions a copilot turn may surface to the UI. Unknown action types are
/// rejected at the validation boundary, not silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CopilotAction {
    FieldUpdate {
        #[serde(rename = "fieldId")]
        field_id: FieldId,
        value: Value,
    },
    FieldBatchUpdate {
        updates: Vec<FieldPatch>,
    },
    RefinedFieldUpdate {
        #[serde(rename = "fieldId")]
        field_id: FieldId,
        value: Value,
    },
    RefinedFieldBatchUpdate {
        updates: Vec<FieldPatch>,
    },
    ChannelRecommendationsUpdate {
        recommendations: Vec<ChannelRecommendation>,
    },
    AssetUpdate {
        #[serde(rename = "assetId")]
        asset_id: String,
        content: Value,
    },
}
