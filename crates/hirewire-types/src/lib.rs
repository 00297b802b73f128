pub mod asset;
pub mod channel;
pub mod copilot;
pub mod draft;
pub mod failure;
pub mod job;
pub mod media;

pub use asset::{AssetRecord, AssetRun, AssetRunStatus, AssetStatus, FormatId};
pub use channel::{dedupe_recommendations, normalize_channel_token, ChannelId, ChannelRecommendation};
pub use copilot::{CopilotAction, CopilotMessage, CopilotStage, FieldPatch, MessageMetadata, MessageRole};
pub use draft::{FieldId, JobDraft, DRAFT_REQUIRED_FIELDS};
pub use failure::{FailureReason, TaskFailure, RAW_PREVIEW_MAX};
pub use job::{Finalization, FinalizeSource, Job, RefineMetadata};
pub use media::{HeroImage, MediaPhase, VideoRecord};
