use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hirewire_providers::{DecodeMode, ProviderResponse};
use hirewire_types::{
    ChannelId, ChannelRecommendation, CopilotAction, CopilotMessage, CopilotStage, FieldId,
    FormatId, JobDraft, RefineMetadata, TaskFailure,
};

pub mod builders;
pub mod orchestrator;
pub mod parsers;
pub mod schemas;

pub use orchestrator::{Orchestrator, PreviewLogger, TaskRun, RETRY_DELAYS};

/// Everything a builder or parser may need, threaded explicitly through the
/// pipeline instead of captured in closures.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub job_id: String,
    /// Telemetry tag carried from the ambient request scope.
    pub route: String,
    /// Snapshot of the draft (or final job) the task operates on.
    pub job: Value,
    pub refined: Option<Value>,
    pub allowed_channels: Vec<ChannelId>,
    pub visible_field_ids: Vec<FieldId>,
    pub previous_suggestions: Vec<Value>,
    pub updated_field_id: Option<FieldId>,
    pub company_context: Option<String>,
    pub conversation: Vec<CopilotMessage>,
    pub stage: Option<CopilotStage>,
    pub channel: Option<ChannelId>,
    pub format: Option<FormatId>,
    pub plan_id: Option<String>,
    pub master_content: Option<Value>,
    /// Output of the previous stage for chained tasks (video pipeline).
    pub stage_input: Option<Value>,
    pub attempt: u32,
    pub strict_mode: bool,
}

impl TaskContext {
    pub fn for_job(job_id: impl Into<String>, job: Value) -> Self {
        Self {
            job_id: job_id.into(),
            job,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillCandidate {
    pub field_id: FieldId,
    pub value: Value,
    pub rationale: String,
    pub confidence: f64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    pub refined: JobDraft,
    pub summary: String,
    pub metadata: RefineMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedMedium {
    Video,
    Image,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPick {
    pub id: ChannelId,
    pub fit_score: u8,
    pub reason_short: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPickerOutcome {
    pub top_channel: ChannelPick,
    pub recommended_medium: Option<RecommendedMedium>,
    pub copy_hint: String,
    pub alternatives: Vec<ChannelPick>,
    pub compliance_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetCopy {
    pub plan_id: String,
    pub content: Value,
}

/// Agent turns are a sum: either the model wants a tool executed, or it is
/// done and hands back a message plus UI actions.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    ToolCall {
        tool: String,
        input: Value,
    },
    Final {
        message: String,
        actions: Vec<CopilotAction>,
        dropped_actions: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Suggest { candidates: Vec<AutofillCandidate> },
    Refine(RefineOutcome),
    Channels { recommendations: Vec<ChannelRecommendation> },
    ChannelPick(ChannelPickerOutcome),
    AssetCopy(AssetCopy),
    AssetBatch { items: Vec<AssetCopy> },
    VideoStage { output: Value },
    ImagePrompt { prompt: String },
    ImageCaption { caption: String, hashtags: Vec<String> },
    Agent(AgentOutcome),
}

pub enum SystemPrompt {
    Static(&'static str),
    Builder(fn(&TaskContext) -> String),
}

impl SystemPrompt {
    pub fn resolve(&self, ctx: &TaskContext) -> String {
        match self {
            SystemPrompt::Static(text) => (*text).to_string(),
            SystemPrompt::Builder(build) => build(ctx),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TokenBudget {
    Fixed(u32),
    PerProvider(&'static [(&'static str, u32)]),
}

impl TokenBudget {
    pub fn resolve(&self, provider_id: &str) -> u32 {
        match self {
            TokenBudget::Fixed(tokens) => *tokens,
            TokenBudget::PerProvider(entries) => entries
                .iter()
                .find(|(id, _)| *id == provider_id)
                .map(|(_, tokens)| *tokens)
                .unwrap_or_else(|| {
                    entries.first().map(|(_, tokens)| *tokens).unwrap_or(2048)
                }),
        }
    }
}

pub type BuildFn = fn(&TaskContext) -> anyhow::Result<String>;
pub type ParseFn = fn(&ProviderResponse, &TaskContext) -> Result<TaskOutput, TaskFailure>;

/// Static description of one named LLM task: how to prompt it, how to
/// decode it, and how hard to retry it.
pub struct TaskDescriptor {
    pub name: &'static str,
    pub system: SystemPrompt,
    pub builder: BuildFn,
    pub parser: ParseFn,
    pub mode: DecodeMode,
    pub temperature: f32,
    pub max_tokens: TokenBudget,
    pub retries: u32,
    pub strict_on_retry: bool,
    pub output_schema: Option<fn() -> Value>,
    pub timeout_secs: u64,
}

pub struct TaskRegistry {
    tasks: HashMap<&'static str, TaskDescriptor>,
}

impl TaskRegistry {
    pub fn builtin() -> Self {
        let mut tasks = HashMap::new();
        for descriptor in builders::catalog() {
            tasks.insert(descriptor.name, descriptor);
        }
        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tasks.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contains_every_task() {
        let registry = TaskRegistry::builtin();
        for name in [
            "suggest",
            "refine",
            "channels",
            "channel_picker",
            "asset_master",
            "asset_adapt",
            "asset_channel_batch",
            "video_config",
            "video_storyboard",
            "video_caption",
            "video_compliance",
            "image_prompt",
            "image_caption",
            "copilot_agent",
        ] {
            assert!(registry.get(name).is_some(), "missing task {name}");
        }
    }

    #[test]
    fn every_task_retries_at_least_once() {
        let registry = TaskRegistry::builtin();
        for name in registry.names() {
            let descriptor = registry.get(name).expect("descriptor");
            assert!(descriptor.retries >= 1, "{name} has zero retries");
            assert!((0.0..=2.0).contains(&descriptor.temperature), "{name} temperature");
        }
    }

    #[test]
    fn token_budget_resolves_per_provider_with_fallback() {
        let budget = TokenBudget::PerProvider(&[("openai", 4096), ("anthropic", 8192)]);
        assert_eq!(budget.resolve("anthropic"), 8192);
        assert_eq!(budget.resolve("groq"), 4096);
        assert_eq!(TokenBudget::Fixed(1024).resolve("openai"), 1024);
    }
}
