use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use hirewire_store::{AssetPatch, JobStore, StoreError};
use hirewire_tasks::{AgentOutcome, Orchestrator, TaskContext, TaskOutput};
use hirewire_types::{
    ChannelId, CopilotAction, CopilotMessage, CopilotStage, FieldId, FieldPatch, JobDraft,
    MessageRole,
};

/// Upper bound on tool executions within one chat turn. Prevents runaway
/// agent loops.
pub const MAX_TOOL_STEPS: usize = 4;

#[derive(Debug, Clone)]
pub struct CopilotTurn {
    pub messages: Vec<CopilotMessage>,
    pub actions: Vec<CopilotAction>,
    pub updated_job_snapshot: Option<JobDraft>,
    pub updated_refined_snapshot: Option<JobDraft>,
}

/// Drives one conversation turn: append the user message, loop the agent
/// through bounded tool calls, land on an assistant message.
pub struct CopilotEngine {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    dropped_actions: AtomicU64,
}

impl CopilotEngine {
    pub fn new(store: Arc<JobStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            dropped_actions: AtomicU64::new(0),
        }
    }

    /// Count of actions and tool calls discarded because their type was
    /// unknown or their payload failed validation.
    pub fn dropped_action_count(&self) -> u64 {
        self.dropped_actions.load(Ordering::Relaxed)
    }

    pub async fn handle_message(
        &self,
        job_id: &str,
        message: String,
        stage: CopilotStage,
        client_message_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<CopilotTurn, StoreError> {
        // Concurrent chat turns for one job serialize here; last writer wins.
        let lock = self.store.job_lock(job_id).await;
        let _guard = lock.lock().await;

        // Re-sent optimistic messages are acknowledged without re-running
        // the agent.
        if let Some(client_id) = &client_message_id {
            let conversation = self.store.conversation(job_id).await?;
            let duplicate = conversation.iter().any(|m| {
                m.role == MessageRole::User
                    && m.metadata.client_message_id.as_deref() == Some(client_id)
            });
            if duplicate {
                return Ok(CopilotTurn {
                    messages: conversation,
                    actions: Vec::new(),
                    updated_job_snapshot: None,
                    updated_refined_snapshot: None,
                });
            }
        }

        self.store
            .append_copilot_message(job_id, CopilotMessage::user(message, client_message_id))
            .await?;

        let mut actions: Vec<CopilotAction> = Vec::new();
        let mut draft_touched = false;
        let mut refined_touched = false;
        let mut tool_outcomes: Vec<String> = Vec::new();

        for _step in 0..MAX_TOOL_STEPS {
            let job = self
                .store
                .get_job(job_id)
                .await
                .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
            let mut ctx = TaskContext::for_job(
                job_id,
                serde_json::to_value(&job.state).unwrap_or(Value::Null),
            );
            ctx.refined = job
                .refined
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok());
            ctx.conversation = job.copilot.clone();
            ctx.stage = Some(stage);
            ctx.allowed_channels = ChannelId::ALL.to_vec();

            let run = match self
                .orchestrator
                .run("copilot_agent", &ctx, cancel.child_token())
                .await
            {
                Ok(run) => run,
                Err(fatal) => {
                    return self
                        .finish_with_assistant(
                            job_id,
                            format!("I could not reach the assistant backend: {fatal}"),
                            actions,
                            draft_touched,
                            refined_touched,
                        )
                        .await;
                }
            };

            let outcome = match run.output {
                Ok(TaskOutput::Agent(outcome)) => outcome,
                Ok(_) => {
                    return self
                        .finish_with_assistant(
                            job_id,
                            "The assistant returned something I could not interpret.".to_string(),
                            actions,
                            draft_touched,
                            refined_touched,
                        )
                        .await;
                }
                Err(failure) => {
                    return self
                        .finish_with_assistant(
                            job_id,
                            format!("I hit a problem handling that: {}", failure.message),
                            actions,
                            draft_touched,
                            refined_touched,
                        )
                        .await;
                }
            };

            match outcome {
                AgentOutcome::ToolCall { tool, input } => {
                    let executed = self
                        .execute_tool(job_id, stage, &tool, input, &cancel)
                        .await?;
                    if let Some(action) = executed.action {
                        match &action {
                            CopilotAction::FieldUpdate { .. }
                            | CopilotAction::FieldBatchUpdate { .. } => draft_touched = true,
                            CopilotAction::RefinedFieldUpdate { .. }
                            | CopilotAction::RefinedFieldBatchUpdate { .. } => {
                                refined_touched = true
                            }
                            _ => {}
                        }
                        actions.push(action);
                    }
                    tool_outcomes.push(format!("{tool}: {}", executed.summary));
                    self.store
                        .append_copilot_message(
                            job_id,
                            CopilotMessage::new(MessageRole::Tool, executed.payload.to_string()),
                        )
                        .await?;
                }
                AgentOutcome::Final {
                    message,
                    actions: final_actions,
                    dropped_actions,
                } => {
                    if dropped_actions > 0 {
                        self.dropped_actions
                            .fetch_add(dropped_actions as u64, Ordering::Relaxed);
                        warn!(job_id, dropped_actions, "copilot dropped malformed actions");
                    }
                    actions.extend(final_actions);
                    return self
                        .finish_with_assistant(
                            job_id,
                            message,
                            actions,
                            draft_touched,
                            refined_touched,
                        )
                        .await;
                }
            }
        }

        // Tool budget exhausted without a final turn.
        let summary = if tool_outcomes.is_empty() {
            "I stopped before finishing; please try rephrasing.".to_string()
        } else {
            format!("I applied these changes: {}.", tool_outcomes.join("; "))
        };
        self.finish_with_assistant(job_id, summary, actions, draft_touched, refined_touched)
            .await
    }

    async fn finish_with_assistant(
        &self,
        job_id: &str,
        message: String,
        actions: Vec<CopilotAction>,
        draft_touched: bool,
        refined_touched: bool,
    ) -> Result<CopilotTurn, StoreError> {
        let messages = self
            .store
            .append_copilot_message(job_id, CopilotMessage::new(MessageRole::Assistant, message))
            .await?;
        let job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        Ok(CopilotTurn {
            messages,
            actions,
            updated_job_snapshot: draft_touched.then(|| job.state.clone()),
            updated_refined_snapshot: if refined_touched { job.refined } else { None },
        })
    }

    async fn execute_tool(
        &self,
        job_id: &str,
        stage: CopilotStage,
        tool: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecutedTool, StoreError> {
        match tool {
            "update_field" => {
                let Some(patch) = parse_field_patch(&input) else {
                    return Ok(self.drop_tool(job_id, tool, "invalid field patch"));
                };
                self.apply_field_patch(job_id, stage, patch).await
            }
            "update_fields" => {
                let patches = input
                    .get("updates")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().filter_map(parse_field_patch).collect::<Vec<_>>())
                    .unwrap_or_default();
                if patches.is_empty() {
                    return Ok(self.drop_tool(job_id, tool, "no valid updates"));
                }
                let mut applied = Vec::new();
                for patch in patches {
                    match self.apply_single_field(job_id, stage, &patch).await {
                        Ok(()) => applied.push(patch),
                        Err(err) => {
                            return Ok(ExecutedTool {
                                payload: json!({"tool": tool, "error": err.to_string()}),
                                summary: err.to_string(),
                                action: None,
                            })
                        }
                    }
                }
                let action = if stage == CopilotStage::Refine {
                    CopilotAction::RefinedFieldBatchUpdate { updates: applied.clone() }
                } else {
                    CopilotAction::FieldBatchUpdate { updates: applied.clone() }
                };
                Ok(ExecutedTool {
                    payload: json!({"tool": tool, "applied": applied.len()}),
                    summary: format!("updated {} fields", applied.len()),
                    action: Some(action),
                })
            }
            "refresh_channels" => {
                let job = self
                    .store
                    .get_job(job_id)
                    .await
                    .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
                let mut ctx = TaskContext::for_job(
                    job_id,
                    serde_json::to_value(job.final_draft()).unwrap_or(Value::Null),
                );
                ctx.allowed_channels = ChannelId::ALL.to_vec();
                let run = self
                    .orchestrator
                    .run("channels", &ctx, cancel.child_token())
                    .await
                    .map_err(|err| StoreError::InternalInvariant(err.to_string()))?;
                match run.output {
                    Ok(TaskOutput::Channels { recommendations }) => {
                        self.store
                            .set_channel_recommendations(job_id, recommendations.clone(), None)
                            .await?;
                        Ok(ExecutedTool {
                            payload: json!({
                                "tool": tool,
                                "channels": recommendations
                                    .iter()
                                    .map(|r| r.channel.as_str())
                                    .collect::<Vec<_>>(),
                            }),
                            summary: format!("{} channel recommendations", recommendations.len()),
                            action: Some(CopilotAction::ChannelRecommendationsUpdate {
                                recommendations,
                            }),
                        })
                    }
                    Ok(_) => Ok(self.drop_tool(job_id, tool, "unexpected channels output")),
                    Err(failure) => {
                        self.store
                            .set_channel_recommendations(job_id, Vec::new(), Some(failure.clone()))
                            .await?;
                        Ok(ExecutedTool {
                            payload: json!({"tool": tool, "error": failure.message}),
                            summary: format!("channel refresh failed: {}", failure.reason.as_str()),
                            action: None,
                        })
                    }
                }
            }
            "patch_asset" => {
                let asset_id = input
                    .get("assetId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let Some(content) = input.get("content").filter(|v| v.is_object()).cloned() else {
                    return Ok(self.drop_tool(job_id, tool, "missing content object"));
                };
                if asset_id.is_empty() {
                    return Ok(self.drop_tool(job_id, tool, "missing assetId"));
                }
                match self
                    .store
                    .upsert_asset(
                        job_id,
                        &asset_id,
                        AssetPatch {
                            content: Some(content.clone()),
                            ..AssetPatch::default()
                        },
                    )
                    .await
                {
                    Ok(_) => Ok(ExecutedTool {
                        payload: json!({"tool": tool, "assetId": asset_id}),
                        summary: format!("patched asset {asset_id}"),
                        action: Some(CopilotAction::AssetUpdate { asset_id, content }),
                    }),
                    Err(err) => Ok(ExecutedTool {
                        payload: json!({"tool": tool, "error": err.to_string()}),
                        summary: err.to_string(),
                        action: None,
                    }),
                }
            }
            other => Ok(self.drop_tool(job_id, other, "unknown tool")),
        }
    }

    async fn apply_field_patch(
        &self,
        job_id: &str,
        stage: CopilotStage,
        patch: FieldPatch,
    ) -> Result<ExecutedTool, StoreError> {
        match self.apply_single_field(job_id, stage, &patch).await {
            Ok(()) => {
                let summary = format!("set {}", patch.field_id.as_str());
                let action = if stage == CopilotStage::Refine {
                    CopilotAction::RefinedFieldUpdate {
                        field_id: patch.field_id,
                        value: patch.value.clone(),
                    }
                } else {
                    CopilotAction::FieldUpdate {
                        field_id: patch.field_id,
                        value: patch.value.clone(),
                    }
                };
                Ok(ExecutedTool {
                    payload: json!({
                        "tool": "update_field",
                        "fieldId": patch.field_id.as_str(),
                    }),
                    summary,
                    action: Some(action),
                })
            }
            Err(err) => Ok(ExecutedTool {
                payload: json!({"tool": "update_field", "error": err.to_string()}),
                summary: err.to_string(),
                action: None,
            }),
        }
    }

    async fn apply_single_field(
        &self,
        job_id: &str,
        stage: CopilotStage,
        patch: &FieldPatch,
    ) -> Result<(), StoreError> {
        if stage == CopilotStage::Refine {
            self.store
                .update_refined_field(job_id, patch.field_id, patch.value.clone())
                .await?;
        } else {
            self.store
                .update_draft_field(job_id, patch.field_id, patch.value.clone())
                .await?;
        }
        Ok(())
    }

    fn drop_tool(&self, job_id: &str, tool: &str, reason: &str) -> ExecutedTool {
        self.dropped_actions.fetch_add(1, Ordering::Relaxed);
        warn!(job_id, tool, reason, "dropped copilot tool call");
        ExecutedTool {
            payload: json!({"tool": tool, "error": reason}),
            summary: format!("{tool} rejected: {reason}"),
            action: None,
        }
    }
}

struct ExecutedTool {
    payload: Value,
    summary: String,
    action: Option<CopilotAction>,
}

fn parse_field_patch(input: &Value) -> Option<FieldPatch> {
    let field_id = input
        .get("fieldId")
        .and_then(|v| v.as_str())
        .and_then(FieldId::parse)?;
    let value = input.get("value")?.clone();
    Some(FieldPatch { field_id, value })
}
