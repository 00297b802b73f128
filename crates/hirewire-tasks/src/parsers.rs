use serde_json::{Map, Value};

use hirewire_providers::ProviderResponse;
use hirewire_types::{
    dedupe_recommendations, ChannelId, ChannelRecommendation, CopilotAction, FailureReason,
    FieldId, JobDraft, RefineMetadata, TaskFailure,
};

use crate::{
    AgentOutcome, AssetCopy, AutofillCandidate, ChannelPick, ChannelPickerOutcome, RecommendedMedium,
    RefineOutcome, TaskContext, TaskOutput,
};

/// Structured JSON first, then a best-effort extraction from the text body.
pub fn structured_value(resp: &ProviderResponse) -> Result<Value, TaskFailure> {
    if let Some(json) = &resp.json {
        if json.is_object() || json.is_array() {
            return Ok(json.clone());
        }
    }
    let text = resp.text.trim();
    if text.is_empty() {
        return Err(TaskFailure::new(
            FailureReason::EmptyResponse,
            "provider returned an empty response",
        ));
    }
    extract_json_from_text(text).ok_or_else(|| {
        TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "no JSON object found in response",
            &resp.text,
        )
    })
}

/// Tolerates markdown fences, leading/trailing prose, and a single
/// trailing comma inside objects or arrays.
pub fn extract_json_from_text(text: &str) -> Option<Value> {
    if let Some(inner) = fenced_block(text) {
        if let Some(value) = lenient_parse(inner) {
            return Some(value);
        }
    }
    let candidate = first_json_object(text)?;
    lenient_parse(&candidate)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First balanced `{...}` in the text, aware of string literals.
fn first_json_object(text: &str) -> Option<String> {
    let open = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[open..open + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn lenient_parse(input: &str) -> Option<Value> {
    serde_json::from_str(input)
        .ok()
        .or_else(|| serde_json::from_str(&strip_trailing_commas(input)).ok())
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = input.chars().collect();
    for (index, &ch) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            ',' if !in_string => {
                let next_significant = chars[index + 1..]
                    .iter()
                    .find(|c| !c.is_whitespace())
                    .copied();
                if !matches!(next_significant, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

pub fn clamp_score(value: &Value) -> Option<u8> {
    let raw = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    Some(raw.clamp(0, 100) as u8)
}

pub fn clamp_confidence(value: &Value) -> Option<f64> {
    let raw = value.as_f64()?;
    Some(raw.clamp(0.0, 1.0))
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parser_exception(resp: &ProviderResponse, detail: &str) -> TaskFailure {
    TaskFailure::with_preview(FailureReason::ParserException, detail, &resp.text)
}

pub fn parse_suggest(resp: &ProviderResponse, ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let Some(raw_candidates) = value.get("autofill_candidates").and_then(|v| v.as_array()) else {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks autofill_candidates",
            &resp.text,
        ));
    };

    let snapshot: JobDraft = serde_json::from_value(ctx.job.clone()).unwrap_or_default();
    let mut candidates = Vec::new();
    for raw in raw_candidates {
        let Some(obj) = raw.as_object() else { continue };
        let Some(field_id) = obj
            .get("fieldId")
            .and_then(|v| v.as_str())
            .and_then(FieldId::parse)
        else {
            continue;
        };
        // Contract: suggestions only for empty fields or explicitly visible ones.
        let allowed =
            snapshot.get(field_id).is_none() || ctx.visible_field_ids.contains(&field_id);
        if !allowed {
            continue;
        }
        let Some(value) = obj.get("value").filter(|v| !v.is_null()).cloned() else {
            continue;
        };
        candidates.push(AutofillCandidate {
            field_id,
            value,
            rationale: string_field(obj, "rationale"),
            confidence: obj
                .get("confidence")
                .and_then(clamp_confidence)
                .unwrap_or(0.5),
            source: string_field(obj, "source"),
        });
    }
    Ok(TaskOutput::Suggest { candidates })
}

/// Scalars may arrive as numbers and list fields as bare strings; coerce
/// before applying so a sloppy model response still lands.
fn coerce_draft_value(field: FieldId, value: Value) -> Value {
    match (&value, field.is_list()) {
        (Value::Number(n), false) => Value::String(n.to_string()),
        (Value::String(s), true) => Value::Array(vec![Value::String(s.clone())]),
        _ => value,
    }
}

pub fn parse_refine(resp: &ProviderResponse, ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let Some(refined_obj) = value.get("refined_job").and_then(|v| v.as_object()) else {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks refined_job",
            &resp.text,
        ));
    };

    let snapshot: JobDraft = serde_json::from_value(ctx.job.clone()).unwrap_or_default();
    let mut refined = JobDraft::default();
    for field in FieldId::ALL {
        let incoming = refined_obj
            .get(field.as_str())
            .filter(|v| !v.is_null())
            .cloned();
        let applied = incoming
            .map(|raw| refined.set_field(field, coerce_draft_value(field, raw)).is_ok())
            .unwrap_or(false);
        // Missing or malformed values fall back to the submitted draft.
        if !applied {
            if let Some(original) = snapshot.get(field) {
                let _ = refined.set_field(field, original);
            }
        }
    }
    let refined = refined
        .normalized()
        .unwrap_or_else(|_| snapshot.clone());

    let analysis = value
        .get("analysis")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let metadata = RefineMetadata {
        improvement_score: analysis
            .get("improvement_score")
            .and_then(clamp_score)
            .unwrap_or(0),
        original_score: analysis
            .get("original_score")
            .and_then(clamp_score)
            .unwrap_or(0),
        key_improvements: string_list(analysis.get("key_improvements")),
        impact_summary: string_field(&analysis, "impact_summary"),
    };
    let summary = value
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or(&metadata.impact_summary)
        .trim()
        .to_string();

    Ok(TaskOutput::Refine(RefineOutcome {
        refined,
        summary,
        metadata,
    }))
}

pub fn parse_channels(resp: &ProviderResponse, ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let Some(raw_recs) = value.get("recommendations").and_then(|v| v.as_array()) else {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks recommendations",
            &resp.text,
        ));
    };

    let mut recommendations = Vec::new();
    for raw in raw_recs {
        let Some(obj) = raw.as_object() else { continue };
        // Unmapped channel tokens drop silently.
        let Some(channel) = obj
            .get("channel")
            .and_then(|v| v.as_str())
            .and_then(ChannelId::from_token)
        else {
            continue;
        };
        if !ctx.allowed_channels.contains(&channel) {
            continue;
        }
        let reason = string_field(obj, "reason");
        if reason.is_empty() {
            continue;
        }
        let expected_cpa = obj
            .get("expectedCPA")
            .or_else(|| obj.get("expected_cpa"))
            .and_then(|v| v.as_f64())
            .map(|v| v.max(0.0));
        recommendations.push(ChannelRecommendation {
            channel,
            reason,
            expected_cpa,
        });
    }
    Ok(TaskOutput::Channels {
        recommendations: dedupe_recommendations(recommendations),
    })
}

fn parse_pick(obj: &Map<String, Value>, ctx: &TaskContext) -> Result<ChannelPick, TaskFailure> {
    let raw_id = obj.get("id").and_then(|v| v.as_str()).unwrap_or_default();
    let channel = ChannelId::from_token(raw_id)
        .filter(|c| ctx.allowed_channels.contains(c))
        .ok_or_else(|| {
            TaskFailure::new(
                FailureReason::InvalidChannel,
                format!("channel `{raw_id}` is not in the allow-list"),
            )
        })?;
    let fit_score = obj
        .get("fit_score")
        .and_then(clamp_score)
        .ok_or_else(|| {
            TaskFailure::new(
                FailureReason::InvalidFitScore,
                "fit_score is missing or not numeric",
            )
        })?;
    Ok(ChannelPick {
        id: channel,
        fit_score,
        reason_short: string_field(obj, "reason_short"),
    })
}

pub fn parse_channel_picker(
    resp: &ProviderResponse,
    ctx: &TaskContext,
) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let Some(top_obj) = value.get("top_channel").and_then(|v| v.as_object()) else {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks top_channel",
            &resp.text,
        ));
    };
    let top_channel = parse_pick(top_obj, ctx)?;

    let recommended_medium = match value.get("recommended_medium").and_then(|v| v.as_str()) {
        Some("video") => Some(RecommendedMedium::Video),
        Some("image") => Some(RecommendedMedium::Image),
        Some("text") => Some(RecommendedMedium::Text),
        // Unknown enum values coerce to none rather than being preserved.
        _ => None,
    };

    let alternatives = value
        .get("alternatives")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object())
                .filter_map(|obj| parse_pick(obj, ctx).ok())
                .take(2)
                .collect()
        })
        .unwrap_or_default();

    let mut compliance_flags = string_list(value.get("compliance_flags"));
    compliance_flags.truncate(5);

    Ok(TaskOutput::ChannelPick(ChannelPickerOutcome {
        top_channel,
        recommended_medium,
        copy_hint: value
            .get("copy_hint")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string(),
        alternatives,
        compliance_flags,
    }))
}

pub fn parse_asset_copy(
    resp: &ProviderResponse,
    ctx: &TaskContext,
) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let plan_id = value
        .get("plan_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| ctx.plan_id.clone())
        .ok_or_else(|| {
            TaskFailure::with_preview(
                FailureReason::StructuredMissing,
                "response lacks plan_id",
                &resp.text,
            )
        })?;
    let content = match value.get("content") {
        Some(content) if content.is_object() => content.clone(),
        _ => {
            return Err(TaskFailure::with_preview(
                FailureReason::StructuredMissing,
                "response lacks a content object",
                &resp.text,
            ))
        }
    };
    Ok(TaskOutput::AssetCopy(AssetCopy { plan_id, content }))
}

pub fn parse_asset_batch(
    resp: &ProviderResponse,
    _ctx: &TaskContext,
) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let Some(raw_items) = value.get("items").and_then(|v| v.as_array()) else {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks items",
            &resp.text,
        ));
    };
    let items = raw_items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let plan_id = obj.get("plan_id").and_then(|v| v.as_str())?.to_string();
            let content = obj.get("content").filter(|v| v.is_object())?.clone();
            Some(AssetCopy { plan_id, content })
        })
        .collect::<Vec<_>>();
    if items.is_empty() {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "items carried no usable entries",
            &resp.text,
        ));
    }
    Ok(TaskOutput::AssetBatch { items })
}

pub fn parse_video_stage(
    resp: &ProviderResponse,
    _ctx: &TaskContext,
) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    if !value.is_object() {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "video stage output must be an object",
            &resp.text,
        ));
    }
    Ok(TaskOutput::VideoStage { output: value })
}

pub fn parse_image_prompt(
    resp: &ProviderResponse,
    _ctx: &TaskContext,
) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let prompt = value
        .get("prompt")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if prompt.is_empty() {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks a prompt",
            &resp.text,
        ));
    }
    Ok(TaskOutput::ImagePrompt { prompt })
}

const CAPTION_MAX_CHARS: usize = 180;

pub fn parse_image_caption(
    resp: &ProviderResponse,
    _ctx: &TaskContext,
) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    let raw_caption = value
        .get("caption")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if raw_caption.is_empty() {
        return Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "response lacks a caption",
            &resp.text,
        ));
    }
    let caption: String = raw_caption.chars().take(CAPTION_MAX_CHARS).collect();
    let mut hashtags = string_list(value.get("hashtags"));
    hashtags.truncate(5);
    Ok(TaskOutput::ImageCaption { caption, hashtags })
}

pub fn parse_agent(resp: &ProviderResponse, _ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
    let value = structured_value(resp)?;
    match value.get("type").and_then(|v| v.as_str()) {
        Some("tool_call") => {
            let tool = value
                .get("tool")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if tool.is_empty() {
                return Err(parser_exception(resp, "tool_call without a tool name"));
            }
            Ok(TaskOutput::Agent(AgentOutcome::ToolCall {
                tool,
                input: value.get("input").cloned().unwrap_or(Value::Null),
            }))
        }
        Some("final") => {
            let message = value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .trim()
                .to_string();
            if message.is_empty() {
                return Err(TaskFailure::with_preview(
                    FailureReason::EmptyResponse,
                    "final turn carried no message",
                    &resp.text,
                ));
            }
            let raw_actions = value
                .get("actions")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let mut actions = Vec::new();
            let mut dropped_actions = 0u32;
            for raw in raw_actions {
                match serde_json::from_value::<CopilotAction>(raw) {
                    Ok(action) => actions.push(action),
                    Err(_) => dropped_actions += 1,
                }
            }
            Ok(TaskOutput::Agent(AgentOutcome::Final {
                message,
                actions,
                dropped_actions,
            }))
        }
        _ => Err(TaskFailure::with_preview(
            FailureReason::StructuredMissing,
            "agent response is neither tool_call nor final",
            &resp.text,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            text: text.to_string(),
            json: None,
            metadata: Default::default(),
        }
    }

    fn json_response(value: Value) -> ProviderResponse {
        ProviderResponse {
            text: value.to_string(),
            json: Some(value),
            metadata: Default::default(),
        }
    }

    fn ctx_with_channels() -> TaskContext {
        let mut ctx = TaskContext::for_job("job-1", json!({}));
        ctx.allowed_channels = vec![ChannelId::Linkedin, ChannelId::X];
        ctx
    }

    #[test]
    fn extracts_json_from_fenced_block() {
        let resp = text_response("Here you go:\n```json\n{\"recommendations\": []}\n```\nEnjoy!");
        let value = structured_value(&resp).expect("value");
        assert!(value.get("recommendations").is_some());
    }

    #[test]
    fn extracts_json_from_surrounding_prose() {
        let resp = text_response("Sure! {\"prompt\": \"a sunlit office\"} hope that helps");
        let value = structured_value(&resp).expect("value");
        assert_eq!(value["prompt"], "a sunlit office");
    }

    #[test]
    fn tolerates_single_trailing_comma() {
        let resp = text_response("{\"caption\": \"join us\", \"hashtags\": [\"jobs\",],}");
        let value = structured_value(&resp).expect("value");
        assert_eq!(value["hashtags"][0], "jobs");
    }

    #[test]
    fn prose_without_json_is_structured_missing() {
        let resp = text_response("Sure, here's the JSON: nonsense without braces");
        let err = structured_value(&resp).unwrap_err();
        assert_eq!(err.reason, FailureReason::StructuredMissing);
        assert!(err.raw_preview.is_some());
    }

    #[test]
    fn empty_body_is_empty_response() {
        let err = structured_value(&text_response("   ")).unwrap_err();
        assert_eq!(err.reason, FailureReason::EmptyResponse);
    }

    #[test]
    fn refine_falls_back_to_snapshot_for_missing_fields() {
        let mut ctx = TaskContext::for_job(
            "job-1",
            json!({"roleTitle": "Engineer", "location": "Tel Aviv, Israel"}),
        );
        ctx.allowed_channels = vec![];
        let resp = json_response(json!({
            "refined_job": {"roleTitle": "Senior Engineer"},
            "summary": "Sharpened the title.",
            "analysis": {
                "improvement_score": 250,
                "original_score": -3,
                "impact_summary": "Stronger senior applicant pool.",
                "key_improvements": ["clearer title"],
            },
        }));
        let TaskOutput::Refine(outcome) = parse_refine(&resp, &ctx).expect("parsed") else {
            panic!("wrong variant");
        };
        assert_eq!(outcome.refined.role_title.as_deref(), Some("Senior Engineer"));
        assert_eq!(outcome.refined.location.as_deref(), Some("Tel Aviv, Israel"));
        assert_eq!(outcome.metadata.improvement_score, 100);
        assert_eq!(outcome.metadata.original_score, 0);
        assert_eq!(outcome.summary, "Sharpened the title.");
    }

    #[test]
    fn channels_filters_allow_list_and_dedupes() {
        let ctx = ctx_with_channels();
        let resp = json_response(json!({
            "recommendations": [
                {"channel": "LinkedIn", "reason": "Senior tech fit", "expectedCPA": 42.0},
                {"channel": "linkedin", "reason": "dup"},
                {"channel": "myspace", "reason": "no"},
                {"channel": "TIKTOK", "reason": "not allowed here"},
                {"channel": "x", "reason": "Tech reach", "expectedCPA": -5.0},
            ],
        }));
        let TaskOutput::Channels { recommendations } =
            parse_channels(&resp, &ctx).expect("parsed")
        else {
            panic!("wrong variant");
        };
        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].channel, ChannelId::Linkedin);
        assert_eq!(recommendations[0].expected_cpa, Some(42.0));
        assert_eq!(recommendations[1].channel, ChannelId::X);
        assert_eq!(recommendations[1].expected_cpa, Some(0.0));
    }

    #[test]
    fn channel_picker_rejects_off_list_top_channel() {
        let ctx = ctx_with_channels();
        let resp = json_response(json!({
            "top_channel": {"id": "tiktok", "fit_score": 80, "reason_short": "gen z"},
            "recommended_medium": "video",
            "copy_hint": "keep it playful",
        }));
        let err = parse_channel_picker(&resp, &ctx).unwrap_err();
        assert_eq!(err.reason, FailureReason::InvalidChannel);
    }

    #[test]
    fn channel_picker_flags_non_numeric_fit_score() {
        let ctx = ctx_with_channels();
        let resp = json_response(json!({
            "top_channel": {"id": "linkedin", "fit_score": "high", "reason_short": "fit"},
            "recommended_medium": "text",
            "copy_hint": "",
        }));
        let err = parse_channel_picker(&resp, &ctx).unwrap_err();
        assert_eq!(err.reason, FailureReason::InvalidFitScore);
    }

    #[test]
    fn channel_picker_coerces_unknown_medium_and_truncates_lists() {
        let ctx = ctx_with_channels();
        let resp = json_response(json!({
            "top_channel": {"id": "linkedin", "fit_score": 91, "reason_short": "fit"},
            "recommended_medium": "hologram",
            "copy_hint": "professional tone",
            "alternatives": [
                {"id": "x", "fit_score": 70, "reason_short": "a"},
                {"id": "x", "fit_score": 60, "reason_short": "b"},
                {"id": "x", "fit_score": 50, "reason_short": "c"},
            ],
            "compliance_flags": ["a", "b", "c", "d", "e", "f", "g"],
        }));
        let TaskOutput::ChannelPick(outcome) = parse_channel_picker(&resp, &ctx).expect("parsed")
        else {
            panic!("wrong variant");
        };
        assert_eq!(outcome.recommended_medium, None);
        assert_eq!(outcome.alternatives.len(), 2);
        assert_eq!(outcome.compliance_flags.len(), 5);
    }

    #[test]
    fn suggest_skips_filled_fields_unless_visible() {
        let mut ctx = TaskContext::for_job("job-1", json!({"roleTitle": "Engineer"}));
        ctx.visible_field_ids = vec![FieldId::Location];
        let resp = json_response(json!({
            "autofill_candidates": [
                {"fieldId": "roleTitle", "value": "Staff Engineer", "confidence": 0.9},
                {"fieldId": "location", "value": "Berlin", "confidence": 3.5},
                {"fieldId": "unknownField", "value": "x"},
                {"fieldId": "industry", "value": null},
            ],
        }));
        let TaskOutput::Suggest { candidates } = parse_suggest(&resp, &ctx).expect("parsed") else {
            panic!("wrong variant");
        };
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].field_id, FieldId::Location);
        assert_eq!(candidates[0].confidence, 1.0);
    }

    #[test]
    fn image_caption_truncates_to_180_chars() {
        let long = "a".repeat(400);
        let resp = json_response(json!({
            "caption": long,
            "hashtags": ["a", "b", "c", "d", "e", "f", "g", "h", "i"],
        }));
        let ctx = TaskContext::default();
        let TaskOutput::ImageCaption { caption, hashtags } =
            parse_image_caption(&resp, &ctx).expect("parsed")
        else {
            panic!("wrong variant");
        };
        assert_eq!(caption.chars().count(), 180);
        assert_eq!(hashtags.len(), 5);
    }

    #[test]
    fn agent_parses_both_arms_and_counts_dropped_actions() {
        let ctx = TaskContext::default();
        let tool = json_response(json!({
            "type": "tool_call", "tool": "update_field",
            "input": {"fieldId": "seniorityLevel", "value": "senior"},
        }));
        let TaskOutput::Agent(AgentOutcome::ToolCall { tool, .. }) =
            parse_agent(&tool, &ctx).expect("parsed")
        else {
            panic!("wrong variant");
        };
        assert_eq!(tool, "update_field");

        let done = json_response(json!({
            "type": "final",
            "message": "All set.",
            "actions": [
                {"type": "field_update", "fieldId": "seniorityLevel", "value": "senior"},
                {"type": "launch_rockets", "payload": {}},
            ],
        }));
        let TaskOutput::Agent(AgentOutcome::Final { actions, dropped_actions, .. }) =
            parse_agent(&done, &ctx).expect("parsed")
        else {
            panic!("wrong variant");
        };
        assert_eq!(actions.len(), 1);
        assert_eq!(dropped_actions, 1);
    }

    #[test]
    fn asset_batch_keeps_only_well_formed_items() {
        let ctx = TaskContext::default();
        let resp = json_response(json!({
            "items": [
                {"plan_id": "linkedin:feed", "content": {"headline": "a", "body": "b"}},
                {"plan_id": "x:post"},
                {"content": {"headline": "orphan"}},
            ],
        }));
        let TaskOutput::AssetBatch { items } = parse_asset_batch(&resp, &ctx).expect("parsed")
        else {
            panic!("wrong variant");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].plan_id, "linkedin:feed");

        let empty = json_response(json!({"items": []}));
        assert!(parse_asset_batch(&empty, &ctx).is_err());
    }

    #[test]
    fn asset_copy_uses_context_plan_id_when_response_omits_it() {
        let mut ctx = TaskContext::default();
        ctx.plan_id = Some("linkedin_feed_post".to_string());
        let resp = json_response(json!({"content": {"headline": "Join us", "body": "..."}}));
        let TaskOutput::AssetCopy(copy) = parse_asset_copy(&resp, &ctx).expect("parsed") else {
            panic!("wrong variant");
        };
        assert_eq!(copy.plan_id, "linkedin_feed_post");
    }
}
