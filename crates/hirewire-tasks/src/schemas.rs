//! JSON schemas handed to schema-capable providers for structured decoding.

use serde_json::{json, Value};

pub fn refine_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "refined_job": {"type": "object"},
            "summary": {"type": "string"},
            "analysis": {
                "type": "object",
                "properties": {
                    "improvement_score": {"type": "integer", "minimum": 0, "maximum": 100},
                    "original_score": {"type": "integer", "minimum": 0, "maximum": 100},
                    "impact_summary": {"type": "string"},
                    "key_improvements": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["improvement_score", "original_score", "impact_summary"],
            },
        },
        "required": ["refined_job", "summary", "analysis"],
    })
}

pub fn channels_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "recommendations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "channel": {"type": "string"},
                        "reason": {"type": "string"},
                        "expectedCPA": {"type": "number", "minimum": 0},
                    },
                    "required": ["channel", "reason"],
                },
            },
        },
        "required": ["recommendations"],
    })
}

pub fn channel_picker_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "top_channel": {
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "fit_score": {"type": "integer", "minimum": 0, "maximum": 100},
                    "reason_short": {"type": "string"},
                },
                "required": ["id", "fit_score", "reason_short"],
            },
            "recommended_medium": {"type": "string", "enum": ["video", "image", "text"]},
            "copy_hint": {"type": "string"},
            "alternatives": {"type": "array", "maxItems": 2},
            "compliance_flags": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
        },
        "required": ["top_channel", "recommended_medium", "copy_hint"],
    })
}

pub fn asset_copy_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "plan_id": {"type": "string"},
            "content": {
                "type": "object",
                "properties": {
                    "headline": {"type": "string"},
                    "body": {"type": "string"},
                    "cta": {"type": "string"},
                    "hashtags": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["headline", "body"],
            },
        },
        "required": ["plan_id", "content"],
    })
}

pub fn asset_batch_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "plan_id": {"type": "string"},
                        "channel": {"type": "string"},
                        "format": {"type": "string"},
                        "content": {"type": "object"},
                    },
                    "required": ["plan_id", "content"],
                },
            },
        },
        "required": ["items"],
    })
}

pub fn video_config_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "duration_seconds": {"type": "integer", "minimum": 15, "maximum": 60},
            "aspect_ratio": {"type": "string", "enum": ["9:16", "1:1", "16:9"]},
            "tone": {"type": "string"},
            "music_style": {"type": "string"},
        },
        "required": ["duration_seconds", "aspect_ratio", "tone"],
    })
}

pub fn video_storyboard_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "scenes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "sequence": {"type": "integer", "minimum": 1},
                        "narration": {"type": "string"},
                        "visual": {"type": "string"},
                        "duration_seconds": {"type": "number"},
                    },
                    "required": ["sequence", "narration", "visual"],
                },
            },
        },
        "required": ["scenes"],
    })
}

pub fn caption_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "caption": {"type": "string", "maxLength": 180},
            "hashtags": {"type": "array", "maxItems": 5, "items": {"type": "string"}},
        },
        "required": ["caption"],
    })
}

pub fn video_compliance_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "approved": {"type": "boolean"},
            "flags": {"type": "array", "items": {"type": "string"}},
            "revised_caption": {"type": "string"},
        },
        "required": ["approved", "flags"],
    })
}

pub fn image_prompt_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "prompt": {"type": "string"},
        },
        "required": ["prompt"],
    })
}
