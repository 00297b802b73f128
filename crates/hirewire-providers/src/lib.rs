use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub mod routing;

pub use routing::{Route, RoutingPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOverride {
    pub provider: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
    #[serde(default)]
    pub routes: HashMap<String, RouteOverride>,
    pub media_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    Text,
    Json,
}

/// One prompt-shaped unit of provider work. Adapters never mutate the
/// request and never truncate prompts.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub mode: DecodeMode,
    pub temperature: f32,
    pub max_tokens: u32,
    pub output_schema: Option<Value>,
    pub task_type: String,
    pub route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub text: String,
    pub json: Option<Value>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub default_model: String,
    pub supports_output_schema: bool,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;
    async fn invoke(
        &self,
        request: &InvokeRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ProviderResponse>;
}

#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<Vec<Arc<dyn Provider>>>>,
}

impl ProviderRegistry {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            providers: Arc::new(RwLock::new(build_providers(config))),
        }
    }

    /// Test seam: a registry over explicit provider instances.
    pub fn from_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers: Arc::new(RwLock::new(providers)),
        }
    }

    pub async fn reload(&self, config: &AppConfig) {
        *self.providers.write().await = build_providers(config);
    }

    pub async fn infos(&self) -> Vec<ProviderInfo> {
        self.providers
            .read()
            .await
            .iter()
            .map(|p| p.info())
            .collect()
    }

    pub async fn get(&self, provider_id: &str) -> anyhow::Result<Arc<dyn Provider>> {
        let providers = self.providers.read().await;
        if let Some(provider) = providers.iter().find(|p| p.info().id == provider_id) {
            return Ok(provider.clone());
        }
        let available = providers
            .iter()
            .map(|p| p.info().id)
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::bail!("provider `{provider_id}` is not configured. configured providers: {available}");
    }
}

fn build_providers(config: &AppConfig) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    add_openai_provider(
        config,
        &mut providers,
        "openai",
        "OpenAI",
        "https://api.openai.com/v1",
        "gpt-4o-mini",
        true,
    );
    add_openai_provider(
        config,
        &mut providers,
        "groq",
        "Groq",
        "https://api.groq.com/openai/v1",
        "llama-3.1-8b-instant",
        false,
    );
    add_openai_provider(
        config,
        &mut providers,
        "mistral",
        "Mistral",
        "https://api.mistral.ai/v1",
        "mistral-small-latest",
        false,
    );
    add_openai_provider(
        config,
        &mut providers,
        "openrouter",
        "OpenRouter",
        "https://openrouter.ai/api/v1",
        "openai/gpt-4o-mini",
        true,
    );

    if let Some(anthropic) = config.providers.get("anthropic") {
        providers.push(Arc::new(AnthropicProvider {
            api_key: anthropic
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(|key| key.to_string())
                .or_else(|| {
                    std::env::var("ANTHROPIC_API_KEY")
                        .ok()
                        .filter(|v| !v.trim().is_empty())
                }),
            default_model: anthropic
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
            client: Client::new(),
        }));
    }

    if providers.is_empty() {
        providers.push(Arc::new(LocalEchoProvider));
    }

    providers
}

fn add_openai_provider(
    config: &AppConfig,
    providers: &mut Vec<Arc<dyn Provider>>,
    id: &str,
    name: &str,
    default_url: &str,
    default_model: &str,
    supports_output_schema: bool,
) {
    let Some(entry) = config.providers.get(id) else {
        return;
    };
    providers.push(Arc::new(OpenAICompatibleProvider {
        id: id.to_string(),
        name: name.to_string(),
        base_url: normalize_base(entry.url.as_deref().unwrap_or(default_url)),
        api_key: entry
            .api_key
            .as_deref()
            .filter(|key| !is_placeholder_api_key(key))
            .map(|key| key.to_string())
            .or_else(|| env_api_key_for_provider(id)),
        default_model: entry
            .default_model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        supports_output_schema,
        client: Client::new(),
    }));
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

fn env_api_key_for_provider(id: &str) -> Option<String> {
    let env_name = match id {
        "openai" => Some("OPENAI_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }?;
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Rate-limit classification used by the orchestrator's retry loop.
pub fn is_rate_limit_error(message: &str) -> bool {
    message.contains("429")
        || message.contains("RESOURCE_EXHAUSTED")
        || message.to_lowercase().contains("rate limit")
        || message.to_lowercase().contains("quota")
}

struct LocalEchoProvider;

#[async_trait]
impl Provider for LocalEchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Echo".to_string(),
            default_model: "echo-1".to_string(),
            supports_output_schema: false,
        }
    }

    async fn invoke(
        &self,
        request: &InvokeRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ProviderResponse> {
        Ok(ProviderResponse {
            text: format!("Echo: {}", request.user),
            json: None,
            metadata: ResponseMetadata {
                model: "echo-1".to_string(),
                finish_reason: "stop".to_string(),
                ..ResponseMetadata::default()
            },
        })
    }
}

struct OpenAICompatibleProvider {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    supports_output_schema: bool,
    client: Client,
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            default_model: self.default_model.clone(),
            supports_output_schema: self.supports_output_schema,
        }
    }

    async fn invoke(
        &self,
        request: &InvokeRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ProviderResponse> {
        let model = if request.model.trim().is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });
        if request.mode == DecodeMode::Json {
            body["response_format"] = match (&request.output_schema, self.supports_output_schema) {
                (Some(schema), true) => json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": request.task_type,
                        "schema": schema,
                        "strict": true,
                    }
                }),
                _ => json!({"type": "json_object"}),
            };
        }

        let mut req = self.client.post(url).json(&body);
        if self.id == "openrouter" {
            req = req.header("X-Title", "Hirewire");
        }
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("provider request cancelled"),
            sent = req.send() => sent?,
        };
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "provider request failed with status {}: {}",
                status,
                truncate_for_error(&text, 500)
            );
        }
        let value: Value = response.json().await?;
        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }

        let Some(text) = extract_openai_text(&value) else {
            anyhow::bail!(
                "provider returned no completion content for model `{}` (response: {})",
                model,
                truncate_for_error(&value.to_string(), 500)
            );
        };
        let parsed = if request.mode == DecodeMode::Json {
            serde_json::from_str::<Value>(text.trim()).ok()
        } else {
            None
        };
        Ok(ProviderResponse {
            json: parsed,
            metadata: response_metadata(&value, model),
            text,
        })
    }
}

struct AnthropicProvider {
    api_key: Option<String>,
    default_model: String,
    client: Client,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "anthropic".to_string(),
            name: "Anthropic".to_string(),
            default_model: self.default_model.clone(),
            supports_output_schema: true,
        }
    }

    async fn invoke(
        &self,
        request: &InvokeRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ProviderResponse> {
        let model = if request.model.trim().is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
        });
        // Anthropic has no JSON response mode; a forced tool call carries
        // the output schema instead.
        if request.mode == DecodeMode::Json {
            if let Some(schema) = &request.output_schema {
                body["tools"] = json!([{
                    "name": "structured_output",
                    "description": "Return the structured task result.",
                    "input_schema": schema,
                }]);
                body["tool_choice"] = json!({"type": "tool", "name": "structured_output"});
            }
        }

        let mut req = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("provider request cancelled"),
            sent = req.send() => sent?,
        };
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "provider request failed with status {}: {}",
                status,
                truncate_for_error(&text, 500)
            );
        }
        let value: Value = response.json().await?;
        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }

        let mut text = String::new();
        let mut structured = None;
        for block in value
            .get("content")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
        {
            match block.get("type").and_then(|v| v.as_str()).unwrap_or_default() {
                "text" => {
                    if let Some(chunk) = block.get("text").and_then(|v| v.as_str()) {
                        text.push_str(chunk);
                    }
                }
                "tool_use" => {
                    if let Some(input) = block.get("input") {
                        structured = Some(input.clone());
                        if text.is_empty() {
                            text = input.to_string();
                        }
                    }
                }
                _ => {}
            }
        }
        if structured.is_none() && request.mode == DecodeMode::Json {
            structured = serde_json::from_str::<Value>(text.trim()).ok();
        }

        let usage = value.get("usage").cloned().unwrap_or_default();
        Ok(ProviderResponse {
            text,
            json: structured,
            metadata: ResponseMetadata {
                input_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                output_tokens: usage
                    .get("output_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                model: model.to_string(),
                finish_reason: value
                    .get("stop_reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("stop")
                    .to_string(),
            },
        })
    }
}

fn normalize_base(input: &str) -> String {
    if input.ends_with("/v1") {
        input.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", input.trim_end_matches('/'))
    }
}

pub fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        input.to_string()
    } else {
        let clipped: String = input.chars().take(max_len).collect();
        format!("{clipped}...")
    }
}

fn response_metadata(value: &Value, model: &str) -> ResponseMetadata {
    let usage = value.get("usage").cloned().unwrap_or_default();
    ResponseMetadata {
        input_tokens: usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        output_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        model: value
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(model)
            .to_string(),
        finish_reason: value
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("finish_reason"))
            .and_then(|v| v.as_str())
            .unwrap_or("stop")
            .to_string(),
    }
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let content = value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?;
    match content {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    out.push_str(text);
                }
            }
            if out.trim().is_empty() {
                None
            } else {
                Some(out)
            }
        }
        _ => None,
    }
}

fn extract_openai_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider_ids: &[&str], default_provider: Option<&str>) -> AppConfig {
        let mut providers = HashMap::new();
        for id in provider_ids {
            providers.insert(
                (*id).to_string(),
                ProviderConfig {
                    api_key: Some("test-key".to_string()),
                    url: None,
                    default_model: Some(format!("{id}-model")),
                },
            );
        }
        AppConfig {
            providers,
            default_provider: default_provider.map(|s| s.to_string()),
            routes: HashMap::new(),
            media_base_url: None,
        }
    }

    #[tokio::test]
    async fn registry_resolves_configured_provider() {
        let registry = ProviderRegistry::new(&cfg(&["openai", "anthropic"], None));
        let provider = registry.get("anthropic").await.expect("provider");
        assert_eq!(provider.info().id, "anthropic");
        assert!(provider.info().supports_output_schema);
    }

    #[tokio::test]
    async fn registry_rejects_unknown_provider_with_listing() {
        let registry = ProviderRegistry::new(&cfg(&["openai"], None));
        let err = registry.get("gemini").await.err().expect("error");
        assert!(err.to_string().contains("provider `gemini` is not configured"));
        assert!(err.to_string().contains("openai"));
    }

    #[tokio::test]
    async fn empty_config_falls_back_to_local_echo() {
        let registry = ProviderRegistry::new(&AppConfig::default());
        let infos = registry.infos().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "local");
    }

    #[test]
    fn rate_limit_classification_matches_known_shapes() {
        assert!(is_rate_limit_error("provider request failed with status 429: slow down"));
        assert!(is_rate_limit_error("RESOURCE_EXHAUSTED: try later"));
        assert!(is_rate_limit_error("Rate limit reached for gpt-4o"));
        assert!(is_rate_limit_error("monthly quota exceeded"));
        assert!(!is_rate_limit_error("connection reset by peer"));
    }

    #[test]
    fn placeholder_keys_are_ignored() {
        assert!(is_placeholder_api_key(" "));
        assert!(is_placeholder_api_key("x"));
        assert!(is_placeholder_api_key("PLACEHOLDER"));
        assert!(!is_placeholder_api_key("sk-real"));
    }

    #[test]
    fn normalize_base_appends_v1_once() {
        assert_eq!(normalize_base("https://api.openai.com/v1"), "https://api.openai.com/v1");
        assert_eq!(normalize_base("https://proxy.local/"), "https://proxy.local/v1");
    }
}
