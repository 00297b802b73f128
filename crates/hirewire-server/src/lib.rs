use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use hirewire_assets::{AssetCoordinator, HeroImageRunner, VideoRunner};
use hirewire_copilot::CopilotEngine;
use hirewire_store::JobStore;
use hirewire_tasks::Orchestrator;

mod http;

pub use http::{app_router, serve};

/// Lifecycle event fanned out to SSE subscribers. The UI still polls job
/// snapshots; events are a hint to poll sooner.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub event: String,
    pub properties: Value,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: u64,
}

impl EngineEvent {
    pub fn new(event: impl Into<String>, properties: Value) -> Self {
        Self {
            event: event.into(),
            properties,
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub coordinator: Arc<AssetCoordinator>,
    pub hero: Arc<HeroImageRunner>,
    pub video: Arc<VideoRunner>,
    pub copilot: Arc<CopilotEngine>,
    pub events: EventBus,
    pub api_token: Option<String>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn build_id() -> String {
    if let Some(explicit) = option_env!("HIREWIRE_BUILD_ID") {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    env!("CARGO_PKG_VERSION").to_string()
}
