use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{AppConfig, ProviderInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub provider: String,
    pub model: String,
}

/// Tasks whose contracts demand a provider that advertises structured
/// output support.
const SCHEMA_TASKS: [&str; 12] = [
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
];

/// Latency-sensitive conversational tasks.
const FAST_TASKS: [&str; 2] = ["copilot_agent", "suggest"];

/// Deterministic `task name → (provider, model)` selection. Built once at
/// startup from config plus provider capability flags; stateless and
/// side-effect-free afterwards.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    overrides: HashMap<String, Route>,
    schema_route: Option<Route>,
    fast_route: Option<Route>,
    default_route: Route,
}

impl RoutingPolicy {
    pub fn from_config(config: &AppConfig, providers: &[ProviderInfo]) -> Self {
        let find = |id: &str| providers.iter().find(|p| p.id == id);
        let route_for = |info: &ProviderInfo| Route {
            provider: info.id.clone(),
            model: info.default_model.clone(),
        };

        let default_route = config
            .default_provider
            .as_deref()
            .and_then(find)
            .or_else(|| providers.first())
            .map(route_for)
            .unwrap_or(Route {
                provider: "local".to_string(),
                model: "echo-1".to_string(),
            });

        let schema_route = providers
            .iter()
            .find(|p| p.supports_output_schema)
            .map(route_for);

        // Groq is the lowest-latency tier when configured; otherwise chat
        // traffic shares the default provider.
        let fast_route = find("groq").map(route_for);

        let overrides = config
            .routes
            .iter()
            .filter_map(|(task, over)| {
                let info = find(&over.provider)?;
                Some((
                    task.clone(),
                    Route {
                        provider: info.id.clone(),
                        model: over.model.clone().unwrap_or_else(|| info.default_model.clone()),
                    },
                ))
            })
            .collect();

        Self {
            overrides,
            schema_route,
            fast_route,
            default_route,
        }
    }

    pub fn select(&self, task_name: &str) -> Route {
        if let Some(route) = self.overrides.get(task_name) {
            return route.clone();
        }
        if SCHEMA_TASKS.contains(&task_name) {
            if let Some(route) = &self.schema_route {
                return route.clone();
            }
        }
        if FAST_TASKS.contains(&task_name) {
            if let Some(route) = &self.fast_route {
                return route.clone();
            }
        }
        self.default_route.clone()
    }
}
