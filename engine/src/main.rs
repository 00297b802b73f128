use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use hirewire_assets::{AssetCoordinator, HeroImageRunner, HttpMediaGenerator, MediaGenerator, VideoRunner};
use hirewire_copilot::CopilotEngine;
use hirewire_observability::{
    emit_event, init_process_logging, redact_text, ObservabilityEvent, ProcessKind, WorkerGuard,
};
use hirewire_providers::{AppConfig, ProviderConfig, ProviderRegistry, RoutingPolicy};
use hirewire_server::{serve, AppState, EventBus};
use hirewire_store::JobStore;
use hirewire_tasks::{Orchestrator, TaskContext, TaskRegistry};

const DEFAULT_MEDIA_BASE_URL: &str = "http://127.0.0.1:7801";

#[derive(Parser, Debug)]
#[command(name = "hirewire-engine")]
#[command(about = "Headless hirewire orchestration backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3400)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Run a single task against the configured providers and print the
    /// outcome. Useful for smoke-testing routing and credentials.
    Run {
        /// Task name from the registry, e.g. `refine` or `channels`.
        task: String,
        /// Path to a JSON file holding the job draft snapshot.
        #[arg(long)]
        job: PathBuf,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// List the registered task names.
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let (state, _guard) = build_state(&state_dir).await?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            info!(addr = %addr, state_dir = %state_dir.display(), "hirewire engine listening");
            serve(addr, state).await?;
        }
        Command::Run { task, job, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let (state, _guard) = build_state(&state_dir).await?;
            let raw = std::fs::read_to_string(&job)
                .with_context(|| format!("read job snapshot from {}", job.display()))?;
            let snapshot: serde_json::Value =
                serde_json::from_str(&raw).context("job snapshot is not valid JSON")?;
            let mut ctx = TaskContext::for_job("cli", snapshot);
            ctx.allowed_channels = hirewire_types::ChannelId::ALL.to_vec();
            ctx.route = "cli".to_string();
            let run = state
                .orchestrator
                .run(&task, &ctx, CancellationToken::new())
                .await?;
            match run.output {
                Ok(output) => println!("{}", format_output(&run.task, &run.provider, output)),
                Err(failure) => {
                    eprintln!("{}: {}", failure.reason.as_str(), failure.message);
                    std::process::exit(1);
                }
            }
        }
        Command::Tasks => {
            for name in TaskRegistry::builtin().names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}

fn resolve_state_dir(explicit: Option<String>) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("HIREWIRE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hirewire")
}

async fn build_state(state_dir: &Path) -> anyhow::Result<(AppState, WorkerGuard)> {
    let logs_dir = hirewire_observability::canonical_logs_dir_from_root(state_dir);
    let (guard, log_info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)?;
    info!(logs_dir = %log_info.logs_dir, "logging initialized");

    let config = load_config(state_dir)?;
    let providers = ProviderRegistry::new(&config);
    let infos = providers.infos().await;
    if infos.iter().all(|p| p.id == "local") {
        info!("no provider credentials configured; falling back to the local echo provider");
    }
    let routing = RoutingPolicy::from_config(&config, &infos);
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(TaskRegistry::builtin()), providers.clone(), routing)
            .with_preview_logger(Arc::new(|provider, text| {
                let preview = redact_text(text);
                emit_event(
                    tracing::Level::INFO,
                    ProcessKind::Engine,
                    ObservabilityEvent {
                        event: "provider_response",
                        component: "orchestrator",
                        provider_id: Some(provider),
                        detail: Some(&preview),
                        ..ObservabilityEvent::default()
                    },
                );
                Ok(())
            })),
    );

    let store = Arc::new(JobStore::new(state_dir.join("jobs")).await?);
    let media: Arc<dyn MediaGenerator> = Arc::new(HttpMediaGenerator::new(
        config
            .media_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_MEDIA_BASE_URL.to_string()),
        None,
    ));

    let state = AppState {
        coordinator: Arc::new(AssetCoordinator::new(store.clone(), orchestrator.clone())),
        hero: Arc::new(HeroImageRunner::new(
            store.clone(),
            orchestrator.clone(),
            media.clone(),
        )),
        video: Arc::new(VideoRunner::new(
            store.clone(),
            orchestrator.clone(),
            media,
        )),
        copilot: Arc::new(CopilotEngine::new(store.clone(), orchestrator.clone())),
        store,
        orchestrator,
        events: EventBus::new(),
        api_token: std::env::var("HIREWIRE_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty()),
    };
    Ok((state, guard))
}

/// Config file first, environment on top: provider entries are synthesized
/// for any credential found only in the environment.
fn load_config(state_dir: &Path) -> anyhow::Result<AppConfig> {
    let config_path = state_dir.join("config.json");
    let mut config = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        serde_json::from_str::<AppConfig>(&raw)
            .with_context(|| format!("parse {}", config_path.display()))?
    } else {
        AppConfig::default()
    };

    for (id, env_key) in [
        ("openai", "OPENAI_API_KEY"),
        ("anthropic", "ANTHROPIC_API_KEY"),
        ("groq", "GROQ_API_KEY"),
        ("mistral", "MISTRAL_API_KEY"),
    ] {
        if config.providers.contains_key(id) {
            continue;
        }
        if std::env::var(env_key).map(|v| !v.trim().is_empty()).unwrap_or(false) {
            config
                .providers
                .insert(id.to_string(), ProviderConfig::default());
        }
    }
    Ok(config)
}

fn format_output(task: &str, provider: &str, output: hirewire_tasks::TaskOutput) -> String {
    let body = match output {
        hirewire_tasks::TaskOutput::Refine(outcome) => serde_json::json!({
            "refinedJob": outcome.refined,
            "summary": outcome.summary,
        }),
        hirewire_tasks::TaskOutput::Channels { recommendations } => {
            serde_json::json!({"recommendations": recommendations})
        }
        other => serde_json::json!({"output": format!("{other:?}")}),
    };
    serde_json::json!({"task": task, "provider": provider, "result": body}).to_string()
}
