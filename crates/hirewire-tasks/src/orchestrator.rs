use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hirewire_providers::{
    is_rate_limit_error, InvokeRequest, ProviderRegistry, RoutingPolicy,
};
use hirewire_types::{FailureReason, TaskFailure};

use crate::{TaskContext, TaskOutput, TaskRegistry};

/// Fixed backoff schedule applied before each retry. The last entry repeats
/// for any further attempts.
pub const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

/// Optional hook invoked with `(provider_id, response_text)` after every
/// provider call. Errors are swallowed; the hook never affects the run.
pub type PreviewLogger = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task: String,
    pub provider: String,
    pub model: String,
    pub attempts: u32,
    pub output: Result<TaskOutput, TaskFailure>,
}

impl TaskRun {
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.output.as_ref().err()
    }
}

/// Runs a named task end to end: build prompt, invoke the routed provider,
/// parse, and retry with backoff until the attempt budget is spent.
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    providers: ProviderRegistry,
    routing: RoutingPolicy,
    preview_logger: Option<PreviewLogger>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        providers: ProviderRegistry,
        routing: RoutingPolicy,
    ) -> Self {
        Self {
            registry,
            providers,
            routing,
            preview_logger: None,
        }
    }

    pub fn with_preview_logger(mut self, logger: PreviewLogger) -> Self {
        self.preview_logger = Some(logger);
        self
    }

    /// Fatal errors (unknown task, unresolved provider, builder failure)
    /// surface as `Err`; everything recoverable lands in `TaskRun.output`.
    pub async fn run(
        &self,
        task_name: &str,
        ctx: &TaskContext,
        cancel: CancellationToken,
    ) -> anyhow::Result<TaskRun> {
        let Some(task) = self.registry.get(task_name) else {
            anyhow::bail!("unknown task `{task_name}`");
        };
        let route = self.routing.select(task_name);
        let provider = self.providers.get(&route.provider).await?;
        let provider_id = provider.info().id;
        let max_tokens = task.max_tokens.resolve(&provider_id);
        let timeout = Duration::from_secs(task.timeout_secs);

        let mut last_error: Option<TaskFailure> = None;
        let mut attempts = 0u32;

        for attempt in 0..task.retries {
            if attempt > 0 {
                let delay = RETRY_DELAYS[usize::min(attempt as usize - 1, RETRY_DELAYS.len() - 1)];
                tokio::select! {
                    _ = cancel.cancelled() => {
                        last_error = Some(TaskFailure::new(
                            FailureReason::InvokeFailed,
                            "task cancelled during backoff",
                        ));
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let mut attempt_ctx = ctx.clone();
            attempt_ctx.attempt = attempt;
            attempt_ctx.strict_mode = task.strict_on_retry && attempt > 0;

            let user = (task.builder)(&attempt_ctx)?;
            if user.trim().is_empty() {
                anyhow::bail!("task `{task_name}` built an empty prompt");
            }
            let request = InvokeRequest {
                model: route.model.clone(),
                system: task.system.resolve(&attempt_ctx),
                user,
                mode: task.mode,
                temperature: task.temperature,
                max_tokens,
                output_schema: task.output_schema.map(|schema| schema()),
                task_type: task_name.to_string(),
                route: ctx.route.clone(),
            };

            attempts += 1;
            let response = match tokio::time::timeout(
                timeout,
                provider.invoke(&request, cancel.child_token()),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    let message = err.to_string();
                    if is_rate_limit_error(&message) {
                        warn!(task = task_name, provider = %provider_id, "provider rate limited");
                    } else {
                        warn!(task = task_name, provider = %provider_id, error = %message, "provider invoke failed");
                    }
                    last_error = Some(TaskFailure::new(FailureReason::InvokeFailed, message));
                    continue;
                }
                Err(_) => {
                    last_error = Some(TaskFailure::new(
                        FailureReason::InvokeFailed,
                        format!("provider call timed out after {}s", task.timeout_secs),
                    ));
                    continue;
                }
            };

            if let Some(logger) = &self.preview_logger {
                let _ = logger(&provider_id, &response.text);
            }

            let parsed = catch_unwind(AssertUnwindSafe(|| (task.parser)(&response, &attempt_ctx)))
                .unwrap_or_else(|_| {
                    Err(TaskFailure::with_preview(
                        FailureReason::ParserException,
                        "parser panicked",
                        &response.text,
                    ))
                });

            match parsed {
                Ok(output) => {
                    debug!(task = task_name, provider = %provider_id, attempt, "task completed");
                    return Ok(TaskRun {
                        task: task_name.to_string(),
                        provider: provider_id,
                        model: route.model,
                        attempts,
                        output: Ok(output),
                    });
                }
                Err(failure) => {
                    debug!(
                        task = task_name,
                        provider = %provider_id,
                        attempt,
                        reason = failure.reason.as_str(),
                        "task attempt failed"
                    );
                    last_error = Some(failure);
                }
            }
        }

        Ok(TaskRun {
            task: task_name.to_string(),
            provider: provider_id,
            model: route.model,
            attempts,
            output: Err(last_error.unwrap_or_else(|| {
                TaskFailure::new(FailureReason::UnknownFailure, "task produced no result")
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hirewire_providers::{
        AppConfig, DecodeMode, Provider, ProviderInfo, ProviderResponse, ResponseMetadata,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: pops one canned result per invoke and records
    /// every request it sees.
    struct ScriptedProvider {
        responses: Mutex<Vec<anyhow::Result<ProviderResponse>>>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<anyhow::Result<ProviderResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn text(body: &str) -> anyhow::Result<ProviderResponse> {
            Ok(ProviderResponse {
                text: body.to_string(),
                json: None,
                metadata: ResponseMetadata::default(),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: "stub".to_string(),
                name: "Stub".to_string(),
                default_model: "stub-1".to_string(),
                supports_output_schema: true,
            }
        }

        async fn invoke(
            &self,
            request: &InvokeRequest,
            _cancel: CancellationToken,
        ) -> anyhow::Result<ProviderResponse> {
            assert_eq!(request.mode, DecodeMode::Json);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.user.clone());
            self.responses
                .lock()
                .unwrap()
                .remove(0)
        }
    }

    fn orchestrator_with(provider: Arc<ScriptedProvider>) -> Orchestrator {
        let registry = Arc::new(TaskRegistry::builtin());
        let providers = ProviderRegistry::from_providers(vec![provider as Arc<dyn Provider>]);
        let routing = RoutingPolicy::from_config(
            &AppConfig::default(),
            &[ProviderInfo {
                id: "stub".to_string(),
                name: "Stub".to_string(),
                default_model: "stub-1".to_string(),
                supports_output_schema: true,
            }],
        );
        Orchestrator::new(registry, providers, routing)
    }

    fn refine_ctx() -> TaskContext {
        TaskContext::for_job(
            "job-1",
            json!({
                "roleTitle": "Senior Backend Engineer",
                "companyName": "Botson Labs",
                "location": "Tel Aviv, Israel",
                "seniorityLevel": "mid",
                "employmentType": "full_time",
                "jobDescription": "Lead the team delivering AI-assisted hiring tools.",
            }),
        )
    }

    fn valid_refine_body() -> String {
        json!({
            "refined_job": {"roleTitle": "Senior Backend Engineer (AI Hiring)"},
            "summary": "Sharpened the title and framing.",
            "analysis": {
                "improvement_score": 90,
                "original_score": 60,
                "impact_summary": "Broader senior reach.",
                "key_improvements": ["clearer title"],
            },
        })
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn parser_failure_retries_in_strict_mode_then_recovers() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("Sure, here's the JSON: nonsense without braces"),
            ScriptedProvider::text(&valid_refine_body()),
        ]);
        let orchestrator = orchestrator_with(provider.clone());
        let run = orchestrator
            .run("refine", &refine_ctx(), CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(run.output.is_ok());
        let prompts = provider.prompts.lock().unwrap();
        assert!(!prompts[0].starts_with("Respond with exactly one JSON object"));
        assert!(prompts[1].starts_with("Respond with exactly one JSON object"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_consumes_full_backoff_schedule() {
        let provider = ScriptedProvider::new(vec![
            Err(anyhow::anyhow!("429 quota exceeded")),
            Err(anyhow::anyhow!("429 quota exceeded")),
            Err(anyhow::anyhow!("429 quota exceeded")),
        ]);
        let orchestrator = orchestrator_with(provider.clone());
        let started = tokio::time::Instant::now();
        let run = orchestrator
            .run("refine", &refine_ctx(), CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(run.attempts, 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
        let failure = run.failure().expect("failure");
        assert_eq!(failure.reason, FailureReason::InvokeFailed);
        assert!(failure.message.contains("429"));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded_by_descriptor_retries() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("not json"),
            ScriptedProvider::text("still not json"),
            ScriptedProvider::text("never json"),
            ScriptedProvider::text("unreachable"),
        ]);
        let orchestrator = orchestrator_with(provider.clone());
        let run = orchestrator
            .run("refine", &refine_ctx(), CancellationToken::new())
            .await
            .expect("run");
        // refine allows 3 total attempts.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(run.failure().expect("failure").reason, FailureReason::StructuredMissing);
    }

    #[tokio::test]
    async fn unknown_task_is_fatal() {
        let provider = ScriptedProvider::new(vec![]);
        let orchestrator = orchestrator_with(provider);
        let err = orchestrator
            .run("not_a_task", &TaskContext::default(), CancellationToken::new())
            .await
            .err()
            .expect("fatal");
        assert!(err.to_string().contains("unknown task"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_pending_backoff() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("not json"),
            ScriptedProvider::text(&valid_refine_body()),
        ]);
        let orchestrator = orchestrator_with(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        // First attempt runs; the backoff before the second observes the
        // cancelled token and stops the run.
        let run = orchestrator
            .run("refine", &refine_ctx(), cancel)
            .await
            .expect("run");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(run
            .failure()
            .expect("failure")
            .message
            .contains("cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn preview_logger_sees_every_response_and_errors_are_swallowed() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::text("not json"),
            ScriptedProvider::text(&valid_refine_body()),
        ]);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let orchestrator = orchestrator_with(provider).with_preview_logger(Arc::new(
            move |_provider, _text| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("logger exploded");
            },
        ));
        let run = orchestrator
            .run("refine", &refine_ctx(), CancellationToken::new())
            .await
            .expect("run");
        assert!(run.output.is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
