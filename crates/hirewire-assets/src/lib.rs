pub mod coordinator;
pub mod hero;
pub mod media;
pub mod plan;
pub mod video;

pub use coordinator::{AssetCoordinator, DEFAULT_PARALLELISM};
pub use hero::HeroImageRunner;
pub use media::{GeneratedImage, HttpMediaGenerator, MediaGenerator, RenderedVideo};
pub use plan::{asset_id_for, expand_plan, formats_for_channel, PlannedAsset};
pub use video::VideoRunner;

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use hirewire_providers::{
        AppConfig, InvokeRequest, Provider, ProviderInfo, ProviderRegistry, ProviderResponse,
        ResponseMetadata, RoutingPolicy,
    };
    use hirewire_store::JobStore;
    use hirewire_tasks::{Orchestrator, TaskRegistry};
    use hirewire_types::{ChannelId, FinalizeSource, Job, JobDraft};

    use crate::media::{GeneratedImage, MediaGenerator, RenderedVideo};

    #[derive(Debug, Clone)]
    pub enum StubBehavior {
        Succeed,
        FailChannel(ChannelId),
        FailImagePrompt,
    }

    /// Provider stub answering by task type, so concurrent calls need no
    /// scripted ordering.
    struct TaskStubProvider {
        behavior: StubBehavior,
    }

    fn ok_json(value: Value) -> anyhow::Result<ProviderResponse> {
        Ok(ProviderResponse {
            text: value.to_string(),
            json: Some(value),
            metadata: ResponseMetadata::default(),
        })
    }

    #[async_trait]
    impl Provider for TaskStubProvider {
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
            match request.task_type.as_str() {
                "asset_master" | "asset_adapt" => {
                    if let StubBehavior::FailChannel(channel) = &self.behavior {
                        let marker = format!("\"channel\":\"{}\"", channel.as_str());
                        if request.user.contains(&marker) {
                            anyhow::bail!("503 synthetic upstream failure");
                        }
                    }
                    ok_json(json!({
                        "content": {
                            "headline": "Build hiring tools with us",
                            "body": "Botson Labs is hiring.",
                            "cta": "Apply now",
                        },
                    }))
                }
                "image_prompt" => {
                    if matches!(self.behavior, StubBehavior::FailImagePrompt) {
                        anyhow::bail!("500 image prompt backend down");
                    }
                    ok_json(json!({"prompt": "A sunlit engineering office, candid, warm light"}))
                }
                "image_caption" => ok_json(json!({
                    "caption": "We're hiring in Tel Aviv",
                    "hashtags": ["hiring"],
                })),
                "video_config" => ok_json(json!({
                    "duration_seconds": 30,
                    "aspect_ratio": "9:16",
                    "tone": "upbeat",
                })),
                "video_storyboard" => ok_json(json!({
                    "scenes": [
                        {"sequence": 1, "narration": "Meet the team", "visual": "office pan", "duration_seconds": 10},
                        {"sequence": 2, "narration": "Your next role", "visual": "role card", "duration_seconds": 20},
                    ],
                })),
                "video_caption" => ok_json(json!({"caption": "Join the team", "hashtags": []})),
                "video_compliance" => ok_json(json!({"approved": true, "flags": []})),
                other => anyhow::bail!("stub has no script for task `{other}`"),
            }
        }
    }

    pub fn task_stub_orchestrator(behavior: StubBehavior) -> Orchestrator {
        let provider = Arc::new(TaskStubProvider { behavior });
        let infos = vec![provider.info()];
        let providers = ProviderRegistry::from_providers(vec![provider as Arc<dyn Provider>]);
        let routing = RoutingPolicy::from_config(&AppConfig::default(), &infos);
        Orchestrator::new(Arc::new(TaskRegistry::builtin()), providers, routing)
    }

    pub async fn finalized_job(store: &Arc<JobStore>) -> Job {
        let draft = JobDraft {
            role_title: Some("Senior Backend Engineer".to_string()),
            company_name: Some("Botson Labs".to_string()),
            location: Some("Tel Aviv, Israel".to_string()),
            seniority_level: Some("mid".to_string()),
            employment_type: Some("full_time".to_string()),
            job_description: Some("Lead the team delivering AI-assisted hiring tools.".to_string()),
            ..JobDraft::default()
        };
        let job = store.create_job(draft.clone()).await.expect("create job");
        store
            .finalize(&job.job_id, draft, FinalizeSource::Original)
            .await
            .expect("finalize job")
    }

    #[derive(Default)]
    pub struct CountingMedia {
        images: AtomicUsize,
        videos: AtomicUsize,
    }

    impl CountingMedia {
        pub fn image_calls(&self) -> usize {
            self.images.load(Ordering::SeqCst)
        }

        pub fn video_calls(&self) -> usize {
            self.videos.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaGenerator for CountingMedia {
        async fn generate_image(
            &self,
            _prompt: &str,
            _cancel: CancellationToken,
        ) -> anyhow::Result<GeneratedImage> {
            self.images.fetch_add(1, Ordering::SeqCst);
            Ok(GeneratedImage {
                image_url: "https://media.example/hero.png".to_string(),
            })
        }

        async fn render_video(
            &self,
            _config: &Value,
            _storyboard: &Value,
            _cancel: CancellationToken,
        ) -> anyhow::Result<RenderedVideo> {
            self.videos.fetch_add(1, Ordering::SeqCst);
            Ok(RenderedVideo {
                video_url: "https://media.example/teaser.mp4".to_string(),
                poster_url: Some("https://media.example/poster.png".to_string()),
                duration_seconds: 30,
            })
        }
    }
}
