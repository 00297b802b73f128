use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use hirewire_store::{JobStore, StoreError};
use hirewire_tasks::{Orchestrator, TaskContext, TaskOutput};
use hirewire_types::{FailureReason, HeroImage, MediaPhase, TaskFailure};

use crate::media::MediaGenerator;

type SharedHero = Shared<BoxFuture<'static, HeroImage>>;

/// Hero-image runner with a per-job single-flight: concurrent requests for
/// the same job share one in-flight pipeline unless `force_refresh` starts
/// a new one.
pub struct HeroImageRunner {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    media: Arc<dyn MediaGenerator>,
    flights: Arc<Mutex<HashMap<String, (u64, SharedHero)>>>,
    generation: AtomicU64,
}

impl HeroImageRunner {
    pub fn new(
        store: Arc<JobStore>,
        orchestrator: Arc<Orchestrator>,
        media: Arc<dyn MediaGenerator>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            media,
            flights: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn request(
        &self,
        job_id: &str,
        force_refresh: bool,
        cancel: CancellationToken,
    ) -> Result<HeroImage, StoreError> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if !force_refresh {
            if let Some(hero) = &job.hero_image {
                if hero.status == MediaPhase::Ready {
                    return Ok(hero.clone());
                }
            }
        }

        let shared = {
            let mut flights = self.flights.lock().await;
            let existing = if force_refresh {
                None
            } else {
                flights.get(job_id).map(|(_, shared)| shared.clone())
            };
            match existing {
                Some(shared) => shared,
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let future = run_hero_pipeline(
                        self.store.clone(),
                        self.orchestrator.clone(),
                        self.media.clone(),
                        self.flights.clone(),
                        generation,
                        job_id.to_string(),
                        cancel,
                    )
                    .boxed()
                    .shared();
                    flights.insert(job_id.to_string(), (generation, future.clone()));
                    future
                }
            }
        };
        Ok(shared.await)
    }
}

async fn run_hero_pipeline(
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    media: Arc<dyn MediaGenerator>,
    flights: Arc<Mutex<HashMap<String, (u64, SharedHero)>>>,
    generation: u64,
    job_id: String,
    cancel: CancellationToken,
) -> HeroImage {
    let record = generate_hero(&store, &orchestrator, &media, &job_id, cancel).await;
    // Drop the flight entry, but only if a force-refresh has not already
    // replaced it with a newer pipeline.
    let mut flights = flights.lock().await;
    if flights.get(&job_id).is_some_and(|(gen, _)| *gen == generation) {
        flights.remove(&job_id);
    }
    record
}

async fn generate_hero(
    store: &Arc<JobStore>,
    orchestrator: &Arc<Orchestrator>,
    media: &Arc<dyn MediaGenerator>,
    job_id: &str,
    cancel: CancellationToken,
) -> HeroImage {
    let mut record = HeroImage::idle();
    record.status = MediaPhase::Prompting;
    record.updated_at = Utc::now();

    let Some(job) = store.get_job(job_id).await else {
        record.status = MediaPhase::Failed;
        record.failure = Some(TaskFailure::new(
            FailureReason::UnknownFailure,
            format!("job `{job_id}` disappeared"),
        ));
        return record;
    };
    let snapshot = serde_json::to_value(job.final_draft()).unwrap_or(Value::Null);
    let _ = store.set_hero_image(job_id, record.clone()).await;

    let ctx = TaskContext::for_job(job_id, snapshot);
    let prompt = match orchestrator
        .run("image_prompt", &ctx, cancel.child_token())
        .await
    {
        Ok(run) => match run.output {
            Ok(TaskOutput::ImagePrompt { prompt }) => {
                record.provider = run.provider;
                record.model = run.model;
                prompt
            }
            Ok(_) => {
                let failure = TaskFailure::new(
                    FailureReason::ParserException,
                    "image_prompt returned an unexpected output variant",
                );
                return fail_hero(store, job_id, record, failure).await;
            }
            Err(failure) => return fail_hero(store, job_id, record, failure).await,
        },
        Err(fatal) => {
            let failure = TaskFailure::new(FailureReason::InvokeFailed, fatal.to_string());
            return fail_hero(store, job_id, record, failure).await;
        }
    };

    record.status = MediaPhase::Generating;
    record.updated_at = Utc::now();
    let _ = store.set_hero_image(job_id, record.clone()).await;

    match media.generate_image(&prompt, cancel.child_token()).await {
        Ok(image) => record.image_url = Some(image.image_url),
        Err(err) => {
            let failure = TaskFailure::new(FailureReason::InvokeFailed, err.to_string());
            return fail_hero(store, job_id, record, failure).await;
        }
    }

    // Caption is decorative; a failure here does not fail the image.
    let mut caption_ctx = TaskContext::for_job(job_id, ctx.job.clone());
    caption_ctx.stage_input = Some(json!({"prompt": prompt}));
    match orchestrator
        .run("image_caption", &caption_ctx, cancel.child_token())
        .await
    {
        Ok(run) => {
            if let Ok(TaskOutput::ImageCaption { caption, hashtags }) = run.output {
                record.caption = Some(caption);
                record.hashtags = hashtags;
            }
        }
        Err(err) => warn!(job_id, error = %err, "hero caption task failed"),
    }

    record.status = MediaPhase::Ready;
    record.failure = None;
    record.updated_at = Utc::now();
    let _ = store.set_hero_image(job_id, record.clone()).await;
    record
}

async fn fail_hero(
    store: &Arc<JobStore>,
    job_id: &str,
    mut record: HeroImage,
    failure: TaskFailure,
) -> HeroImage {
    record.status = MediaPhase::Failed;
    record.failure = Some(failure);
    record.updated_at = Utc::now();
    let _ = store.set_hero_image(job_id, record.clone()).await;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{finalized_job, task_stub_orchestrator, CountingMedia, StubBehavior};

    #[tokio::test]
    async fn concurrent_requests_share_one_generation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(JobStore::new(dir.path()).await.expect("store"));
        let job = finalized_job(&store).await;
        let media = Arc::new(CountingMedia::default());
        let runner = HeroImageRunner::new(
            store.clone(),
            Arc::new(task_stub_orchestrator(StubBehavior::Succeed)),
            media.clone(),
        );

        let (first, second) = tokio::join!(
            runner.request(&job.job_id, false, CancellationToken::new()),
            runner.request(&job.job_id, false, CancellationToken::new()),
        );
        let first = first.expect("first");
        let second = second.expect("second");

        assert_eq!(media.image_calls(), 1);
        assert_eq!(first.status, MediaPhase::Ready);
        assert_eq!(first.image_url, second.image_url);
        assert_eq!(first.caption, second.caption);
    }

    #[tokio::test]
    async fn ready_record_is_reused_until_force_refresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(JobStore::new(dir.path()).await.expect("store"));
        let job = finalized_job(&store).await;
        let media = Arc::new(CountingMedia::default());
        let runner = HeroImageRunner::new(
            store.clone(),
            Arc::new(task_stub_orchestrator(StubBehavior::Succeed)),
            media.clone(),
        );

        let first = runner
            .request(&job.job_id, false, CancellationToken::new())
            .await
            .expect("first");
        assert_eq!(first.status, MediaPhase::Ready);
        let cached = runner
            .request(&job.job_id, false, CancellationToken::new())
            .await
            .expect("cached");
        assert_eq!(media.image_calls(), 1);
        assert_eq!(cached.image_url, first.image_url);

        let refreshed = runner
            .request(&job.job_id, true, CancellationToken::new())
            .await
            .expect("refresh");
        assert_eq!(media.image_calls(), 2);
        assert_eq!(refreshed.status, MediaPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_failure_yields_failed_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(JobStore::new(dir.path()).await.expect("store"));
        let job = finalized_job(&store).await;
        let media = Arc::new(CountingMedia::default());
        let runner = HeroImageRunner::new(
            store.clone(),
            Arc::new(task_stub_orchestrator(StubBehavior::FailImagePrompt)),
            media.clone(),
        );

        let record = runner
            .request(&job.job_id, false, CancellationToken::new())
            .await
            .expect("record");
        assert_eq!(record.status, MediaPhase::Failed);
        assert!(record.failure.is_some());
        assert_eq!(media.image_calls(), 0);
        let stored = store.get_job(&job.job_id).await.expect("job");
        assert_eq!(stored.hero_image.expect("hero").status, MediaPhase::Failed);
    }
}
