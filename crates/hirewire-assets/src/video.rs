use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use hirewire_store::{JobStore, StoreError};
use hirewire_tasks::{Orchestrator, TaskContext, TaskOutput};
use hirewire_types::{FailureReason, MediaPhase, TaskFailure, VideoRecord};

use crate::media::MediaGenerator;

/// One video per job, produced by the staged planning pipeline:
/// config → storyboard → caption → compliance, then a render call.
pub struct VideoRunner {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    media: Arc<dyn MediaGenerator>,
    in_flight: Mutex<HashSet<String>>,
}

impl VideoRunner {
    pub fn new(
        store: Arc<JobStore>,
        orchestrator: Arc<Orchestrator>,
        media: Arc<dyn MediaGenerator>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            media,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn request(
        &self,
        job_id: &str,
        force_refresh: bool,
        cancel: CancellationToken,
    ) -> Result<VideoRecord, StoreError> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if let Some(video) = &job.video {
            if !video.status.is_terminal() {
                return Ok(video.clone());
            }
            if video.status == MediaPhase::Ready && !force_refresh {
                return Ok(video.clone());
            }
        }
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(job_id.to_string()) {
                // Another request already drives the pipeline; hand back the
                // current snapshot.
                return self
                    .store
                    .get_job(job_id)
                    .await
                    .and_then(|job| job.video)
                    .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()));
            }
        }
        let record = self.generate(job_id, cancel).await;
        self.in_flight.lock().await.remove(job_id);
        Ok(record)
    }

    async fn generate(&self, job_id: &str, cancel: CancellationToken) -> VideoRecord {
        let now = Utc::now();
        let mut record = VideoRecord {
            status: MediaPhase::Prompting,
            provider: String::new(),
            model: String::new(),
            video_url: None,
            poster_url: None,
            duration_seconds: None,
            caption: None,
            storyboard: None,
            compliance: None,
            failure: None,
            updated_at: now,
        };
        let snapshot = match self.store.get_job(job_id).await {
            Some(job) => serde_json::to_value(job.final_draft()).unwrap_or(Value::Null),
            None => {
                record.status = MediaPhase::Failed;
                record.failure = Some(TaskFailure::new(
                    FailureReason::UnknownFailure,
                    format!("job `{job_id}` disappeared"),
                ));
                return record;
            }
        };
        let _ = self.store.set_video(job_id, record.clone()).await;

        let base_ctx = TaskContext::for_job(job_id, snapshot);
        let config = match self.stage(&base_ctx, "video_config", None, &cancel).await {
            Ok((output, provider, model)) => {
                record.provider = provider;
                record.model = model;
                output
            }
            Err(failure) => return self.fail(job_id, record, failure).await,
        };
        let storyboard = match self
            .stage(&base_ctx, "video_storyboard", Some(config.clone()), &cancel)
            .await
        {
            Ok((output, _, _)) => output,
            Err(failure) => return self.fail(job_id, record, failure).await,
        };
        record.storyboard = Some(storyboard.clone());
        let _ = self.store.set_video(job_id, record.clone()).await;

        let caption = match self
            .stage(&base_ctx, "video_caption", Some(storyboard.clone()), &cancel)
            .await
        {
            Ok((output, _, _)) => output,
            Err(failure) => return self.fail(job_id, record, failure).await,
        };
        let compliance = match self
            .stage(
                &base_ctx,
                "video_compliance",
                Some(json!({"caption": caption, "storyboard": storyboard})),
                &cancel,
            )
            .await
        {
            Ok((output, _, _)) => output,
            Err(failure) => return self.fail(job_id, record, failure).await,
        };
        record.compliance = Some(compliance.clone());
        record.caption = compliance
            .get("revised_caption")
            .and_then(|v| v.as_str())
            .or_else(|| caption.get("caption").and_then(|v| v.as_str()))
            .map(|s| s.to_string());

        record.status = MediaPhase::Generating;
        record.updated_at = Utc::now();
        let _ = self.store.set_video(job_id, record.clone()).await;

        match self
            .media
            .render_video(&config, &storyboard, cancel.child_token())
            .await
        {
            Ok(video) => {
                record.video_url = Some(video.video_url);
                record.poster_url = video.poster_url;
                record.duration_seconds = if video.duration_seconds > 0 {
                    Some(video.duration_seconds)
                } else {
                    config
                        .get("duration_seconds")
                        .and_then(|v| v.as_u64())
                        .map(|v| v as u32)
                };
            }
            Err(err) => {
                let failure = TaskFailure::new(FailureReason::InvokeFailed, err.to_string());
                return self.fail(job_id, record, failure).await;
            }
        }

        record.status = MediaPhase::Ready;
        record.failure = None;
        record.updated_at = Utc::now();
        let _ = self.store.set_video(job_id, record.clone()).await;
        record
    }

    async fn stage(
        &self,
        base_ctx: &TaskContext,
        task_name: &str,
        stage_input: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<(Value, String, String), TaskFailure> {
        let mut ctx = base_ctx.clone();
        ctx.stage_input = stage_input;
        match self.orchestrator.run(task_name, &ctx, cancel.child_token()).await {
            Ok(run) => match run.output {
                Ok(TaskOutput::VideoStage { output }) => Ok((output, run.provider, run.model)),
                Ok(_) => Err(TaskFailure::new(
                    FailureReason::ParserException,
                    format!("{task_name} returned an unexpected output variant"),
                )),
                Err(failure) => Err(failure),
            },
            Err(fatal) => Err(TaskFailure::new(
                FailureReason::InvokeFailed,
                fatal.to_string(),
            )),
        }
    }

    async fn fail(
        &self,
        job_id: &str,
        mut record: VideoRecord,
        failure: TaskFailure,
    ) -> VideoRecord {
        record.status = MediaPhase::Failed;
        record.failure = Some(failure);
        record.updated_at = Utc::now();
        let _ = self.store.set_video(job_id, record.clone()).await;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{finalized_job, task_stub_orchestrator, CountingMedia, StubBehavior};

    #[tokio::test]
    async fn video_pipeline_reaches_ready_with_staged_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(JobStore::new(dir.path()).await.expect("store"));
        let job = finalized_job(&store).await;
        let media = Arc::new(CountingMedia::default());
        let runner = VideoRunner::new(
            store.clone(),
            Arc::new(task_stub_orchestrator(StubBehavior::Succeed)),
            media.clone(),
        );

        let record = runner
            .request(&job.job_id, false, CancellationToken::new())
            .await
            .expect("record");
        assert_eq!(record.status, MediaPhase::Ready);
        assert!(record.video_url.is_some());
        assert!(record.storyboard.is_some());
        assert!(record.duration_seconds.is_some());
        assert_eq!(media.video_calls(), 1);
    }

    #[tokio::test]
    async fn ready_video_is_reused_until_force_refresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(JobStore::new(dir.path()).await.expect("store"));
        let job = finalized_job(&store).await;
        let media = Arc::new(CountingMedia::default());
        let runner = VideoRunner::new(
            store.clone(),
            Arc::new(task_stub_orchestrator(StubBehavior::Succeed)),
            media.clone(),
        );

        runner
            .request(&job.job_id, false, CancellationToken::new())
            .await
            .expect("first");
        runner
            .request(&job.job_id, false, CancellationToken::new())
            .await
            .expect("cached");
        assert_eq!(media.video_calls(), 1);

        runner
            .request(&job.job_id, true, CancellationToken::new())
            .await
            .expect("refresh");
        assert_eq!(media.video_calls(), 2);
    }
}
