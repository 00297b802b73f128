use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use hirewire_types::{
    AssetRecord, AssetRun, AssetRunStatus, AssetStatus, ChannelId, ChannelRecommendation,
    CopilotMessage, FieldId, Finalization, FinalizeSource, FormatId, HeroImage, Job, JobDraft,
    MessageRole, RefineMetadata, TaskFailure, VideoRecord,
};

const JOBS_FILE: &str = "jobs.json";

#[derive(Debug)]
pub enum StoreError {
    JobNotFound(String),
    AssetNotFound(String),
    InvalidDraft(String),
    MissingRequiredFields(Vec<FieldId>),
    RefinementMissing,
    NotFinalized,
    RunInProgress,
    TerminalAsset(String),
    InternalInvariant(String),
    Io(String),
}

impl StoreError {
    /// Stable code surfaced by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::JobNotFound(_) => "JOB_NOT_FOUND",
            StoreError::AssetNotFound(_) => "ASSET_NOT_FOUND",
            StoreError::InvalidDraft(_) => "INVALID_DRAFT",
            StoreError::MissingRequiredFields(_) => "DRAFT_INCOMPLETE",
            StoreError::RefinementMissing => "REFINEMENT_MISSING",
            StoreError::NotFinalized => "NOT_FINALIZED",
            StoreError::RunInProgress => "ASSET_RUN_IN_PROGRESS",
            StoreError::TerminalAsset(_) => "ASSET_TERMINAL",
            StoreError::InternalInvariant(_) => "INTERNAL_INVARIANT",
            StoreError::Io(_) => "STORE_IO",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::JobNotFound(id) => write!(f, "job `{id}` not found"),
            StoreError::AssetNotFound(id) => write!(f, "asset `{id}` not found"),
            StoreError::InvalidDraft(detail) => write!(f, "invalid draft: {detail}"),
            StoreError::MissingRequiredFields(fields) => {
                let names = fields.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ");
                write!(f, "draft is missing required fields: {names}")
            }
            StoreError::RefinementMissing => write!(f, "job has no refined draft yet"),
            StoreError::NotFinalized => write!(f, "job is not finalized"),
            StoreError::RunInProgress => write!(f, "an asset run is already in progress"),
            StoreError::TerminalAsset(id) => {
                write!(f, "asset `{id}` already reached a terminal status")
            }
            StoreError::InternalInvariant(detail) => write!(f, "internal invariant violated: {detail}"),
            StoreError::Io(detail) => write!(f, "store i/o failure: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, Default)]
pub struct AssetPatch {
    pub status: Option<AssetStatus>,
    pub content: Option<Value>,
    pub logo_url: Option<String>,
    pub failure: Option<TaskFailure>,
}

/// File-backed job store: the whole map lives in memory behind a RwLock and
/// is flushed to `jobs.json` after every mutation. One document per job.
pub struct JobStore {
    base: PathBuf,
    jobs: RwLock<HashMap<String, Job>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobStore {
    pub async fn new(base: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        let jobs_file = base.join(JOBS_FILE);
        let jobs = if jobs_file.exists() {
            let raw = fs::read_to_string(&jobs_file).await?;
            serde_json::from_str::<HashMap<String, Job>>(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            base,
            jobs: RwLock::new(jobs),
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let snapshot = self.jobs.read().await.clone();
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| StoreError::Io(err.to_string()))?;
        fs::write(self.base.join(JOBS_FILE), raw)
            .await
            .map_err(|err| StoreError::Io(err.to_string()))
    }

    /// Per-job mutex serializing state-machine transitions. Held over plan
    /// and finalize sections only, never across provider calls.
    pub async fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn mutate<T>(
        &self,
        job_id: &str,
        apply: impl FnOnce(&mut Job) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
            let result = apply(job)?;
            job.updated_at = Utc::now();
            result
        };
        self.flush().await?;
        Ok(result)
    }

    pub async fn create_job(&self, draft: JobDraft) -> Result<Job, StoreError> {
        let draft = draft
            .normalized()
            .map_err(|err| StoreError::InvalidDraft(err.to_string()))?;
        let job = Job::new(Uuid::new_v4().to_string(), draft);
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        self.flush().await?;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn get_draft(&self, job_id: &str) -> Result<JobDraft, StoreError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|job| job.state.clone())
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    /// Scalar merge; list fields replace whole.
    pub async fn put_draft(&self, job_id: &str, patch: JobDraft) -> Result<JobDraft, StoreError> {
        self.mutate(job_id, |job| {
            let merged = job
                .state
                .clone()
                .merged_with(patch)
                .normalized()
                .map_err(|err| StoreError::InvalidDraft(err.to_string()))?;
            job.state = merged.clone();
            Ok(merged)
        })
        .await
    }

    /// Same merge semantics as `put_draft`, applied to the refined variant.
    pub async fn put_refined_patch(
        &self,
        job_id: &str,
        patch: JobDraft,
    ) -> Result<JobDraft, StoreError> {
        self.mutate(job_id, |job| {
            let refined = job.refined.clone().ok_or(StoreError::RefinementMissing)?;
            let merged = refined
                .merged_with(patch)
                .normalized()
                .map_err(|err| StoreError::InvalidDraft(err.to_string()))?;
            job.refined = Some(merged.clone());
            Ok(merged)
        })
        .await
    }

    /// Single-field update used by copilot tool calls. `Null` clears.
    pub async fn update_draft_field(
        &self,
        job_id: &str,
        field: FieldId,
        value: Value,
    ) -> Result<JobDraft, StoreError> {
        self.mutate(job_id, |job| {
            let mut draft = job.state.clone();
            draft
                .set_field(field, value)
                .map_err(|err| StoreError::InvalidDraft(err.to_string()))?;
            job.state = draft.clone();
            Ok(draft)
        })
        .await
    }

    pub async fn update_refined_field(
        &self,
        job_id: &str,
        field: FieldId,
        value: Value,
    ) -> Result<JobDraft, StoreError> {
        self.mutate(job_id, |job| {
            let mut draft = job.refined.clone().ok_or(StoreError::RefinementMissing)?;
            draft
                .set_field(field, value)
                .map_err(|err| StoreError::InvalidDraft(err.to_string()))?;
            job.refined = Some(draft.clone());
            Ok(draft)
        })
        .await
    }

    pub async fn put_refinement(
        &self,
        job_id: &str,
        refined: JobDraft,
        summary: String,
        metadata: RefineMetadata,
    ) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            job.refined = Some(refined);
            job.refine_summary = Some(summary);
            job.metadata = Some(metadata);
            job.refined_at = Some(Utc::now());
            job.refine_failure = None;
            Ok(job.clone())
        })
        .await
    }

    /// A failed refine keeps any previously refined draft; only the failure
    /// marker is replaced.
    pub async fn set_refine_failure(
        &self,
        job_id: &str,
        failure: TaskFailure,
    ) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            job.refine_failure = Some(failure);
            Ok(job.clone())
        })
        .await
    }

    pub async fn finalize(
        &self,
        job_id: &str,
        final_job: JobDraft,
        source: FinalizeSource,
    ) -> Result<Job, StoreError> {
        let final_job = final_job
            .normalized()
            .map_err(|err| StoreError::InvalidDraft(err.to_string()))?;
        let missing = final_job.missing_required_fields();
        if !missing.is_empty() {
            return Err(StoreError::MissingRequiredFields(missing));
        }
        self.mutate(job_id, |job| {
            if source == FinalizeSource::Refined && job.refined.is_none() {
                return Err(StoreError::RefinementMissing);
            }
            job.state = final_job;
            // Re-finalization is a fresh event; the previous source is not
            // mutated in place.
            job.finalization = Some(Finalization {
                source,
                finalized_at: Utc::now(),
            });
            Ok(job.clone())
        })
        .await
    }

    /// Replaces the previous recommendation set atomically.
    pub async fn set_channel_recommendations(
        &self,
        job_id: &str,
        recommendations: Vec<ChannelRecommendation>,
        failure: Option<TaskFailure>,
    ) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            job.channel_recommendations = hirewire_types::dedupe_recommendations(recommendations);
            job.channel_updated_at = Some(Utc::now());
            job.channel_failure = failure;
            Ok(job.clone())
        })
        .await
    }

    /// Creates the run record plus one PENDING asset per planned row. The
    /// previous run's assets are replaced wholesale.
    pub async fn plan_asset_run(
        &self,
        job_id: &str,
        planned: &[(String, FormatId, ChannelId)],
    ) -> Result<AssetRun, StoreError> {
        self.mutate(job_id, |job| {
            if !job.is_finalized() {
                return Err(StoreError::NotFinalized);
            }
            if job.asset_run.as_ref().is_some_and(|run| run.is_active()) {
                return Err(StoreError::RunInProgress);
            }
            let now = Utc::now();
            let run = AssetRun {
                status: AssetRunStatus::Planning,
                planned_count: planned.len() as u32,
                completed_count: 0,
                error: None,
                started_at: now,
            };
            job.assets = planned
                .iter()
                .map(|(asset_id, format_id, channel_id)| {
                    (
                        asset_id.clone(),
                        AssetRecord {
                            format_id: *format_id,
                            channel_id: *channel_id,
                            status: AssetStatus::Pending,
                            content: Value::Null,
                            logo_url: job.state.logo_url.clone(),
                            failure: None,
                            updated_at: now,
                        },
                    )
                })
                .collect();
            job.asset_run = Some(run.clone());
            Ok(run)
        })
        .await
    }

    pub async fn set_asset_run_status(
        &self,
        job_id: &str,
        status: AssetRunStatus,
        error: Option<String>,
    ) -> Result<AssetRun, StoreError> {
        self.mutate(job_id, |job| {
            let run = job
                .asset_run
                .as_mut()
                .ok_or_else(|| StoreError::InternalInvariant("no asset run to update".to_string()))?;
            run.status = status;
            run.error = error;
            Ok(run.clone())
        })
        .await
    }

    /// Merges content and status with the rule that READY and FAILED are
    /// terminal within a run. Content-only patches are allowed on terminal
    /// assets (copilot edits); status changes are not.
    pub async fn upsert_asset(
        &self,
        job_id: &str,
        asset_id: &str,
        patch: AssetPatch,
    ) -> Result<AssetRecord, StoreError> {
        self.mutate(job_id, |job| {
            let asset = job
                .assets
                .get_mut(asset_id)
                .ok_or_else(|| StoreError::AssetNotFound(asset_id.to_string()))?;
            if let Some(status) = patch.status {
                if asset.status.is_terminal() && status != asset.status {
                    return Err(StoreError::TerminalAsset(asset_id.to_string()));
                }
                asset.status = status;
            }
            if let Some(content) = patch.content {
                asset.content = content;
            }
            if let Some(logo_url) = patch.logo_url {
                asset.logo_url = Some(logo_url);
            }
            if patch.failure.is_some() {
                asset.failure = patch.failure;
            }
            asset.updated_at = Utc::now();
            let updated = asset.clone();

            if let Some(run) = job.asset_run.as_mut() {
                let terminal = job
                    .assets
                    .values()
                    .filter(|a| a.status.is_terminal())
                    .count() as u32;
                if terminal > run.planned_count {
                    run.status = AssetRunStatus::Failed;
                    run.error = Some("internal_invariant".to_string());
                    return Err(StoreError::InternalInvariant(format!(
                        "completed count {terminal} exceeds planned count {}",
                        run.planned_count
                    )));
                }
                run.completed_count = terminal;
                let all_terminal = job.assets.values().all(|a| a.status.is_terminal());
                if all_terminal && run.is_active() {
                    run.status = AssetRunStatus::Completed;
                }
            }
            Ok(updated)
        })
        .await
    }

    pub async fn set_hero_image(&self, job_id: &str, record: HeroImage) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            job.hero_image = Some(record);
            Ok(job.clone())
        })
        .await
    }

    pub async fn set_video(&self, job_id: &str, record: VideoRecord) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            job.video = Some(record);
            Ok(job.clone())
        })
        .await
    }

    /// Appends preserving `created_at` order. User messages carrying a
    /// client message id dedup against earlier optimistic entries.
    pub async fn append_copilot_message(
        &self,
        job_id: &str,
        message: CopilotMessage,
    ) -> Result<Vec<CopilotMessage>, StoreError> {
        self.mutate(job_id, |job| {
            let duplicate = message.role == MessageRole::User
                && message.metadata.client_message_id.is_some()
                && job.copilot.iter().any(|existing| {
                    existing.role == MessageRole::User
                        && existing.metadata.client_message_id
                            == message.metadata.client_message_id
                });
            if !duplicate {
                job.copilot.push(message);
                job.copilot.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            }
            Ok(job.copilot.clone())
        })
        .await
    }

    pub async fn conversation(&self, job_id: &str) -> Result<Vec<CopilotMessage>, StoreError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|job| job.copilot.clone())
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hirewire_types::FailureReason;

    async fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path()).await.expect("store");
        (dir, store)
    }

    fn refine_ready_draft() -> JobDraft {
        JobDraft {
            role_title: Some("Senior Backend Engineer".to_string()),
            company_name: Some("Botson Labs".to_string()),
            location: Some("Tel Aviv, Israel".to_string()),
            seniority_level: Some("mid".to_string()),
            employment_type: Some("full_time".to_string()),
            job_description: Some("Lead the team delivering AI-assisted hiring tools.".to_string()),
            ..JobDraft::default()
        }
    }

    async fn finalized_job(store: &JobStore) -> Job {
        let job = store.create_job(refine_ready_draft()).await.expect("create");
        store
            .finalize(&job.job_id, refine_ready_draft(), FinalizeSource::Original)
            .await
            .expect("finalize")
    }

    fn plan_rows() -> Vec<(String, FormatId, ChannelId)> {
        vec![
            (
                "linkedin_job_posting".to_string(),
                FormatId::LinkedinJobPosting,
                ChannelId::Linkedin,
            ),
            (
                "linkedin_feed_post".to_string(),
                FormatId::LinkedinFeedPost,
                ChannelId::Linkedin,
            ),
        ]
    }

    #[tokio::test]
    async fn draft_round_trips_through_put_and_get() {
        let (_dir, store) = store().await;
        let job = store.create_job(refine_ready_draft()).await.expect("create");
        let fetched = store.get_draft(&job.job_id).await.expect("draft");
        let written = store
            .put_draft(&job.job_id, fetched.clone())
            .await
            .expect("put");
        assert_eq!(written, fetched);
    }

    #[tokio::test]
    async fn jobs_survive_store_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job_id = {
            let store = JobStore::new(dir.path()).await.expect("store");
            store
                .create_job(refine_ready_draft())
                .await
                .expect("create")
                .job_id
        };
        let reopened = JobStore::new(dir.path()).await.expect("store");
        let job = reopened.get_job(&job_id).await.expect("job");
        assert_eq!(job.state.company_name.as_deref(), Some("Botson Labs"));
    }

    #[tokio::test]
    async fn finalize_requires_complete_draft() {
        let (_dir, store) = store().await;
        let job = store.create_job(JobDraft::default()).await.expect("create");
        let err = store
            .finalize(&job.job_id, JobDraft::default(), FinalizeSource::Original)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingRequiredFields(_)));
        assert_eq!(err.code(), "DRAFT_INCOMPLETE");
    }

    #[tokio::test]
    async fn finalize_with_refined_source_requires_refinement() {
        let (_dir, store) = store().await;
        let job = store.create_job(refine_ready_draft()).await.expect("create");
        let err = store
            .finalize(&job.job_id, refine_ready_draft(), FinalizeSource::Refined)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RefinementMissing));
    }

    #[tokio::test]
    async fn plan_asset_run_requires_finalization_and_rejects_concurrent_runs() {
        let (_dir, store) = store().await;
        let job = store.create_job(refine_ready_draft()).await.expect("create");
        let err = store.plan_asset_run(&job.job_id, &plan_rows()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFinalized));

        let job = finalized_job(&store).await;
        let run = store
            .plan_asset_run(&job.job_id, &plan_rows())
            .await
            .expect("plan");
        assert_eq!(run.planned_count, 2);
        assert_eq!(run.completed_count, 0);

        let err = store.plan_asset_run(&job.job_id, &plan_rows()).await.unwrap_err();
        assert!(matches!(err, StoreError::RunInProgress));
    }

    #[tokio::test]
    async fn asset_transitions_are_linear_and_terminal_states_stick() {
        let (_dir, store) = store().await;
        let job = finalized_job(&store).await;
        store
            .plan_asset_run(&job.job_id, &plan_rows())
            .await
            .expect("plan");

        store
            .upsert_asset(
                &job.job_id,
                "linkedin_job_posting",
                AssetPatch {
                    status: Some(AssetStatus::Generating),
                    ..AssetPatch::default()
                },
            )
            .await
            .expect("generating");
        store
            .upsert_asset(
                &job.job_id,
                "linkedin_job_posting",
                AssetPatch {
                    status: Some(AssetStatus::Ready),
                    content: Some(serde_json::json!({"headline": "Join us"})),
                    ..AssetPatch::default()
                },
            )
            .await
            .expect("ready");

        let err = store
            .upsert_asset(
                &job.job_id,
                "linkedin_job_posting",
                AssetPatch {
                    status: Some(AssetStatus::Failed),
                    ..AssetPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalAsset(_)));

        // Content-only patches remain allowed after READY.
        let patched = store
            .upsert_asset(
                &job.job_id,
                "linkedin_job_posting",
                AssetPatch {
                    content: Some(serde_json::json!({"headline": "Join us today"})),
                    ..AssetPatch::default()
                },
            )
            .await
            .expect("content patch");
        assert_eq!(patched.status, AssetStatus::Ready);
    }

    #[tokio::test]
    async fn run_completes_when_every_asset_is_terminal() {
        let (_dir, store) = store().await;
        let job = finalized_job(&store).await;
        store
            .plan_asset_run(&job.job_id, &plan_rows())
            .await
            .expect("plan");
        store
            .set_asset_run_status(&job.job_id, AssetRunStatus::Generating, None)
            .await
            .expect("status");

        store
            .upsert_asset(
                &job.job_id,
                "linkedin_job_posting",
                AssetPatch {
                    status: Some(AssetStatus::Ready),
                    ..AssetPatch::default()
                },
            )
            .await
            .expect("ready");
        let mid = store.get_job(&job.job_id).await.expect("job");
        let run = mid.asset_run.expect("run");
        assert_eq!(run.completed_count, 1);
        assert_eq!(run.status, AssetRunStatus::Generating);

        store
            .upsert_asset(
                &job.job_id,
                "linkedin_feed_post",
                AssetPatch {
                    status: Some(AssetStatus::Failed),
                    failure: Some(TaskFailure::new(FailureReason::InvokeFailed, "429")),
                    ..AssetPatch::default()
                },
            )
            .await
            .expect("failed");
        let done = store.get_job(&job.job_id).await.expect("job");
        let run = done.asset_run.expect("run");
        assert_eq!(run.completed_count, 2);
        assert_eq!(run.status, AssetRunStatus::Completed);
    }

    #[tokio::test]
    async fn copilot_dedup_is_idempotent_by_client_message_id() {
        let (_dir, store) = store().await;
        let job = store.create_job(refine_ready_draft()).await.expect("create");
        let message = CopilotMessage::user("set seniority to senior", Some("client-1".to_string()));

        let first = store
            .append_copilot_message(&job.job_id, message.clone())
            .await
            .expect("append");
        let second = store
            .append_copilot_message(&job.job_id, CopilotMessage::user(
                "set seniority to senior",
                Some("client-1".to_string()),
            ))
            .await
            .expect("append");
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
    }

    #[tokio::test]
    async fn refine_failure_keeps_previous_refinement() {
        let (_dir, store) = store().await;
        let job = store.create_job(refine_ready_draft()).await.expect("create");
        let refined = JobDraft {
            role_title: Some("Senior Backend Engineer (AI)".to_string()),
            ..refine_ready_draft()
        };
        store
            .put_refinement(
                &job.job_id,
                refined,
                "Sharpened the title.".to_string(),
                RefineMetadata {
                    improvement_score: 90,
                    original_score: 60,
                    key_improvements: vec![],
                    impact_summary: "Better reach.".to_string(),
                },
            )
            .await
            .expect("refinement");
        store
            .set_refine_failure(
                &job.job_id,
                TaskFailure::new(FailureReason::InvokeFailed, "429"),
            )
            .await
            .expect("failure");

        let current = store.get_job(&job.job_id).await.expect("job");
        assert!(current.refined.is_some());
        assert!(current.refine_failure.is_some());
        assert_eq!(current.metadata.expect("metadata").improvement_score, 90);
    }
}
