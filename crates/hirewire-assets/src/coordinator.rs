use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hirewire_store::{AssetPatch, JobStore, StoreError};
use hirewire_tasks::{Orchestrator, TaskContext, TaskOutput};
use hirewire_types::{
    AssetRunStatus, AssetStatus, ChannelId, FailureReason, TaskFailure,
};

use crate::plan::{expand_plan, PlannedAsset};

pub const DEFAULT_PARALLELISM: usize = 4;

/// Fans an asset run out across the selected channels. The per-job lock is
/// held only while planning and flipping the run to generating; the actual
/// LLM calls run outside it.
pub struct AssetCoordinator {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    parallelism: usize,
}

impl AssetCoordinator {
    pub fn new(store: Arc<JobStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Plans the run under the job lock and marks it generating. Rejected
    /// with `RunInProgress` while a previous run is still active.
    pub async fn plan(
        &self,
        job_id: &str,
        channels: &[ChannelId],
    ) -> Result<hirewire_types::AssetRun, StoreError> {
        let lock = self.store.job_lock(job_id).await;
        let _guard = lock.lock().await;
        let rows = expand_plan(channels)
            .into_iter()
            .map(|asset| (asset.asset_id, asset.format_id, asset.channel_id))
            .collect::<Vec<_>>();
        self.store.plan_asset_run(job_id, &rows).await?;
        self.store
            .set_asset_run_status(job_id, AssetRunStatus::Generating, None)
            .await
    }

    /// Drives every planned asset to a terminal state. Sibling failures are
    /// isolated; cancellation fails the not-yet-started remainder.
    pub async fn execute(&self, job_id: &str, channels: &[ChannelId], cancel: CancellationToken) {
        let Some(job) = self.store.get_job(job_id).await else {
            return;
        };
        let snapshot = serde_json::to_value(job.final_draft()).unwrap_or(Value::Null);
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        let mut groups: Vec<(ChannelId, Vec<PlannedAsset>)> = Vec::new();
        for asset in expand_plan(channels) {
            match groups.iter_mut().find(|(channel, _)| *channel == asset.channel_id) {
                Some((_, rows)) => rows.push(asset),
                None => groups.push((asset.channel_id, vec![asset])),
            }
        }

        let mut join_set = JoinSet::new();
        for (channel, rows) in groups {
            let store = self.store.clone();
            let orchestrator = self.orchestrator.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let snapshot = snapshot.clone();
            let job_id = job_id.to_string();
            join_set.spawn(async move {
                generate_channel_assets(
                    store,
                    orchestrator,
                    semaphore,
                    cancel,
                    job_id,
                    snapshot,
                    channel,
                    rows,
                )
                .await;
            });
        }
        while join_set.join_next().await.is_some() {}

        if cancel.is_cancelled() {
            let _ = self
                .store
                .set_asset_run_status(job_id, AssetRunStatus::Failed, Some("cancelled".to_string()))
                .await;
        }
        debug!(job_id, "asset run finished");
    }

    /// Plan and generate in one call. The HTTP surface plans first and
    /// spawns `execute` so callers get the snapshot immediately.
    pub async fn run(
        &self,
        job_id: &str,
        channels: &[ChannelId],
        cancel: CancellationToken,
    ) -> Result<hirewire_types::AssetRun, StoreError> {
        self.plan(job_id, channels).await?;
        self.execute(job_id, channels, cancel).await;
        self.store
            .get_job(job_id)
            .await
            .and_then(|job| job.asset_run)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate_channel_assets(
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    job_id: String,
    snapshot: Value,
    channel: ChannelId,
    rows: Vec<PlannedAsset>,
) {
    let mut master_content: Option<Value> = None;
    for (index, row) in rows.iter().enumerate() {
        if cancel.is_cancelled() {
            let _ = store
                .upsert_asset(
                    &job_id,
                    &row.asset_id,
                    AssetPatch {
                        status: Some(AssetStatus::Failed),
                        failure: Some(TaskFailure::new(
                            FailureReason::InvokeFailed,
                            "asset run cancelled before this asset started",
                        )),
                        ..AssetPatch::default()
                    },
                )
                .await;
            continue;
        }

        let Ok(_permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        if store
            .upsert_asset(
                &job_id,
                &row.asset_id,
                AssetPatch {
                    status: Some(AssetStatus::Generating),
                    ..AssetPatch::default()
                },
            )
            .await
            .is_err()
        {
            continue;
        }

        let mut ctx = TaskContext::for_job(job_id.clone(), snapshot.clone());
        ctx.channel = Some(channel);
        ctx.format = Some(row.format_id);
        ctx.plan_id = Some(row.asset_id.clone());
        // The channel's first row is the master; later rows adapt from it
        // when it succeeded and fall back to their own master run when not.
        let task_name = if index == 0 || master_content.is_none() {
            "asset_master"
        } else {
            ctx.master_content = master_content.clone();
            "asset_adapt"
        };

        let patch = match orchestrator.run(task_name, &ctx, cancel.child_token()).await {
            Ok(run) => match run.output {
                Ok(TaskOutput::AssetCopy(copy)) => {
                    if index == 0 {
                        master_content = Some(copy.content.clone());
                    }
                    AssetPatch {
                        status: Some(AssetStatus::Ready),
                        content: Some(copy.content),
                        ..AssetPatch::default()
                    }
                }
                Ok(_) => AssetPatch {
                    status: Some(AssetStatus::Failed),
                    failure: Some(TaskFailure::new(
                        FailureReason::ParserException,
                        "asset task returned an unexpected output variant",
                    )),
                    ..AssetPatch::default()
                },
                Err(failure) => {
                    warn!(
                        job_id,
                        asset = row.asset_id,
                        reason = failure.reason.as_str(),
                        "asset generation failed"
                    );
                    AssetPatch {
                        status: Some(AssetStatus::Failed),
                        failure: Some(failure),
                        ..AssetPatch::default()
                    }
                }
            },
            Err(fatal) => AssetPatch {
                status: Some(AssetStatus::Failed),
                failure: Some(TaskFailure::new(
                    FailureReason::InvokeFailed,
                    fatal.to_string(),
                )),
                ..AssetPatch::default()
            },
        };
        let _ = store.upsert_asset(&job_id, &row.asset_id, patch).await;
    }
}
