use std::net::SocketAddr;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use hirewire_store::StoreError;
use hirewire_tasks::{TaskContext, TaskOutput};
use hirewire_types::{
    AssetRecord, ChannelId, ChannelRecommendation, CopilotStage, FailureReason, FinalizeSource,
    Job, JobDraft, TaskFailure,
};

use crate::{AppState, EngineEvent};

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

struct ApiError {
    status: StatusCode,
    envelope: ErrorEnvelope,
}

impl ApiError {
    fn internal(detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "internal server error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            envelope: ErrorEnvelope {
                error: "internal error".to_string(),
                code: Some("INTERNAL".to_string()),
            },
        }
    }

    fn bad_request(code: &str, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            envelope: ErrorEnvelope {
                error: detail.into(),
                code: Some(code.to_string()),
            },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::JobNotFound(_) | StoreError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidDraft(_) | StoreError::MissingRequiredFields(_) => {
                StatusCode::BAD_REQUEST
            }
            StoreError::RefinementMissing
            | StoreError::NotFinalized
            | StoreError::RunInProgress
            | StoreError::TerminalAsset(_) => StatusCode::CONFLICT,
            StoreError::InternalInvariant(_) | StoreError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            envelope: ErrorEnvelope {
                error: err.to_string(),
                code: Some(err.code().to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeInput {
    final_job: JobDraft,
    source: FinalizeSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAssetsInput {
    channel_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MediaRequestInput {
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CopilotInput {
    message: String,
    stage: CopilotStage,
    client_message_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EventFilterQuery {
    #[serde(rename = "jobID")]
    job_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetView {
    asset_id: String,
    #[serde(flatten)]
    record: AssetRecord,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/draft", post(put_draft))
        .route("/jobs/{id}/refine", post(refine_job))
        .route("/jobs/{id}/finalize", post(finalize_job))
        .route("/jobs/{id}/channels", get(get_channels))
        .route("/jobs/{id}/channels/recompute", post(recompute_channels))
        .route("/jobs/{id}/assets", post(start_assets).get(get_assets))
        .route("/jobs/{id}/hero-image", get(get_hero_image))
        .route("/jobs/{id}/hero-image/request", post(request_hero_image))
        .route("/jobs/{id}/video", get(get_video))
        .route("/jobs/{id}/video/request", post(request_video))
        .route("/jobs/{id}/copilot", post(copilot_turn).get(get_conversation))
        .layer(cors)
        .layer(middleware::from_fn_with_state(state.clone(), auth_gate))
        .with_state(state)
}

async fn auth_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let Some(expected) = &state.api_token else {
        return next.run(request).await;
    };
    let provided = extract_request_token(request.headers());
    if provided.as_deref() == Some(expected.as_str()) {
        return next.run(request).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorEnvelope {
            error: "Unauthorized: missing or invalid API token".to_string(),
            code: Some("AUTH_REQUIRED".to_string()),
        }),
    )
        .into_response()
}

fn extract_request_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let trimmed = auth.trim();
    let bearer = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?;
    let token = bearer.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "build_id": crate::build_id(),
        "apiTokenRequired": state.api_token.is_some(),
    }))
}

async fn events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilterQuery>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |event| {
        let event = event.ok()?;
        if let Some(job_id) = &filter.job_id {
            let matches = event
                .properties
                .get("jobId")
                .and_then(|v| v.as_str())
                .map(|id| id == job_id)
                .unwrap_or(false);
            if !matches {
                return None;
            }
        }
        Event::default().json_data(&event).ok().map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn create_job(
    State(state): State<AppState>,
    Json(draft): Json<JobDraft>,
) -> Result<Json<Job>, ApiError> {
    let job = state.store.create_job(draft).await?;
    state.events.publish(EngineEvent::new(
        "job.created",
        json!({"jobId": job.job_id}),
    ));
    Ok(Json(job))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or(StoreError::JobNotFound(id))?;
    Ok(Json(job))
}

async fn put_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<JobDraft>,
) -> Result<Json<Value>, ApiError> {
    let draft = state.store.put_draft(&id, patch).await?;
    Ok(Json(json!({"jobId": id, "state": draft})))
}

async fn refine_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;
    let missing = job.state.missing_required_fields();
    if !missing.is_empty() {
        return Err(StoreError::MissingRequiredFields(missing).into());
    }

    let mut ctx = TaskContext::for_job(
        &id,
        serde_json::to_value(&job.state).map_err(ApiError::internal)?,
    );
    ctx.route = "refine".to_string();
    let run = state
        .orchestrator
        .run("refine", &ctx, CancellationToken::new())
        .await
        .map_err(ApiError::internal)?;

    match run.output {
        Ok(TaskOutput::Refine(outcome)) => {
            let updated = state
                .store
                .put_refinement(
                    &id,
                    outcome.refined.clone(),
                    outcome.summary.clone(),
                    outcome.metadata.clone(),
                )
                .await?;
            state
                .events
                .publish(EngineEvent::new("job.refined", json!({"jobId": id})));
            Ok(Json(json!({
                "originalJob": job.state,
                "refinedJob": outcome.refined,
                "summary": outcome.summary,
                "metadata": updated.metadata,
            })))
        }
        Ok(_) => Err(ApiError::internal("refine returned an unexpected output")),
        Err(failure) => {
            state.store.set_refine_failure(&id, failure.clone()).await?;
            Ok(Json(json!({
                "originalJob": job.state,
                "failure": failure,
            })))
        }
    }
}

/// Runs the channels task against the job's authoritative draft. Failures
/// are recorded and surfaced, never thrown.
async fn compute_channels(
    state: &AppState,
    job: &Job,
) -> (Vec<ChannelRecommendation>, Option<TaskFailure>) {
    let snapshot = match serde_json::to_value(job.final_draft()) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return (
                Vec::new(),
                Some(TaskFailure::new(FailureReason::UnknownFailure, err.to_string())),
            )
        }
    };
    let mut ctx = TaskContext::for_job(&job.job_id, snapshot);
    ctx.allowed_channels = ChannelId::ALL.to_vec();
    ctx.route = "channels".to_string();
    match state
        .orchestrator
        .run("channels", &ctx, CancellationToken::new())
        .await
    {
        Ok(run) => match run.output {
            Ok(TaskOutput::Channels { recommendations }) => (recommendations, None),
            Ok(_) => (
                Vec::new(),
                Some(TaskFailure::new(
                    FailureReason::ParserException,
                    "channels returned an unexpected output",
                )),
            ),
            Err(failure) => (Vec::new(), Some(failure)),
        },
        Err(fatal) => (
            Vec::new(),
            Some(TaskFailure::new(FailureReason::InvokeFailed, fatal.to_string())),
        ),
    }
}

async fn finalize_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<FinalizeInput>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .finalize(&id, input.final_job, input.source)
        .await?;
    state.events.publish(EngineEvent::new(
        "job.finalized",
        json!({"jobId": id, "source": input.source.as_str()}),
    ));

    let (recommendations, failure) = compute_channels(&state, &job).await;
    let updated = state
        .store
        .set_channel_recommendations(&id, recommendations, failure.clone())
        .await?;
    state
        .events
        .publish(EngineEvent::new("job.channels.updated", json!({"jobId": id})));
    Ok(Json(json!({
        "channelRecommendations": updated.channel_recommendations,
        "channelUpdatedAt": updated.channel_updated_at,
        "channelFailure": failure,
    })))
}

async fn get_channels(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or(StoreError::JobNotFound(id))?;
    Ok(Json(json!({
        "channelRecommendations": job.channel_recommendations,
        "channelUpdatedAt": job.channel_updated_at,
        "channelFailure": job.channel_failure,
    })))
}

async fn recompute_channels(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;
    let (recommendations, failure) = compute_channels(&state, &job).await;
    let updated = state
        .store
        .set_channel_recommendations(&id, recommendations, failure.clone())
        .await?;
    state
        .events
        .publish(EngineEvent::new("job.channels.updated", json!({"jobId": id})));
    Ok(Json(json!({
        "channelRecommendations": updated.channel_recommendations,
        "channelUpdatedAt": updated.channel_updated_at,
        "channelFailure": failure,
    })))
}

async fn start_assets(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<StartAssetsInput>,
) -> Result<Json<Value>, ApiError> {
    if input.channel_ids.is_empty() {
        return Err(ApiError::bad_request(
            "NO_CHANNELS",
            "channelIds must not be empty",
        ));
    }
    let mut channels = Vec::with_capacity(input.channel_ids.len());
    for raw in &input.channel_ids {
        let Some(channel) = ChannelId::from_token(raw) else {
            return Err(ApiError::bad_request(
                "INVALID_CHANNEL",
                format!("unknown channel `{raw}`"),
            ));
        };
        channels.push(channel);
    }

    let run = state.coordinator.plan(&id, &channels).await?;
    let coordinator = state.coordinator.clone();
    let events = state.events.clone();
    let job_id = id.clone();
    tokio::spawn(async move {
        coordinator
            .execute(&job_id, &channels, CancellationToken::new())
            .await;
        events.publish(EngineEvent::new(
            "asset_run.finished",
            json!({"jobId": job_id}),
        ));
    });
    state
        .events
        .publish(EngineEvent::new("asset_run.started", json!({"jobId": id})));
    Ok(Json(json!({"run": run})))
}

async fn get_assets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or(StoreError::JobNotFound(id))?;
    let mut assets: Vec<AssetView> = job
        .assets
        .into_iter()
        .map(|(asset_id, record)| AssetView { asset_id, record })
        .collect();
    assets.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
    Ok(Json(json!({"assets": assets, "run": job.asset_run})))
}

async fn get_hero_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or(StoreError::JobNotFound(id))?;
    Ok(Json(json!({"heroImage": job.hero_image})))
}

async fn request_hero_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<MediaRequestInput>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .hero
        .request(&id, input.force_refresh, CancellationToken::new())
        .await?;
    state
        .events
        .publish(EngineEvent::new("hero_image.updated", json!({"jobId": id})));
    Ok(Json(json!({"heroImage": record})))
}

async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await
        .ok_or(StoreError::JobNotFound(id))?;
    Ok(Json(json!({"video": job.video})))
}

async fn request_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<MediaRequestInput>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .video
        .request(&id, input.force_refresh, CancellationToken::new())
        .await?;
    state
        .events
        .publish(EngineEvent::new("video.updated", json!({"jobId": id})));
    Ok(Json(json!({"video": record})))
}

async fn copilot_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CopilotInput>,
) -> Result<Json<Value>, ApiError> {
    if input.message.trim().is_empty() {
        return Err(ApiError::bad_request(
            "EMPTY_MESSAGE",
            "message must not be empty",
        ));
    }
    let turn = state
        .copilot
        .handle_message(
            &id,
            input.message,
            input.stage,
            input.client_message_id,
            CancellationToken::new(),
        )
        .await?;
    state
        .events
        .publish(EngineEvent::new("copilot.message", json!({"jobId": id})));
    Ok(Json(json!({
        "messages": turn.messages,
        "actions": turn.actions,
        "updatedJobSnapshot": turn.updated_job_snapshot,
        "updatedRefinedSnapshot": turn.updated_refined_snapshot,
    })))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let messages = state.store.conversation(&id).await?;
    Ok(Json(json!({"messages": messages})))
}
