use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::browser::TabId;
use crate::coordinator::{reconcile_action_behavior, ActionBehavior, CoordinatorHandle};
use crate::error::{QueueError, ScrapeError};
use crate::parser::parse_linkedin_pdf_text;
use crate::processor::ExtensionTabProcessor;
use crate::profile::StructuredProfile;
use crate::queue::{QueueItem, QueueResult, QueueState};
use crate::recruiting_api::Application;
use crate::settings::{Settings, SettingsStore};
use crate::sourcing::build_people_search_url;
use crate::worker::BatchQueueEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BatchQueueEngine>,
    pub processor: Arc<ExtensionTabProcessor>,
    pub coordinator: CoordinatorHandle,
    pub settings_store: Arc<SettingsStore>,
}

// ============================================================================
// Errors
// ============================================================================

pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        let status = match &e {
            QueueError::Busy | QueueError::AlreadyDecided(_) => StatusCode::CONFLICT,
            QueueError::NoSuchResult(_) => StatusCode::NOT_FOUND,
            QueueError::NoProfile(_) | QueueError::NoScorecard => StatusCode::UNPROCESSABLE_ENTITY,
            QueueError::Scrape(_) | QueueError::Api(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, format!("{:#}", e))
    }
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        let status = match &e {
            ScrapeError::TabLifecycle(_) => StatusCode::NOT_FOUND,
            ScrapeError::CaptureTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, e.to_string())
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub scorecard_id: String,
    /// Items to process; the detected items when absent.
    pub items: Option<Vec<QueueItem>>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub run_id: Uuid,
    pub items: usize,
}

#[derive(Serialize, ToSchema)]
pub struct StopResponse {
    pub stopping: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequest {
    /// People-search results URL; built from `keywords` when absent.
    pub search_url: Option<String>,
    pub keywords: Option<String>,
    pub scorecard_id: String,
    pub target_count: usize,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub run_id: Option<Uuid>,
    pub discovered: usize,
}

#[utoipa::path(
    get,
    path = "/queue",
    responses((status = 200, description = "Current queue state", body = QueueState)),
    tag = "queue"
)]
pub async fn get_queue(State(state): State<AppState>) -> Json<QueueState> {
    Json(state.engine.snapshot())
}

#[utoipa::path(
    post,
    path = "/queue/detect",
    responses(
        (status = 200, description = "Profile tabs found", body = Vec<QueueItem>),
        (status = 502, description = "Browser unavailable", body = ErrorBody)
    ),
    tag = "queue"
)]
pub async fn detect_tabs(State(state): State<AppState>) -> Result<Json<Vec<QueueItem>>, ApiError> {
    Ok(Json(state.engine.detect().await?))
}

#[utoipa::path(
    post,
    path = "/queue/start",
    request_body = StartRequest,
    responses(
        (status = 202, description = "Run started", body = RunAccepted),
        (status = 409, description = "A run is already active", body = ErrorBody)
    ),
    tag = "queue"
)]
pub async fn start_queue(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let run = state
        .engine
        .claim_run(&payload.scorecard_id, payload.items)
        .ok_or(QueueError::Busy)?;
    let accepted = RunAccepted {
        run_id: run.id,
        items: run.items.len(),
    };

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let outcome = engine.run(run).await;
        info!("[API] run finished: {:?}", outcome);
    });

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[utoipa::path(
    post,
    path = "/queue/stop",
    responses((status = 200, description = "Whether a stop was requested", body = StopResponse)),
    tag = "queue"
)]
pub async fn stop_queue(State(state): State<AppState>) -> Json<StopResponse> {
    Json(StopResponse {
        stopping: state.engine.stop_queue(),
    })
}

#[utoipa::path(
    post,
    path = "/queue/source",
    request_body = SourceRequest,
    responses(
        (status = 200, description = "Sourcing finished; the run continues in the background", body = SourceResponse),
        (status = 400, description = "Neither search URL nor keywords", body = ErrorBody),
        (status = 409, description = "Engine busy", body = ErrorBody),
        (status = 502, description = "Sourcing failed", body = ErrorBody)
    ),
    tag = "queue"
)]
pub async fn source_profiles(
    State(state): State<AppState>,
    Json(payload): Json<SourceRequest>,
) -> Result<Json<SourceResponse>, ApiError> {
    let search_url = match (payload.search_url, payload.keywords) {
        (Some(url), _) if !url.trim().is_empty() => url,
        (_, Some(keywords)) if !keywords.trim().is_empty() => build_people_search_url(&keywords),
        _ => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "searchUrl or keywords is required",
            ))
        }
    };

    let run = state
        .engine
        .source_and_claim(&search_url, &payload.scorecard_id, payload.target_count)
        .await?;

    let Some(run) = run else {
        return Ok(Json(SourceResponse {
            run_id: None,
            discovered: 0,
        }));
    };
    let response = SourceResponse {
        run_id: Some(run.id),
        discovered: run.items.len(),
    };

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let outcome = engine.run(run).await;
        info!("[API] sourced run finished: {:?}", outcome);
    });
    Ok(Json(response))
}

// ============================================================================
// Review
// ============================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    /// Result indices, best match first.
    pub order: Vec<usize>,
    /// Results in processing order.
    pub results: Vec<QueueResult>,
}

#[utoipa::path(
    get,
    path = "/queue/review",
    responses((status = 200, description = "Results ordered for review", body = ReviewResponse)),
    tag = "review"
)]
pub async fn get_review(State(state): State<AppState>) -> Json<ReviewResponse> {
    let snapshot = state.engine.snapshot();
    Json(ReviewResponse {
        order: snapshot.review_order(),
        results: snapshot.results,
    })
}

#[utoipa::path(
    post,
    path = "/queue/review/{index}/accept",
    params(("index" = usize, Path, description = "Result index")),
    responses(
        (status = 200, description = "Application created", body = Application),
        (status = 404, description = "No such result", body = ErrorBody),
        (status = 409, description = "Already decided", body = ErrorBody)
    ),
    tag = "review"
)]
pub async fn accept_result(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<Application>, ApiError> {
    Ok(Json(state.engine.accept(index).await?))
}

#[utoipa::path(
    post,
    path = "/queue/review/{index}/reject",
    params(("index" = usize, Path, description = "Result index")),
    responses(
        (status = 204, description = "Rejected"),
        (status = 404, description = "No such result", body = ErrorBody),
        (status = 409, description = "Already decided", body = ErrorBody)
    ),
    tag = "review"
)]
pub async fn reject_result(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<StatusCode, ApiError> {
    state.engine.reject(index)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub settings: Settings,
    pub action_behavior: ActionBehavior,
}

impl SettingsView {
    fn of(settings: Settings) -> Self {
        Self {
            action_behavior: reconcile_action_behavior(&settings),
            settings,
        }
    }
}

#[utoipa::path(
    get,
    path = "/settings",
    responses((status = 200, description = "Current settings", body = SettingsView)),
    tag = "settings"
)]
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    let settings = state.coordinator.settings().read().await.clone();
    Json(SettingsView::of(settings))
}

#[utoipa::path(
    put,
    path = "/settings",
    request_body = Settings,
    responses(
        (status = 200, description = "Settings saved", body = SettingsView),
        (status = 500, description = "Settings file not writable", body = ErrorBody)
    ),
    tag = "settings"
)]
pub async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<SettingsView>, ApiError> {
    state.settings_store.save(&settings).await.map_err(|e| {
        error!("🔥 [API] saving settings failed: {:#}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    })?;
    *state.coordinator.settings().write().await = settings.clone();

    let view = SettingsView::of(settings);
    info!("[API] settings saved, action behavior {:?}", view.action_behavior);
    Ok(Json(view))
}

// ============================================================================
// Single Profile
// ============================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub tab_id: TabId,
}

#[derive(Deserialize, ToSchema)]
pub struct ParseRequest {
    pub text: String,
}

#[utoipa::path(
    post,
    path = "/profile/capture",
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Profile captured", body = StructuredProfile),
        (status = 404, description = "Tab not found", body = ErrorBody),
        (status = 409, description = "A run or sourcing pass owns the browser", body = ErrorBody),
        (status = 504, description = "No capture in time", body = ErrorBody)
    ),
    tag = "profile"
)]
pub async fn capture_profile(
    State(state): State<AppState>,
    Json(payload): Json<CaptureRequest>,
) -> Result<Json<StructuredProfile>, ApiError> {
    if state.engine.snapshot().phase.is_busy() {
        return Err(QueueError::Busy.into());
    }
    Ok(Json(state.processor.capture_single(&payload.tab_id).await?))
}

#[utoipa::path(
    post,
    path = "/profile/parse",
    request_body = ParseRequest,
    responses((status = 200, description = "Parsed profile", body = StructuredProfile)),
    tag = "profile"
)]
pub async fn parse_profile_text(Json(payload): Json<ParseRequest>) -> Json<StructuredProfile> {
    Json(parse_linkedin_pdf_text(&payload.text))
}
