use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::client::ApiClient;
use crate::connectivity::ConnectivityMonitor;
use crate::metrics;
use crate::models::{NotificationSettings, OutgoingRequest, PendingRequest, ScheduledNotification, SettingKey};
use crate::notifier::{NotificationCenter, TimerNotificationCenter};
use crate::queue::{DrainOutcome, OfflineQueue, SubmitOutcome};
use crate::scheduler::{PassOutcome, SmartScheduler};
use crate::settings::SettingsStore;

pub type Scheduler = SmartScheduler<ApiClient, TimerNotificationCenter>;
pub type RequestQueue = OfflineQueue<ConnectivityMonitor, ApiClient>;

type ApiResult<T> = Result<T, (StatusCode, String)>;

#[derive(Deserialize)]
struct SettingValue {
    value: bool,
}

pub struct ApiState {
    pub user_id: String,
    pub settings: Arc<SettingsStore>,
    pub scheduler: Arc<Scheduler>,
    pub queue: Arc<RequestQueue>,
    pub center: TimerNotificationCenter,
}

/// Local control surface used by the app process.
pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/settings", get(get_settings).put(replace_settings))
        .route("/settings/:key", patch(update_setting))
        .route("/schedule", post(run_schedule))
        .route("/notifications", get(list_notifications))
        .route("/requests", post(submit_request))
        .route("/queue", get(list_queue))
        .route("/queue/drain", post(drain_queue))
        .route("/metrics", get(|| async { metrics::gather_metrics() }))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(ConcurrencyLimitLayer::new(16))
        .layer(CorsLayer::permissive())
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Control API storage error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {}", e))
}

async fn get_settings(State(state): State<Arc<ApiState>>) -> ApiResult<Json<NotificationSettings>> {
    state.settings.load().await.map(Json).map_err(internal_error)
}

async fn replace_settings(
    State(state): State<Arc<ApiState>>,
    Json(settings): Json<NotificationSettings>,
) -> ApiResult<Json<NotificationSettings>> {
    state
        .settings
        .replace(settings)
        .await
        .map_err(internal_error)?;
    Ok(Json(settings))
}

async fn update_setting(
    State(state): State<Arc<ApiState>>,
    Path(key): Path<String>,
    Json(body): Json<SettingValue>,
) -> ApiResult<Json<NotificationSettings>> {
    let key: SettingKey = key
        .parse()
        .map_err(|e: crate::error::ParseError| (StatusCode::NOT_FOUND, e.to_string()))?;

    state
        .settings
        .update(key, body.value)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn run_schedule(State(state): State<Arc<ApiState>>) -> Json<PassOutcome> {
    tracing::info!("Scheduling pass requested through control API");
    Json(
        state
            .scheduler
            .schedule_smart_notifications(&state.user_id)
            .await,
    )
}

async fn list_notifications(State(state): State<Arc<ApiState>>) -> Json<Vec<ScheduledNotification>> {
    Json(state.center.scheduled().await)
}

async fn submit_request(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<OutgoingRequest>,
) -> axum::response::Response {
    match state.queue.submit(request).await {
        Ok(outcome @ SubmitOutcome::Sent { .. }) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(outcome @ SubmitOutcome::Queued { .. }) => {
            (StatusCode::ACCEPTED, Json(outcome)).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

async fn list_queue(State(state): State<Arc<ApiState>>) -> ApiResult<Json<Vec<PendingRequest>>> {
    state.queue.pending().await.map(Json).map_err(internal_error)
}

async fn drain_queue(State(state): State<Arc<ApiState>>) -> ApiResult<Json<DrainOutcome>> {
    state.queue.drain().await.map(Json).map_err(internal_error)
}
