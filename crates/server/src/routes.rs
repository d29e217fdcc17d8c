use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use server_api as api;
use shared::{
    domain::{Property, PropertyStep, Script, ScriptId, ScriptSummary},
    error::{ApiError, ErrorCode},
    protocol::{
        AnalyticsQuery, AnalyticsReport, AuthenticateRequest, AuthenticateResponse,
        CodeLengthResponse, ConfigResponse, ConfigUpdateRequest, ConfigUpdateResponse,
        DeleteResponse, HealthResponse, PlaybackEvent, PlaybackSnapshot, PresentRequest,
        PresentResponse, PropertyFilter, RecentUsageQuery, RefreshResponse, ScriptDraft,
        TableActionResponse, UsageLogRecord, UsageLogRequest, UsageLogResponse,
        WebContentRequest,
    },
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{debug, warn};

use crate::app_state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

type Rejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, Rejection>;

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/config", get(config))
        .route("/api/admin/authenticate", post(authenticate))
        .route("/api/admin/code-length", get(code_length))
        .route("/api/admin/config", post(update_config))
        .route("/api/admin/refresh", post(refresh))
        .route("/api/properties", get(list_properties))
        .route("/api/properties/submarkets", get(list_submarkets))
        .route("/api/properties/classes", get(list_property_classes))
        .route("/api/scripts", get(list_scripts).post(create_script))
        .route(
            "/api/scripts/:id",
            get(get_script).put(update_script).delete(delete_script),
        )
        .route("/api/usage/log", post(log_usage))
        .route("/api/usage/analytics", get(usage_analytics))
        .route("/api/usage/recent", get(recent_usage))
        .route("/api/marketcanvas2/present", post(present))
        .route("/api/playback", get(playback))
        .route("/api/playback/scripts/:id/play", post(play_script))
        .route("/api/playback/next", post(next_step))
        .route("/api/playback/previous", post(previous_step))
        .route("/api/playback/stop", post(stop_playback))
        .route("/api/table/activate", post(activate_table))
        .route("/api/table/flatten", post(flatten_table))
        .route("/api/table/web-content", post(web_content))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn reject(err: ApiError) -> Rejection {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn health() -> Json<HealthResponse> {
    Json(api::health())
}

async fn config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(api::current_config(&state.api))
}

async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AuthenticateRequest>,
) -> ApiResult<AuthenticateResponse> {
    api::authenticate(&state.api, &req).map(Json).map_err(reject)
}

async fn code_length(State(state): State<Arc<AppState>>) -> Json<CodeLengthResponse> {
    Json(api::admin_code_length(&state.api))
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfigUpdateRequest>,
) -> ApiResult<ConfigUpdateResponse> {
    api::update_config(&state.api, &req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn refresh(State(state): State<Arc<AppState>>) -> ApiResult<RefreshResponse> {
    api::refresh_properties(&state.api)
        .await
        .map(Json)
        .map_err(reject)
}

async fn list_properties(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PropertyFilter>,
) -> ApiResult<Vec<Property>> {
    api::list_properties(&state.api, &filter)
        .await
        .map(Json)
        .map_err(reject)
}

async fn list_submarkets(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    api::list_submarkets(&state.api)
        .await
        .map(Json)
        .map_err(reject)
}

async fn list_property_classes(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    api::list_property_classes(&state.api)
        .await
        .map(Json)
        .map_err(reject)
}

async fn list_scripts(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ScriptSummary>> {
    api::list_scripts(&state.api)
        .await
        .map(Json)
        .map_err(reject)
}

async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Script> {
    api::get_script(&state.api, ScriptId(id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn create_script(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ScriptDraft>,
) -> Result<(StatusCode, Json<Script>), Rejection> {
    let script = api::create_script(&state.api, &draft)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(script)))
}

async fn update_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(draft): Json<ScriptDraft>,
) -> ApiResult<Script> {
    api::update_script(&state.api, ScriptId(id), &draft)
        .await
        .map(Json)
        .map_err(reject)
}

async fn delete_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<DeleteResponse> {
    api::delete_script(&state.api, ScriptId(id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn log_usage(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UsageLogRequest>,
) -> ApiResult<UsageLogResponse> {
    api::log_usage(&state.api, &req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn usage_analytics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<AnalyticsReport> {
    api::usage_analytics(&state.api, &query)
        .await
        .map(Json)
        .map_err(reject)
}

async fn recent_usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentUsageQuery>,
) -> ApiResult<Vec<UsageLogRecord>> {
    api::recent_usage(&state.api, &query)
        .await
        .map(Json)
        .map_err(reject)
}

async fn present(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PresentRequest>,
) -> ApiResult<PresentResponse> {
    api::present_property(&state.api, &req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn playback(State(state): State<Arc<AppState>>) -> Json<PlaybackSnapshot> {
    Json(api::playback_snapshot(&state.api))
}

async fn play_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<PlaybackSnapshot> {
    api::play_script(&state.api, ScriptId(id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn next_step(State(state): State<Arc<AppState>>) -> Json<PlaybackSnapshot> {
    Json(api::next_step(&state.api).await)
}

async fn previous_step(State(state): State<Arc<AppState>>) -> Json<PlaybackSnapshot> {
    Json(api::previous_step(&state.api).await)
}

async fn stop_playback(State(state): State<Arc<AppState>>) -> Json<PlaybackSnapshot> {
    Json(api::stop_playback(&state.api))
}

async fn activate_table(
    State(state): State<Arc<AppState>>,
    Json(step): Json<PropertyStep>,
) -> ApiResult<TableActionResponse> {
    api::activate_table(&state.api, step)
        .await
        .map(Json)
        .map_err(reject)
}

async fn flatten_table(State(state): State<Arc<AppState>>) -> Json<TableActionResponse> {
    Json(api::flatten_table(&state.api).await)
}

async fn web_content(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WebContentRequest>,
) -> ApiResult<TableActionResponse> {
    api::display_web_content(&state.api, &req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// Sends the current snapshot, then every playback event until the client
/// goes away.
async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.api.playback.subscribe();
    let initial = PlaybackEvent::SessionUpdated(state.api.playback.snapshot());

    let send_task = tokio::spawn(async move {
        let mut next = Some(initial);
        loop {
            let event = match next.take() {
                Some(event) => event,
                None => match events_rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "operator socket lagging, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}
    debug!("operator socket closed");

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;
