//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, MonitoredTarget, SubsequentRequestFilter, TargetKind};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

/// How many outcomes the status endpoint returns.
const STATUS_HISTORY_LIMIT: u32 = 100;

const FREQUENCY_TOO_LOW: &str = "check_frequency must be at least 1 second";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!("Request failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn find_target(state: &AppState, id: i64) -> Result<MonitoredTarget, Response> {
    match state.store.get_target(id) {
        Ok(target) => Ok(target),
        Err(DbError::NotFound) => Err(error_response(StatusCode::NOT_FOUND, "URL not found")),
        Err(e) => Err(internal_error(e)),
    }
}

// ============================================================================
// API: Targets
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type", default)]
    pub kind: TargetKind,
}

pub async fn handle_get_targets(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state.store.list_targets(query.kind) {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: Option<String>,
    pub name: Option<String>,
    pub check_frequency: Option<i64>,
    #[serde(default)]
    pub one_time: bool,
    #[serde(default)]
    pub alert_enabled: bool,
    pub alert_recovery: Option<bool>,
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    body: Result<Json<CreateTargetRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(req)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "URL is required");
    };
    let url = match req.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return error_response(StatusCode::BAD_REQUEST, "URL is required"),
    };
    let check_frequency = req.check_frequency.unwrap_or(60);
    if check_frequency < 1 {
        return error_response(StatusCode::BAD_REQUEST, FREQUENCY_TOO_LOW);
    }

    if !req.one_time {
        match state.store.find_monitored_by_url(&url) {
            Ok(Some(existing)) => {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({
                        "error": "This URL is already being monitored",
                        "existing_url_id": existing.id,
                    })),
                )
                    .into_response()
            }
            Ok(None) => {}
            Err(e) => return internal_error(e),
        }
    }

    let mut target = MonitoredTarget {
        name: req.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| url.clone()),
        url,
        // One-time targets are stored for their history but never scheduled.
        active: !req.one_time,
        check_frequency,
        one_time: req.one_time,
        alert_enabled: req.alert_enabled,
        alert_recovery: req.alert_recovery.unwrap_or(true),
        ..Default::default()
    };
    if let Err(e) = state.store.add_target(&mut target) {
        return internal_error(e);
    }

    if target.one_time {
        return match state.monitor.check_once(&target).await {
            Ok(report) => Json(json!({
                "id": target.id,
                "url": target.url,
                "name": target.name,
                "is_one_time": true,
                "status": report.status,
                "subsequent_requests": report.subsequent_requests,
            }))
            .into_response(),
            Err(e) => internal_error(e),
        };
    }

    if target.is_recurring() {
        if let Err(e) = state.scheduler.schedule(target.clone()).await {
            tracing::error!("First check for {} failed: {}", target.name, e);
        }
    }

    (StatusCode::CREATED, Json(target)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    pub name: Option<String>,
    pub check_frequency: Option<i64>,
    pub is_active: Option<bool>,
    pub alert_enabled: Option<bool>,
    pub alert_recovery: Option<bool>,
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<UpdateTargetRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let mut target = match find_target(&state, id) {
        Ok(t) => t,
        Err(response) => return response,
    };

    if let Some(name) = req.name {
        target.name = name;
    }
    if let Some(check_frequency) = req.check_frequency {
        if check_frequency < 1 {
            return error_response(StatusCode::BAD_REQUEST, FREQUENCY_TOO_LOW);
        }
        target.check_frequency = check_frequency;
    }
    if let Some(active) = req.is_active {
        target.active = active;
    }
    if let Some(alert_enabled) = req.alert_enabled {
        target.alert_enabled = alert_enabled;
    }
    if let Some(alert_recovery) = req.alert_recovery {
        target.alert_recovery = alert_recovery;
    }

    if let Err(e) = state.store.update_target(&mut target) {
        return internal_error(e);
    }

    if target.is_recurring() {
        // A paused target coming back has no job to replace.
        let checked = match state.scheduler.reschedule(target.clone()).await {
            Some(checked) => checked,
            None => state.scheduler.schedule(target.clone()).await,
        };
        if let Err(e) = checked {
            tracing::error!("Check after update of {} failed: {}", target.name, e);
        }
    } else {
        state.scheduler.unschedule(id).await;
    }

    Json(target).into_response()
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let target = match find_target(&state, id) {
        Ok(t) => t,
        Err(response) => return response,
    };

    state.scheduler.unschedule(id).await;

    match state.store.delete_target(id) {
        Ok(counts) => {
            state.monitor.forget(id);
            Json(json!({
                "message": format!("URL \"{}\" deleted successfully", target.name),
                "details": {
                    "url_id": id,
                    "deleted_status_records": counts.deleted_status_records,
                    "deleted_subsequent_requests": counts.deleted_subsequent_requests,
                },
            }))
            .into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// API: History
// ============================================================================

pub async fn handle_get_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(response) = find_target(&state, id) {
        return response;
    }

    match state.store.latest_outcomes(id, STATUS_HISTORY_LIMIT) {
        Ok(outcomes) => Json(outcomes).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_get_subsequent_requests(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(filter): Query<SubsequentRequestFilter>,
) -> impl IntoResponse {
    if let Err(response) = find_target(&state, id) {
        return response;
    }

    match state.store.subsequent_requests(id, &filter) {
        Ok(requests) => Json(requests).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_get_alert_state(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.load_alert_state(id) {
        Ok(alert_state) => Json(alert_state).into_response(),
        Err(DbError::NotFound) => error_response(StatusCode::NOT_FOUND, "URL not found"),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_get_filter_options(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.filter_options() {
        Ok(options) => Json(options).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "scheduled_jobs": state.scheduler.active_jobs().await,
    }))
}
