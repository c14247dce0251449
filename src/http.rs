//! HTTP API and the websocket refresh feed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::assignment::{end_call, reconcile_assignments, EndCallOutcome, ReconcileOutcome, ReconcileRequest};
use crate::calls::{self, AssignedUnit, Call, CallEvent, NewCall};
use crate::catalog::{self, CallsignValue, NewCallsignValue, NewStatus, Status};
use crate::notifier::{DispatchSignal, Notifier};
use crate::relation_diff::DiffSummary;
use crate::state::AppState;
use crate::units::{self, NewUnit, Unit, UnitKind, UnitRef};
use crate::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/calls", post(create_call).get(list_calls))
        .route("/api/calls/:id", get(get_call))
        .route("/api/calls/:id/events", get(call_events))
        .route(
            "/api/calls/:id/assigned-units",
            put(update_assigned_units).get(assigned_units),
        )
        .route("/api/calls/:id/end", post(end_call_handler))
        .route("/api/units/:kind", post(create_unit).get(list_units))
        .route("/api/units/:kind/:id/status", put(update_unit_status))
        .route("/api/officers/:id/divisions", put(update_officer_divisions))
        .route("/api/statuses", post(create_status).get(list_statuses))
        .route("/api/departments", post(create_department))
        .route("/api/divisions", post(create_division))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub(crate) fn status_for(err: &AppError) -> StatusCode {
    if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_conflict() {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(target: "cad_dispatch", event = "request_failed", error = %self);
        }
        (status, Json(self)).into_response()
    }
}

pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Calls ===

pub async fn create_call(
    State(state): State<AppState>,
    Json(input): Json<NewCall>,
) -> AppResult<(StatusCode, Json<Call>)> {
    let call = calls::create_call(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(call)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCallsQuery {
    #[serde(default)]
    pub include_ended: bool,
}

pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<ListCallsQuery>,
) -> AppResult<Json<Vec<Call>>> {
    Ok(Json(calls::list_calls(&state.pool, query.include_ended).await?))
}

pub async fn get_call(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Call>> {
    Ok(Json(calls::get_call(&state.pool, &id).await?))
}

pub async fn call_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<CallEvent>>> {
    calls::get_call(&state.pool, &id).await?;
    Ok(Json(calls::list_call_events(&state.pool, &id).await?))
}

pub async fn assigned_units(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<AssignedUnit>>> {
    calls::get_call(&state.pool, &id).await?;
    Ok(Json(calls::list_assigned_units(&state.pool, &id).await?))
}

/// PUT /api/calls/:id/assigned-units
pub async fn update_assigned_units(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReconcileRequest>,
) -> AppResult<Json<ReconcileOutcome>> {
    let outcome = reconcile_assignments(
        &state.pool,
        &id,
        &request,
        &state.config.dispatch,
        state.notifier.as_ref(),
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepointedUnit {
    pub unit: UnitRef,
    pub next_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRepoint {
    pub unit: UnitRef,
    pub error: AppError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallSummary {
    pub call_id: String,
    pub removed_assignments: usize,
    pub repointed: Vec<RepointedUnit>,
    pub failed: Vec<FailedRepoint>,
}

impl From<EndCallOutcome> for EndCallSummary {
    fn from(outcome: EndCallOutcome) -> Self {
        let mut repointed = Vec::new();
        let mut failed = Vec::new();
        for update in outcome.pointer_updates {
            match update.result {
                Ok(next_call_id) => repointed.push(RepointedUnit {
                    unit: update.unit,
                    next_call_id,
                }),
                Err(error) => failed.push(FailedRepoint {
                    unit: update.unit,
                    error,
                }),
            }
        }
        EndCallSummary {
            call_id: outcome.call_id,
            removed_assignments: outcome.removed_assignments,
            repointed,
            failed,
        }
    }
}

/// POST /api/calls/:id/end
pub async fn end_call_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<EndCallSummary>> {
    let outcome = end_call(&state.pool, &id, state.notifier.as_ref()).await?;
    Ok(Json(outcome.into()))
}

// === Units ===

pub async fn create_unit(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(input): Json<NewUnit>,
) -> AppResult<(StatusCode, Json<Unit>)> {
    let kind: UnitKind = kind.parse()?;
    let unit = units::create_unit(&state.pool, kind, input).await?;
    Ok((StatusCode::CREATED, Json(unit)))
}

pub async fn list_units(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> AppResult<Json<Vec<Unit>>> {
    let kind: UnitKind = kind.parse()?;
    Ok(Json(units::list_units(&state.pool, kind).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatusBody {
    #[serde(default)]
    pub status_id: Option<String>,
}

pub async fn update_unit_status(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<UnitStatusBody>,
) -> AppResult<Json<Unit>> {
    let unit = UnitRef::new(kind.parse()?, id);
    let updated = units::set_unit_status(&state.pool, &unit, body.status_id.as_deref()).await?;
    if unit.kind.is_leo() {
        state.notifier.officer_status_changed();
    } else {
        state.notifier.deputy_status_changed();
    }
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerDivisionsBody {
    pub division_ids: Vec<String>,
}

pub async fn update_officer_divisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OfficerDivisionsBody>,
) -> AppResult<Json<DiffSummary>> {
    let summary = units::set_officer_divisions(&state.pool, &id, body.division_ids).await?;
    Ok(Json(summary))
}

// === Lookup values ===

pub async fn create_status(
    State(state): State<AppState>,
    Json(input): Json<NewStatus>,
) -> AppResult<(StatusCode, Json<Status>)> {
    let status = catalog::create_status(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(status)))
}

pub async fn list_statuses(State(state): State<AppState>) -> AppResult<Json<Vec<Status>>> {
    Ok(Json(catalog::list_statuses(&state.pool).await?))
}

pub async fn create_department(
    State(state): State<AppState>,
    Json(input): Json<NewCallsignValue>,
) -> AppResult<(StatusCode, Json<CallsignValue>)> {
    let department = catalog::create_department(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn create_division(
    State(state): State<AppState>,
    Json(input): Json<NewCallsignValue>,
) -> AppResult<(StatusCode, Json<CallsignValue>)> {
    let division = catalog::create_division(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(division)))
}

// === Websocket ===

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let signals = state.notifier.subscribe();
    ws.on_upgrade(move |socket| stream_signals(socket, signals))
}

async fn stream_signals(mut socket: WebSocket, mut signals: broadcast::Receiver<DispatchSignal>) {
    tracing::debug!(target: "cad_dispatch", event = "ws_connected");
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Ok(signal) => {
                    let Ok(text) = serde_json::to_string(&signal) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // Refresh signals are idempotent; the next one covers the gap.
                    tracing::debug!(target: "cad_dispatch", event = "ws_lagged", missed);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(target: "cad_dispatch", event = "ws_disconnected");
}
