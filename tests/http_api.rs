#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "util.rs"]
mod util;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cad_dispatch_lib::assignment::{AssignmentRequest, ReconcileRequest};
use cad_dispatch_lib::calls::NewCall;
use cad_dispatch_lib::config::Config;
use cad_dispatch_lib::http::{self, ListCallsQuery, OfficerDivisionsBody, UnitStatusBody};
use cad_dispatch_lib::notifier::DispatchSignal;
use cad_dispatch_lib::state::AppState;
use cad_dispatch_lib::units::NewUnit;
use cad_dispatch_lib::AppError;

async fn state() -> AppState {
    AppState::new(util::temp_pool().await, Config::default())
}

fn new_call(location: &str) -> NewCall {
    NewCall {
        location: location.into(),
        description: Some("Shots fired".into()),
    }
}

fn new_unit(callsign: &str) -> NewUnit {
    NewUnit {
        callsign: callsign.into(),
        ..NewUnit::default()
    }
}

#[tokio::test]
async fn call_lifecycle_over_handlers() -> Result<()> {
    let state = state().await;
    let mut signals = state.notifier.subscribe();

    let (status, Json(call)) = http::create_call(State(state.clone()), Json(new_call("Strawberry"))).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (_, Json(unit)) = http::create_unit(
        State(state.clone()),
        Path("officers".to_string()),
        Json(new_unit("12")),
    )
    .await?;

    let Json(outcome) = http::update_assigned_units(
        State(state.clone()),
        Path(call.id.clone()),
        Json(ReconcileRequest {
            units: vec![AssignmentRequest::new(unit.id.clone(), true)],
            expected_version: Some(0),
        }),
    )
    .await?;
    assert_eq!(outcome.connected, vec![unit.unit_ref()]);
    assert_eq!(signals.recv().await?, DispatchSignal::UpdateOfficerStatus);
    assert_eq!(signals.recv().await?, DispatchSignal::UpdateEmsFdStatus);

    let Json(assigned) = http::assigned_units(State(state.clone()), Path(call.id.clone())).await?;
    assert_eq!(assigned.len(), 1);

    let Json(summary) = http::end_call_handler(State(state.clone()), Path(call.id.clone())).await?;
    assert_eq!(summary.removed_assignments, 1);
    assert_eq!(summary.repointed.len(), 1);
    assert!(summary.failed.is_empty());

    let Json(open) = http::list_calls(State(state.clone()), Query(ListCallsQuery::default())).await?;
    assert!(open.is_empty());

    let Json(events) = http::call_events(State(state.clone()), Path(call.id.clone())).await?;
    let descriptions: Vec<&str> = events.iter().map(|e| e.description.as_str()).collect();
    assert_eq!(descriptions.last().copied(), Some("Call ended"));
    Ok(())
}

#[tokio::test]
async fn stale_assignment_maps_to_conflict() -> Result<()> {
    let state = state().await;
    let (_, Json(call)) = http::create_call(State(state.clone()), Json(new_call("Elysian Island"))).await?;

    let err = http::update_assigned_units(
        State(state.clone()),
        Path(call.id.clone()),
        Json(ReconcileRequest {
            units: Vec::new(),
            expected_version: Some(7),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn unknown_unit_kind_is_bad_request() -> Result<()> {
    let state = state().await;
    let err = http::list_units(State(state), Path("dispatchers".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn missing_call_is_not_found() -> Result<()> {
    let state = state().await;
    let err = http::get_call(State(state), Path("missing".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn deputy_status_change_signals_ems_board() -> Result<()> {
    let state = state().await;
    let mut signals = state.notifier.subscribe();
    let (_, Json(deputy)) = http::create_unit(
        State(state.clone()),
        Path("ems-fd-deputies".to_string()),
        Json(new_unit("M2")),
    )
    .await?;
    let (_, Json(status)) = http::create_status(
        State(state.clone()),
        Json(serde_json::from_value(serde_json::json!({"value": "10-8", "kind": "on_duty"}))?),
    )
    .await?;

    let Json(updated) = http::update_unit_status(
        State(state.clone()),
        Path(("ems_fd_deputy".to_string(), deputy.id.clone())),
        Json(UnitStatusBody {
            status_id: Some(status.id.clone()),
        }),
    )
    .await?;
    assert_eq!(updated.status_id, Some(status.id));
    assert_eq!(signals.recv().await?, DispatchSignal::UpdateEmsFdStatus);
    Ok(())
}

#[tokio::test]
async fn officer_divisions_are_reconciled() -> Result<()> {
    let state = state().await;
    let (_, Json(officer)) = http::create_unit(
        State(state.clone()),
        Path("officer".to_string()),
        Json(new_unit("7")),
    )
    .await?;
    let mut division_ids = Vec::new();
    for name in ["Patrol", "Traffic", "K9"] {
        let (_, Json(division)) = http::create_division(
            State(state.clone()),
            Json(serde_json::from_value(serde_json::json!({"value": name, "callsign": name[..1].to_string()}))?),
        )
        .await?;
        division_ids.push(division.id);
    }

    let Json(first) = http::update_officer_divisions(
        State(state.clone()),
        Path(officer.id.clone()),
        Json(OfficerDivisionsBody {
            division_ids: division_ids[..2].to_vec(),
        }),
    )
    .await?;
    assert_eq!(first.connected.len(), 2);

    let Json(second) = http::update_officer_divisions(
        State(state.clone()),
        Path(officer.id.clone()),
        Json(OfficerDivisionsBody {
            division_ids: division_ids[1..].to_vec(),
        }),
    )
    .await?;
    assert!(second.connected.contains(&division_ids[2]));
    assert!(second.disconnected.contains(&division_ids[0]));
    assert_eq!(second.connected.len() + second.disconnected.len(), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_department_or_division_is_not_found() -> Result<()> {
    let state = state().await;
    let err = http::create_unit(
        State(state.clone()),
        Path("officers".to_string()),
        Json(NewUnit {
            department_id: Some("no-such-department".into()),
            ..new_unit("8")
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "DEPARTMENT/NOT_FOUND");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

    let (_, Json(officer)) = http::create_unit(
        State(state.clone()),
        Path("officers".to_string()),
        Json(new_unit("9")),
    )
    .await?;
    let err = http::update_officer_divisions(
        State(state.clone()),
        Path(officer.id.clone()),
        Json(OfficerDivisionsBody {
            division_ids: vec!["no-such-division".into()],
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "DIVISION/NOT_FOUND");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[test]
fn error_body_is_flat_json() {
    let err = AppError::call_not_found("c9");
    let body = serde_json::to_value(&err).expect("serialize");
    assert_eq!(body["code"], "CALL/NOT_FOUND");
    assert_eq!(body["context"]["call_id"], "c9");
}

#[tokio::test]
async fn router_builds_with_state() {
    let _router = http::router(state().await);
}
