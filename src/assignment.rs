//! Attaching and detaching responding units to a call.
//!
//! [`reconcile_assignments`] moves a call's assigned units to the set the
//! dispatcher asked for. Units that cannot be attached (gone, off duty, or
//! at their assignment cap) are skipped rather than failing the batch, and
//! reported back in [`ReconcileOutcome::skipped`]. The whole read-diff-apply
//! runs in one transaction and is guarded by the call's `version`.
//!
//! [`end_call`] closes a call and repoints each of its units at the next
//! open call they are assigned to.

use std::collections::HashMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::calls::{add_call_event, assigned_units_for_call, find_call, AssignedUnit, Call};
use crate::config::DispatchConfig;
use crate::db::begin_immediate;
use crate::error::{CALL_ENDED, CALL_STALE_VERSION};
use crate::notifier::Notifier;
use crate::relation_diff::{compute_diff, merge, DiffOp, DiffOptions};
use crate::units::{
    count_open_assignments, display_callsign, find_assignable_unit, get_unit,
    next_active_call_id, set_active_call, write_status, Unit, UnitLookup, UnitRef,
};
use crate::util::{new_uuid_v7, now_ms};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    pub id: String,
    #[serde(default)]
    pub is_primary: bool,
}

impl AssignmentRequest {
    pub fn new(id: impl Into<String>, is_primary: bool) -> Self {
        AssignmentRequest {
            id: id.into(),
            is_primary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    #[serde(default)]
    pub units: Vec<AssignmentRequest>,
    /// When set, the call must still be at this version.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Asked to detach a unit that holds no assignment on the call.
    NotAssigned,
    NotFound,
    OffDuty,
    AtCapacity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedUnit {
    pub id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub call_id: String,
    pub version: i64,
    pub connected: Vec<UnitRef>,
    pub disconnected: Vec<UnitRef>,
    pub skipped: Vec<SkippedUnit>,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !self.connected.is_empty() || !self.disconnected.is_empty()
    }
}

fn skip(id: &str, reason: SkipReason) -> SkippedUnit {
    SkippedUnit {
        id: id.to_string(),
        reason,
    }
}

fn ensure_open(call: &Call) -> AppResult<()> {
    if call.ended {
        return Err(AppError::new(CALL_ENDED, "Call has already ended")
            .with_context("call_id", call.id.clone()));
    }
    Ok(())
}

fn stale_version(call_id: &str, expected: i64, actual: i64) -> AppError {
    AppError::new(CALL_STALE_VERSION, "Call was modified by another dispatcher")
        .with_context("call_id", call_id.to_string())
        .with_context("expected_version", expected.to_string())
        .with_context("actual_version", actual.to_string())
}

/// "Unit assigned: X" for one unit, "Units assigned: X, Y" for several.
pub(crate) fn audit_line(verb: &str, callsigns: &[String]) -> Option<String> {
    match callsigns {
        [] => None,
        [single] => Some(format!("Unit {verb}: {single}")),
        many => Some(format!("Units {verb}: {}", many.join(", "))),
    }
}

async fn detach_unit(
    conn: &mut SqliteConnection,
    call_id: &str,
    assignment: &AssignedUnit,
) -> AppResult<()> {
    sqlx::query("DELETE FROM assigned_units WHERE id = ?1")
        .bind(&assignment.id)
        .execute(&mut *conn)
        .await?;
    let next = next_active_call_id(conn, &assignment.unit, call_id).await?;
    set_active_call(conn, &assignment.unit, next.as_deref()).await?;
    tracing::debug!(
        target: "cad_dispatch",
        event = "unit_detached",
        call_id = %call_id,
        unit_id = %assignment.unit.id,
        kind = %assignment.unit.kind,
        next_call_id = next.as_deref().unwrap_or("")
    );
    Ok(())
}

async fn attach_unit(
    conn: &mut SqliteConnection,
    call_id: &str,
    unit: &Unit,
    is_primary: bool,
    config: &DispatchConfig,
) -> AppResult<()> {
    let unit_ref = unit.unit_ref();
    if is_primary {
        sqlx::query("UPDATE assigned_units SET is_primary = 0 WHERE call_id = ?1")
            .bind(call_id)
            .execute(&mut *conn)
            .await?;
    }
    let sql = format!(
        "INSERT INTO assigned_units (id, call_id, {}, is_primary, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        unit.kind.assignment_column()
    );
    sqlx::query(&sql)
        .bind(new_uuid_v7())
        .bind(call_id)
        .bind(&unit.id)
        .bind(is_primary)
        .bind(now_ms())
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "assigned_units_create")
                .with_context("unit_id", unit.id.clone())
        })?;

    if unit.active_call_id.is_none() {
        set_active_call(conn, &unit_ref, Some(call_id)).await?;
    }
    if let Some(status_id) = config.assigned_status_id.as_deref() {
        write_status(conn, &unit_ref, Some(status_id)).await?;
    }
    tracing::debug!(
        target: "cad_dispatch",
        event = "unit_attached",
        call_id = %call_id,
        unit_id = %unit.id,
        kind = %unit.kind,
        is_primary
    );
    Ok(())
}

/// Reconciles the call's assigned units with `request.units`.
pub async fn reconcile_assignments(
    pool: &SqlitePool,
    call_id: &str,
    request: &ReconcileRequest,
    config: &DispatchConfig,
    notifier: &dyn Notifier,
) -> AppResult<ReconcileOutcome> {
    let mut tx = begin_immediate(pool).await?;

    let call = find_call(&mut tx, call_id)
        .await?
        .ok_or_else(|| AppError::call_not_found(call_id))?;
    ensure_open(&call)?;
    if let Some(expected) = request.expected_version {
        if expected != call.version {
            return Err(stale_version(call_id, expected, call.version));
        }
    }

    let assigned = assigned_units_for_call(&mut tx, call_id).await?;
    let current: Vec<String> = assigned.iter().map(|a| a.unit.id.clone()).collect();
    let requested: Vec<String> = request.units.iter().map(|u| u.id.clone()).collect();
    let desired = merge(&requested, &[]);
    let mut primary_by_id: HashMap<&str, bool> = HashMap::new();
    for unit in &request.units {
        primary_by_id.entry(unit.id.as_str()).or_insert(unit.is_primary);
    }

    let ops = compute_diff(&current, &desired, DiffOptions::default());

    let mut connected: Vec<Unit> = Vec::new();
    let mut disconnected: Vec<Unit> = Vec::new();
    let mut skipped: Vec<SkippedUnit> = Vec::new();
    for op in &ops {
        if let DiffOp::Disconnect(unit_id) = op {
            let Some(assignment) = assigned.iter().find(|a| &a.unit.id == unit_id) else {
                skipped.push(skip(unit_id, SkipReason::NotAssigned));
                continue;
            };
            detach_unit(&mut tx, call_id, assignment).await?;
            if let Some(unit) = get_unit(&mut tx, &assignment.unit).await? {
                disconnected.push(unit);
            }
        }
    }

    for op in &ops {
        if let DiffOp::Connect(unit_id) = op {
            let unit = match find_assignable_unit(&mut tx, unit_id).await? {
                UnitLookup::Found(unit) => unit,
                UnitLookup::OffDuty(_) => {
                    skipped.push(skip(unit_id, SkipReason::OffDuty));
                    continue;
                }
                UnitLookup::Missing => {
                    skipped.push(skip(unit_id, SkipReason::NotFound));
                    continue;
                }
            };
            if let Some(max) = config.max_assignments_per_unit {
                let open = count_open_assignments(&mut tx, &unit.unit_ref()).await?;
                if open >= i64::from(max) {
                    skipped.push(skip(unit_id, SkipReason::AtCapacity));
                    continue;
                }
            }
            let is_primary = primary_by_id.get(unit_id.as_str()).copied().unwrap_or(false);
            attach_unit(&mut tx, call_id, &unit, is_primary, config).await?;
            connected.push(unit);
        }
    }

    let mut version = call.version;
    if !connected.is_empty() || !disconnected.is_empty() {
        let res = sqlx::query(
            "UPDATE calls SET version = version + 1, updated_at = ?1 WHERE id = ?2 AND version = ?3",
        )
        .bind(now_ms())
        .bind(call_id)
        .bind(call.version)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            let actual: i64 = sqlx::query_scalar("SELECT version FROM calls WHERE id = ?1")
                .bind(call_id)
                .fetch_one(&mut *tx)
                .await?;
            return Err(stale_version(call_id, call.version, actual));
        }
        version += 1;

        let template = config.callsign_template.as_str();
        for (verb, units) in [("assigned", &connected), ("unassigned", &disconnected)] {
            let mut callsigns = Vec::with_capacity(units.len());
            for unit in units.iter() {
                callsigns.push(display_callsign(&mut tx, unit, template).await?);
            }
            if let Some(line) = audit_line(verb, &callsigns) {
                add_call_event(&mut tx, call_id, &line).await?;
            }
        }
    }

    tx.commit().await?;

    notifier.officer_status_changed();
    notifier.deputy_status_changed();

    let outcome = ReconcileOutcome {
        call_id: call_id.to_string(),
        version,
        connected: connected.iter().map(Unit::unit_ref).collect(),
        disconnected: disconnected.iter().map(Unit::unit_ref).collect(),
        skipped,
    };
    info!(
        target: "cad_dispatch",
        event = "assignment_reconciled",
        call_id = %call_id,
        version = outcome.version,
        connected = outcome.connected.len(),
        disconnected = outcome.disconnected.len(),
        skipped = outcome.skipped.len()
    );
    for skipped in &outcome.skipped {
        tracing::debug!(
            target: "cad_dispatch",
            event = "assignment_skipped",
            call_id = %call_id,
            unit_id = %skipped.id,
            reason = ?skipped.reason
        );
    }
    Ok(outcome)
}

/// Where a unit's active-call pointer ended up after its call closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerUpdate {
    pub unit: UnitRef,
    pub result: Result<Option<String>, AppError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallOutcome {
    pub call_id: String,
    pub removed_assignments: usize,
    pub pointer_updates: Vec<PointerUpdate>,
}

impl EndCallOutcome {
    pub fn failed_pointer_updates(&self) -> impl Iterator<Item = &PointerUpdate> {
        self.pointer_updates.iter().filter(|u| u.result.is_err())
    }
}

async fn repoint_unit(pool: &SqlitePool, unit: &UnitRef, call_id: &str) -> AppResult<Option<String>> {
    let mut tx = begin_immediate(pool).await?;
    let next = next_active_call_id(&mut tx, unit, call_id).await?;
    set_active_call(&mut tx, unit, next.as_deref()).await?;
    tx.commit().await?;
    Ok(next)
}

/// Ends the call, releasing all of its units.
///
/// Marking the call ended and deleting its assignments commit together, so
/// a concurrent reconcile either lands before (and its units are released
/// here) or sees the call ended. Pointer bookkeeping for the released units
/// runs after that commit and is best effort: a unit whose pointer cannot be
/// recomputed is logged and reported in the outcome, and the call still ends.
pub async fn end_call(
    pool: &SqlitePool,
    call_id: &str,
    notifier: &dyn Notifier,
) -> AppResult<EndCallOutcome> {
    let mut tx = begin_immediate(pool).await?;
    let call = find_call(&mut tx, call_id)
        .await?
        .ok_or_else(|| AppError::call_not_found(call_id))?;
    ensure_open(&call)?;

    let res = sqlx::query(
        "UPDATE calls SET ended = 1, version = version + 1, updated_at = ?1 WHERE id = ?2 AND ended = 0",
    )
    .bind(now_ms())
    .bind(call_id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(CALL_ENDED, "Call has already ended")
            .with_context("call_id", call_id.to_string()));
    }
    let released = assigned_units_for_call(&mut tx, call_id).await?;
    let removed = sqlx::query("DELETE FROM assigned_units WHERE call_id = ?1")
        .bind(call_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    add_call_event(&mut tx, call_id, "Call ended").await?;
    tx.commit().await?;

    let results = join_all(
        released
            .iter()
            .map(|assignment| repoint_unit(pool, &assignment.unit, call_id)),
    )
    .await;

    let mut pointer_updates = Vec::with_capacity(released.len());
    for (assignment, result) in released.iter().zip(results) {
        if let Err(err) = &result {
            warn!(
                target: "cad_dispatch",
                event = "active_call_repoint_failed",
                call_id = %call_id,
                unit_id = %assignment.unit.id,
                kind = %assignment.unit.kind,
                error = %err
            );
        }
        pointer_updates.push(PointerUpdate {
            unit: assignment.unit.clone(),
            result,
        });
    }

    notifier.officer_status_changed();
    notifier.deputy_status_changed();

    let outcome = EndCallOutcome {
        call_id: call_id.to_string(),
        removed_assignments: removed as usize,
        pointer_updates,
    };
    info!(
        target: "cad_dispatch",
        event = "call_ended",
        call_id = %call_id,
        removed_assignments = outcome.removed_assignments,
        failed_pointer_updates = outcome.failed_pointer_updates().count()
    );
    Ok(outcome)
}
