//! Responding units: officers, EMS/FD deputies and the two combined unit kinds.
//!
//! Every kind lives in its own table with the same shape, so lookups are an
//! exhaustive match on [`UnitKind`] rather than a table name chosen at runtime
//! from user input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::callsign::{render_callsign, CallsignParts};
use crate::catalog::{ensure_department, ensure_division, get_status, StatusKind};
use crate::db::begin_immediate;
use crate::error::UNIT_INVALID_KIND;
use crate::relation_diff::{compute_diff, DiffOp, DiffOptions, DiffSummary};
use crate::util::{new_uuid_v7, now_ms, require_non_empty};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Officer,
    EmsFdDeputy,
    CombinedLeoUnit,
    CombinedEmsFdUnit,
}

impl UnitKind {
    pub const ALL: [UnitKind; 4] = [
        UnitKind::Officer,
        UnitKind::EmsFdDeputy,
        UnitKind::CombinedLeoUnit,
        UnitKind::CombinedEmsFdUnit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Officer => "officer",
            UnitKind::EmsFdDeputy => "ems_fd_deputy",
            UnitKind::CombinedLeoUnit => "combined_leo_unit",
            UnitKind::CombinedEmsFdUnit => "combined_ems_fd_unit",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            UnitKind::Officer => "officers",
            UnitKind::EmsFdDeputy => "ems_fd_deputies",
            UnitKind::CombinedLeoUnit => "combined_leo_units",
            UnitKind::CombinedEmsFdUnit => "combined_ems_fd_units",
        }
    }

    /// Column of `assigned_units` that references this kind.
    pub(crate) fn assignment_column(self) -> &'static str {
        match self {
            UnitKind::Officer => "officer_id",
            UnitKind::EmsFdDeputy => "ems_fd_deputy_id",
            UnitKind::CombinedLeoUnit => "combined_leo_id",
            UnitKind::CombinedEmsFdUnit => "combined_ems_fd_id",
        }
    }

    /// Law-enforcement kinds; the rest are EMS/FD.
    pub fn is_leo(self) -> bool {
        matches!(self, UnitKind::Officer | UnitKind::CombinedLeoUnit)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = AppError;

    /// Accepts the snake_case name or the table name, with `-` or `_`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalised = raw.trim().to_ascii_lowercase().replace('-', "_");
        UnitKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalised || kind.table() == normalised)
            .ok_or_else(|| {
                AppError::new(UNIT_INVALID_KIND, "Unknown unit kind").with_context("kind", raw)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub kind: UnitKind,
    pub id: String,
}

impl UnitRef {
    pub fn new(kind: UnitKind, id: impl Into<String>) -> Self {
        UnitRef {
            kind,
            id: id.into(),
        }
    }

    /// Builds a reference from the four nullable columns of an assignment row.
    pub fn from_assignment_columns(
        officer_id: Option<String>,
        ems_fd_deputy_id: Option<String>,
        combined_leo_id: Option<String>,
        combined_ems_fd_id: Option<String>,
    ) -> Option<UnitRef> {
        match (officer_id, ems_fd_deputy_id, combined_leo_id, combined_ems_fd_id) {
            (Some(id), None, None, None) => Some(UnitRef::new(UnitKind::Officer, id)),
            (None, Some(id), None, None) => Some(UnitRef::new(UnitKind::EmsFdDeputy, id)),
            (None, None, Some(id), None) => Some(UnitRef::new(UnitKind::CombinedLeoUnit, id)),
            (None, None, None, Some(id)) => Some(UnitRef::new(UnitKind::CombinedEmsFdUnit, id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct UnitRow {
    id: String,
    callsign: String,
    callsign2: String,
    department_id: Option<String>,
    incremental: Option<i64>,
    status_id: Option<String>,
    active_call_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl UnitRow {
    fn into_unit(self, kind: UnitKind) -> Unit {
        Unit {
            kind,
            id: self.id,
            callsign: self.callsign,
            callsign2: self.callsign2,
            department_id: self.department_id,
            incremental: self.incremental,
            status_id: self.status_id,
            active_call_id: self.active_call_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub kind: UnitKind,
    pub id: String,
    pub callsign: String,
    pub callsign2: String,
    pub department_id: Option<String>,
    pub incremental: Option<i64>,
    pub status_id: Option<String>,
    pub active_call_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Unit {
    pub fn unit_ref(&self) -> UnitRef {
        UnitRef::new(self.kind, self.id.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUnit {
    pub callsign: String,
    #[serde(default)]
    pub callsign2: String,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub incremental: Option<i64>,
    #[serde(default)]
    pub status_id: Option<String>,
}

/// Result of resolving a unit that is about to be attached to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitLookup {
    Found(Unit),
    OffDuty(Unit),
    Missing,
}

const UNIT_COLUMNS: &str = "id, callsign, callsign2, department_id, incremental, status_id, \
                            active_call_id, created_at, updated_at";

pub async fn create_unit(pool: &SqlitePool, kind: UnitKind, input: NewUnit) -> AppResult<Unit> {
    let callsign = require_non_empty("callsign", &input.callsign)?;
    let mut conn = pool.acquire().await?;
    if let Some(status_id) = input.status_id.as_deref() {
        get_status(&mut *conn, status_id).await?;
    }
    if let Some(department_id) = input.department_id.as_deref() {
        ensure_department(&mut *conn, department_id).await?;
    }
    let now = now_ms();
    let unit = Unit {
        kind,
        id: new_uuid_v7(),
        callsign,
        callsign2: input.callsign2.trim().to_string(),
        department_id: input.department_id,
        incremental: input.incremental,
        status_id: input.status_id,
        active_call_id: None,
        created_at: now,
        updated_at: now,
    };
    let sql = format!(
        "INSERT INTO {} (id, callsign, callsign2, department_id, incremental, status_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        kind.table()
    );
    sqlx::query(&sql)
        .bind(&unit.id)
        .bind(&unit.callsign)
        .bind(&unit.callsign2)
        .bind(&unit.department_id)
        .bind(unit.incremental)
        .bind(&unit.status_id)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "units_create")
                .with_context("kind", kind.as_str())
        })?;
    tracing::debug!(
        target: "cad_dispatch",
        event = "unit_created",
        kind = %kind,
        unit_id = %unit.id
    );
    Ok(unit)
}

pub async fn get_unit(conn: &mut SqliteConnection, unit: &UnitRef) -> AppResult<Option<Unit>> {
    let sql = format!("SELECT {UNIT_COLUMNS} FROM {} WHERE id = ?1", unit.kind.table());
    let row: Option<UnitRow> = sqlx::query_as(&sql)
        .bind(&unit.id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.into_unit(unit.kind)))
}

pub async fn list_units(pool: &SqlitePool, kind: UnitKind) -> AppResult<Vec<Unit>> {
    let sql = format!(
        "SELECT {UNIT_COLUMNS} FROM {} ORDER BY callsign, callsign2, id",
        kind.table()
    );
    let rows: Vec<UnitRow> = sqlx::query_as(&sql).fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.into_unit(kind)).collect())
}

/// Looks `id` up across every unit kind.
pub async fn find_unit(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<Unit>> {
    for kind in UnitKind::ALL {
        if let Some(unit) = get_unit(conn, &UnitRef::new(kind, id)).await? {
            return Ok(Some(unit));
        }
    }
    Ok(None)
}

/// Like [`find_unit`], but a unit whose status is off duty is reported as such.
pub async fn find_assignable_unit(conn: &mut SqliteConnection, id: &str) -> AppResult<UnitLookup> {
    let Some(unit) = find_unit(conn, id).await? else {
        return Ok(UnitLookup::Missing);
    };
    let status_kind: Option<StatusKind> = match unit.status_id.as_deref() {
        Some(status_id) => sqlx::query_scalar("SELECT kind FROM statuses WHERE id = ?1")
            .bind(status_id)
            .fetch_optional(&mut *conn)
            .await?,
        None => None,
    };
    if status_kind == Some(StatusKind::OffDuty) {
        Ok(UnitLookup::OffDuty(unit))
    } else {
        Ok(UnitLookup::Found(unit))
    }
}

pub async fn set_unit_status(
    pool: &SqlitePool,
    unit: &UnitRef,
    status_id: Option<&str>,
) -> AppResult<Unit> {
    let mut conn = pool.acquire().await?;
    if let Some(status_id) = status_id {
        get_status(&mut *conn, status_id).await?;
    }
    write_status(&mut conn, unit, status_id).await?;
    get_unit(&mut conn, unit)
        .await?
        .ok_or_else(|| AppError::unit_not_found(&unit.id))
}

pub(crate) async fn write_status(
    conn: &mut SqliteConnection,
    unit: &UnitRef,
    status_id: Option<&str>,
) -> AppResult<()> {
    let sql = format!(
        "UPDATE {} SET status_id = ?1, updated_at = ?2 WHERE id = ?3",
        unit.kind.table()
    );
    let res = sqlx::query(&sql)
        .bind(status_id)
        .bind(now_ms())
        .bind(&unit.id)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::unit_not_found(&unit.id).with_context("kind", unit.kind.as_str()));
    }
    Ok(())
}

/// Number of assignments the unit holds on calls that have not ended.
pub async fn count_open_assignments(conn: &mut SqliteConnection, unit: &UnitRef) -> AppResult<i64> {
    let sql = format!(
        "SELECT COUNT(*)
           FROM assigned_units a
           JOIN calls c ON c.id = a.call_id
          WHERE a.{} = ?1 AND c.ended = 0",
        unit.kind.assignment_column()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(&unit.id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// The call a unit should point at once it leaves `excluding_call_id`: the
/// earliest-created of its remaining assignments on a call that has not ended.
pub async fn next_active_call_id(
    conn: &mut SqliteConnection,
    unit: &UnitRef,
    excluding_call_id: &str,
) -> AppResult<Option<String>> {
    let sql = format!(
        "SELECT a.call_id
           FROM assigned_units a
           JOIN calls c ON c.id = a.call_id
          WHERE a.{} = ?1 AND a.call_id <> ?2 AND c.ended = 0
          ORDER BY a.created_at ASC, a.id ASC
          LIMIT 1",
        unit.kind.assignment_column()
    );
    let next: Option<String> = sqlx::query_scalar(&sql)
        .bind(&unit.id)
        .bind(excluding_call_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(next)
}

pub async fn set_active_call(
    conn: &mut SqliteConnection,
    unit: &UnitRef,
    call_id: Option<&str>,
) -> AppResult<()> {
    let sql = format!(
        "UPDATE {} SET active_call_id = ?1, updated_at = ?2 WHERE id = ?3",
        unit.kind.table()
    );
    sqlx::query(&sql)
        .bind(call_id)
        .bind(now_ms())
        .bind(&unit.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn callsign_parts(conn: &mut SqliteConnection, unit: &Unit) -> AppResult<CallsignParts> {
    let department: Option<String> = match unit.department_id.as_deref() {
        Some(id) => sqlx::query_scalar::<_, Option<String>>(
            "SELECT callsign FROM departments WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .flatten(),
        None => None,
    };
    let division: Option<String> = if unit.kind == UnitKind::Officer {
        sqlx::query_scalar::<_, Option<String>>(
            "SELECT d.callsign
               FROM officer_divisions od
               JOIN divisions d ON d.id = od.division_id
              WHERE od.officer_id = ?1
              ORDER BY od.created_at ASC, d.id ASC
              LIMIT 1",
        )
        .bind(&unit.id)
        .fetch_optional(&mut *conn)
        .await?
        .flatten()
    } else {
        None
    };
    Ok(CallsignParts {
        department,
        callsign1: Some(unit.callsign.clone()),
        callsign2: Some(unit.callsign2.clone()).filter(|c| !c.is_empty()),
        division,
        incremental: unit.incremental,
    })
}

pub async fn display_callsign(
    conn: &mut SqliteConnection,
    unit: &Unit,
    template: &str,
) -> AppResult<String> {
    let parts = callsign_parts(conn, unit).await?;
    Ok(render_callsign(template, &parts))
}

pub async fn officer_division_ids(
    conn: &mut SqliteConnection,
    officer_id: &str,
) -> AppResult<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT division_id FROM officer_divisions WHERE officer_id = ?1 ORDER BY created_at, division_id",
    )
    .bind(officer_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Replaces an officer's divisions with `division_ids`, touching only the links that change.
pub async fn set_officer_divisions(
    pool: &SqlitePool,
    officer_id: &str,
    division_ids: Vec<String>,
) -> AppResult<DiffSummary> {
    let officer = UnitRef::new(UnitKind::Officer, officer_id);
    let mut tx = begin_immediate(pool).await?;
    if get_unit(&mut tx, &officer).await?.is_none() {
        return Err(AppError::unit_not_found(officer_id).with_context("kind", "officer"));
    }

    let current = officer_division_ids(&mut tx, officer_id).await?;
    let ops = compute_diff(&current, &division_ids, DiffOptions::default());
    let now = now_ms();
    for op in &ops {
        match op {
            DiffOp::Connect(division_id) => {
                ensure_division(&mut *tx, division_id).await?;
                sqlx::query(
                    "INSERT INTO officer_divisions (officer_id, division_id, created_at) VALUES (?1, ?2, ?3)",
                )
                .bind(officer_id)
                .bind(division_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|err| AppError::from(err).with_context("division_id", division_id.clone()))?;
            }
            DiffOp::Disconnect(division_id) => {
                sqlx::query("DELETE FROM officer_divisions WHERE officer_id = ?1 AND division_id = ?2")
                    .bind(officer_id)
                    .bind(division_id)
                    .execute(&mut *tx)
                    .await?;
            }
            DiffOp::Upsert { .. } => {}
        }
    }
    tx.commit().await?;

    let summary = DiffSummary::from_ops(&ops);
    tracing::info!(
        target: "cad_dispatch",
        event = "officer_divisions_updated",
        officer_id = %officer_id,
        connected = summary.connected.len(),
        disconnected = summary.disconnected.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_from_path_segments() {
        assert_eq!("officers".parse::<UnitKind>().unwrap(), UnitKind::Officer);
        assert_eq!("ems-fd-deputies".parse::<UnitKind>().unwrap(), UnitKind::EmsFdDeputy);
        assert_eq!(
            "combined_leo_unit".parse::<UnitKind>().unwrap(),
            UnitKind::CombinedLeoUnit
        );
        let err = "dispatchers".parse::<UnitKind>().unwrap_err();
        assert_eq!(err.code(), UNIT_INVALID_KIND);
    }

    #[test]
    fn assignment_columns_resolve_exactly_one_kind() {
        let unit = UnitRef::from_assignment_columns(None, None, Some("c1".into()), None)
            .expect("single column");
        assert_eq!(unit, UnitRef::new(UnitKind::CombinedLeoUnit, "c1"));
        assert!(UnitRef::from_assignment_columns(Some("a".into()), Some("b".into()), None, None)
            .is_none());
        assert!(UnitRef::from_assignment_columns(None, None, None, None).is_none());
    }

    #[test]
    fn leo_kinds() {
        assert!(UnitKind::Officer.is_leo());
        assert!(UnitKind::CombinedLeoUnit.is_leo());
        assert!(!UnitKind::EmsFdDeputy.is_leo());
        assert!(!UnitKind::CombinedEmsFdUnit.is_leo());
    }
}
