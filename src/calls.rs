use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

use crate::db::begin_immediate;
use crate::units::UnitRef;
use crate::util::{last_of, new_uuid_v7, now_ms, require_non_empty};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: String,
    pub case_number: i64,
    pub location: String,
    pub description: Option<String>,
    pub ended: bool,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCall {
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedUnit {
    pub id: String,
    pub call_id: String,
    pub unit: UnitRef,
    pub is_primary: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub id: String,
    pub call_id: String,
    pub description: String,
    pub created_at: i64,
}

const CALL_COLUMNS: &str =
    "id, case_number, location, description, ended, version, created_at, updated_at";

pub async fn create_call(pool: &SqlitePool, input: NewCall) -> AppResult<Call> {
    let location = require_non_empty("location", &input.location)?;
    let description = input.description.filter(|d| !d.trim().is_empty());
    let mut tx = begin_immediate(pool).await?;
    let case_number: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(case_number), 0) + 1 FROM calls")
        .fetch_one(&mut *tx)
        .await?;
    let now = now_ms();
    let call = Call {
        id: new_uuid_v7(),
        case_number,
        location,
        description,
        ended: false,
        version: 0,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO calls (id, case_number, location, description, ended, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?5)",
    )
    .bind(&call.id)
    .bind(call.case_number)
    .bind(&call.location)
    .bind(&call.description)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "calls_create"))?;
    tx.commit().await?;
    tracing::info!(
        target: "cad_dispatch",
        event = "call_created",
        call_id = %call.id,
        case_number = call.case_number
    );
    Ok(call)
}

pub async fn find_call(conn: &mut SqliteConnection, call_id: &str) -> AppResult<Option<Call>> {
    let sql = format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1");
    let call = sqlx::query_as::<_, Call>(&sql)
        .bind(call_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(call)
}

pub async fn get_call(pool: &SqlitePool, call_id: &str) -> AppResult<Call> {
    let mut conn = pool.acquire().await?;
    find_call(&mut conn, call_id)
        .await?
        .ok_or_else(|| AppError::call_not_found(call_id))
}

pub async fn list_calls(pool: &SqlitePool, include_ended: bool) -> AppResult<Vec<Call>> {
    let sql = if include_ended {
        format!("SELECT {CALL_COLUMNS} FROM calls ORDER BY created_at DESC, id DESC")
    } else {
        format!("SELECT {CALL_COLUMNS} FROM calls WHERE ended = 0 ORDER BY created_at DESC, id DESC")
    };
    let calls = sqlx::query_as::<_, Call>(&sql).fetch_all(pool).await?;
    Ok(calls)
}

fn assigned_unit_from_row(row: &SqliteRow) -> AppResult<AssignedUnit> {
    let id: String = row.try_get("id")?;
    let unit = UnitRef::from_assignment_columns(
        row.try_get("officer_id")?,
        row.try_get("ems_fd_deputy_id")?,
        row.try_get("combined_leo_id")?,
        row.try_get("combined_ems_fd_id")?,
    )
    .ok_or_else(|| {
        AppError::new("ASSIGNMENT/CORRUPT", "Assigned unit row references no single unit")
            .with_context("assigned_unit_id", id.clone())
    })?;
    Ok(AssignedUnit {
        id,
        call_id: row.try_get("call_id")?,
        unit,
        is_primary: row.try_get("is_primary")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn assigned_units_for_call(
    conn: &mut SqliteConnection,
    call_id: &str,
) -> AppResult<Vec<AssignedUnit>> {
    let rows = sqlx::query(
        "SELECT id, call_id, officer_id, ems_fd_deputy_id, combined_leo_id, combined_ems_fd_id,
                is_primary, created_at
           FROM assigned_units
          WHERE call_id = ?1
          ORDER BY created_at ASC, id ASC",
    )
    .bind(call_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(assigned_unit_from_row).collect()
}

pub async fn list_assigned_units(pool: &SqlitePool, call_id: &str) -> AppResult<Vec<AssignedUnit>> {
    let mut conn = pool.acquire().await?;
    assigned_units_for_call(&mut conn, call_id).await
}

pub async fn add_call_event(
    conn: &mut SqliteConnection,
    call_id: &str,
    description: &str,
) -> AppResult<CallEvent> {
    let event = CallEvent {
        id: new_uuid_v7(),
        call_id: call_id.to_string(),
        description: description.to_string(),
        created_at: now_ms(),
    };
    sqlx::query(
        "INSERT INTO call_events (id, call_id, description, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&event.id)
    .bind(&event.call_id)
    .bind(&event.description)
    .bind(event.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "call_events_create")
            .with_context("call_id", call_id.to_string())
    })?;
    Ok(event)
}

/// The call timeline, oldest first.
pub async fn list_call_events(pool: &SqlitePool, call_id: &str) -> AppResult<Vec<CallEvent>> {
    let events = sqlx::query_as::<_, CallEvent>(
        "SELECT id, call_id, description, created_at
           FROM call_events
          WHERE call_id = ?1
          ORDER BY created_at ASC, id ASC",
    )
    .bind(call_id)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

pub async fn latest_call_event(pool: &SqlitePool, call_id: &str) -> AppResult<Option<CallEvent>> {
    let events = list_call_events(pool, call_id).await?;
    Ok(last_of(&events).cloned())
}
