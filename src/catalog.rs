//! Admin-managed lookup values: unit statuses, departments and divisions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef},
    Executor, Sqlite, SqlitePool,
};

use crate::error::{DEPARTMENT_NOT_FOUND, DIVISION_NOT_FOUND, STATUS_NOT_FOUND};
use crate::util::{new_uuid_v7, now_ms, require_non_empty};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    OnDuty,
    OffDuty,
    Assigned,
    EnRoute,
    OnScene,
    Unavailable,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::OnDuty => "on_duty",
            StatusKind::OffDuty => "off_duty",
            StatusKind::Assigned => "assigned",
            StatusKind::EnRoute => "en_route",
            StatusKind::OnScene => "on_scene",
            StatusKind::Unavailable => "unavailable",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "on_duty" => StatusKind::OnDuty,
            "off_duty" => StatusKind::OffDuty,
            "assigned" => StatusKind::Assigned,
            "en_route" => StatusKind::EnRoute,
            "on_scene" => StatusKind::OnScene,
            "unavailable" => StatusKind::Unavailable,
            _ => return None,
        })
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<Sqlite> for StatusKind {
    fn type_info() -> SqliteTypeInfo {
        <&str as sqlx::Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, Sqlite> for StatusKind {
    fn encode_by_ref(&self, buf: &mut Vec<SqliteArgumentValue<'q>>) -> Result<IsNull, BoxDynError> {
        <&str as sqlx::Encode<'q, Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, Sqlite> for StatusKind {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as sqlx::Decode<'r, Sqlite>>::decode(value)?;
        StatusKind::parse(raw).ok_or_else(|| format!("invalid status kind: {raw}").into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Status {
    pub id: String,
    pub value: String,
    pub kind: StatusKind,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStatus {
    pub value: String,
    pub kind: StatusKind,
}

/// Department or division; both carry a short callsign fragment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CallsignValue {
    pub id: String,
    pub value: String,
    pub callsign: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCallsignValue {
    pub value: String,
    #[serde(default)]
    pub callsign: Option<String>,
}

pub async fn create_status(pool: &SqlitePool, input: NewStatus) -> AppResult<Status> {
    let value = require_non_empty("value", &input.value)?;
    let now = now_ms();
    let status = Status {
        id: new_uuid_v7(),
        value,
        kind: input.kind,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO statuses (id, value, kind, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
    )
    .bind(&status.id)
    .bind(&status.value)
    .bind(status.kind)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", "statuses_create"))?;
    tracing::debug!(
        target: "cad_dispatch",
        event = "status_created",
        status_id = %status.id,
        kind = %status.kind
    );
    Ok(status)
}

pub async fn get_status<'e, E>(executor: E, status_id: &str) -> AppResult<Status>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Status>(
        "SELECT id, value, kind, created_at, updated_at FROM statuses WHERE id = ?1",
    )
    .bind(status_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| {
        AppError::new(STATUS_NOT_FOUND, "Status not found").with_context("status_id", status_id)
    })
}

pub async fn list_statuses(pool: &SqlitePool) -> AppResult<Vec<Status>> {
    let rows = sqlx::query_as::<_, Status>(
        "SELECT id, value, kind, created_at, updated_at FROM statuses ORDER BY value",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy)]
enum CallsignTable {
    Departments,
    Divisions,
}

impl CallsignTable {
    fn name(self) -> &'static str {
        match self {
            CallsignTable::Departments => "departments",
            CallsignTable::Divisions => "divisions",
        }
    }

    fn not_found(self, id: &str) -> AppError {
        match self {
            CallsignTable::Departments => AppError::new(DEPARTMENT_NOT_FOUND, "Department not found")
                .with_context("department_id", id.to_string()),
            CallsignTable::Divisions => AppError::new(DIVISION_NOT_FOUND, "Division not found")
                .with_context("division_id", id.to_string()),
        }
    }
}

async fn ensure_callsign_value<'e, E>(executor: E, table: CallsignTable, id: &str) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table.name());
    let found: Option<i64> = sqlx::query_scalar(&sql).bind(id).fetch_optional(executor).await?;
    match found {
        Some(_) => Ok(()),
        None => Err(table.not_found(id)),
    }
}

pub async fn ensure_department<'e, E>(executor: E, department_id: &str) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    ensure_callsign_value(executor, CallsignTable::Departments, department_id).await
}

pub async fn ensure_division<'e, E>(executor: E, division_id: &str) -> AppResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    ensure_callsign_value(executor, CallsignTable::Divisions, division_id).await
}

async fn insert_callsign_value(
    pool: &SqlitePool,
    table: CallsignTable,
    input: NewCallsignValue,
) -> AppResult<CallsignValue> {
    let value = require_non_empty("value", &input.value)?;
    let now = now_ms();
    let row = CallsignValue {
        id: new_uuid_v7(),
        value,
        callsign: input.callsign.filter(|c| !c.trim().is_empty()),
        created_at: now,
        updated_at: now,
    };
    let sql = format!(
        "INSERT INTO {} (id, value, callsign, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        table.name()
    );
    sqlx::query(&sql)
        .bind(&row.id)
        .bind(&row.value)
        .bind(&row.callsign)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|err| AppError::from(err).with_context("table", table.name()))?;
    Ok(row)
}

pub async fn create_department(
    pool: &SqlitePool,
    input: NewCallsignValue,
) -> AppResult<CallsignValue> {
    insert_callsign_value(pool, CallsignTable::Departments, input).await
}

pub async fn create_division(pool: &SqlitePool, input: NewCallsignValue) -> AppResult<CallsignValue> {
    insert_callsign_value(pool, CallsignTable::Divisions, input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::migrate::apply_migrations;

    async fn pool() -> SqlitePool {
        let pool = open_memory_pool().await.expect("pool");
        apply_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn status_kind_round_trips_through_sqlite() {
        let pool = pool().await;
        let created = create_status(
            &pool,
            NewStatus {
                value: "10-7".into(),
                kind: StatusKind::OffDuty,
            },
        )
        .await
        .expect("create");
        let loaded = get_status(&pool, &created.id).await.expect("get");
        assert_eq!(loaded.kind, StatusKind::OffDuty);
        assert_eq!(list_statuses(&pool).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn unknown_status_is_not_found() {
        let pool = pool().await;
        let err = get_status(&pool, "missing").await.unwrap_err();
        assert_eq!(err.code(), STATUS_NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_callsign_fragment_is_stored_as_null() {
        let pool = pool().await;
        let division = create_division(
            &pool,
            NewCallsignValue {
                value: "Traffic".into(),
                callsign: Some("  ".into()),
            },
        )
        .await
        .expect("create");
        assert!(division.callsign.is_none());
    }

    #[tokio::test]
    async fn unknown_department_and_division_are_not_found() {
        let pool = pool().await;
        let department = create_department(
            &pool,
            NewCallsignValue {
                value: "LSPD".into(),
                callsign: Some("1".into()),
            },
        )
        .await
        .expect("create");
        ensure_department(&pool, &department.id).await.expect("exists");

        let err = ensure_department(&pool, "missing").await.unwrap_err();
        assert_eq!(err.code(), DEPARTMENT_NOT_FOUND);
        assert!(err.is_not_found());
        let err = ensure_division(&pool, &department.id).await.unwrap_err();
        assert_eq!(err.code(), DIVISION_NOT_FOUND);
    }
}
