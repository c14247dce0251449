#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use cad_dispatch_lib::calls::{create_call, Call, NewCall};
use cad_dispatch_lib::catalog::{create_department, create_status, NewCallsignValue, NewStatus, Status, StatusKind};
use cad_dispatch_lib::db::{open_memory_pool, open_sqlite_pool};
use cad_dispatch_lib::migrate::apply_migrations;
use cad_dispatch_lib::notifier::Notifier;
use cad_dispatch_lib::units::{create_unit, get_unit, NewUnit, Unit, UnitKind, UnitRef};
use sqlx::SqlitePool;

pub async fn temp_pool() -> SqlitePool {
    let pool = open_memory_pool().await.expect("open sqlite::memory:");
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

/// File-backed WAL database, for tests that need more than one connection.
pub async fn file_pool(dir: &std::path::Path) -> SqlitePool {
    let pool = open_sqlite_pool(&dir.join("dispatch.sqlite3"))
        .await
        .expect("open sqlite file");
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

pub async fn status(pool: &SqlitePool, value: &str, kind: StatusKind) -> Status {
    create_status(
        pool,
        NewStatus {
            value: value.into(),
            kind,
        },
    )
    .await
    .expect("create status")
}

pub async fn department(pool: &SqlitePool, value: &str, callsign: &str) -> String {
    create_department(
        pool,
        NewCallsignValue {
            value: value.into(),
            callsign: Some(callsign.into()),
        },
    )
    .await
    .expect("create department")
    .id
}

pub async fn unit(pool: &SqlitePool, kind: UnitKind, callsign: &str, status_id: Option<&str>) -> Unit {
    create_unit(
        pool,
        kind,
        NewUnit {
            callsign: callsign.into(),
            status_id: status_id.map(str::to_string),
            ..NewUnit::default()
        },
    )
    .await
    .expect("create unit")
}

pub async fn officer(pool: &SqlitePool, callsign: &str) -> Unit {
    unit(pool, UnitKind::Officer, callsign, None).await
}

pub async fn deputy(pool: &SqlitePool, callsign: &str) -> Unit {
    unit(pool, UnitKind::EmsFdDeputy, callsign, None).await
}

pub async fn call(pool: &SqlitePool, location: &str) -> Call {
    create_call(
        pool,
        NewCall {
            location: location.into(),
            description: None,
        },
    )
    .await
    .expect("create call")
}

pub async fn reload(pool: &SqlitePool, unit: &UnitRef) -> Unit {
    let mut conn = pool.acquire().await.expect("acquire");
    get_unit(&mut conn, unit).await.expect("get unit").expect("unit exists")
}

/// Counts refresh signals instead of broadcasting them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub officer: AtomicUsize,
    pub deputy: AtomicUsize,
}

impl RecordingNotifier {
    pub fn officer_count(&self) -> usize {
        self.officer.load(Ordering::SeqCst)
    }

    pub fn deputy_count(&self) -> usize {
        self.deputy.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn officer_status_changed(&self) {
        self.officer.fetch_add(1, Ordering::SeqCst);
    }

    fn deputy_status_changed(&self) {
        self.deputy.fetch_add(1, Ordering::SeqCst);
    }
}

/// Assignment timestamps are in milliseconds; keep creation order observable.
pub fn tick() {
    std::thread::sleep(std::time::Duration::from_millis(3));
}
