use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::util::now_ms;
use crate::{AppError, AppResult};
use tracing::{error, info};

pub const MIGRATION_EDITED: &str = "MIGRATION/EDITED";

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let cut: String = trimmed.chars().take(160).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202610010900_initial.sql",
        include_str!("../migrations/202610010900_initial.sql"),
    ),
    (
        "202610010910_units.sql",
        include_str!("../migrations/202610010910_units.sql"),
    ),
    (
        "202610010920_assigned_units.sql",
        include_str!("../migrations/202610010920_assigned_units.sql"),
    ),
];

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: String,
    pub applied_at: i64,
    pub checksum: String,
}

pub async fn apply_migrations(pool: &SqlitePool) -> AppResult<()> {
    apply_migration_set(pool, MIGRATIONS).await
}

async fn apply_migration_set(pool: &SqlitePool, migrations: &[(&str, &str)]) -> AppResult<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version    TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum   TEXT NOT NULL\
         )",
    )
    .await?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        applied.insert(r.try_get("version")?, r.try_get("checksum")?);
    }

    for (filename, raw_sql) in migrations {
        let cleaned = strip_comments(raw_sql);
        let sum = checksum(&cleaned);

        if let Some(stored) = applied.get(*filename) {
            if stored != &sum {
                return Err(AppError::new(
                    MIGRATION_EDITED,
                    "Migration was edited after it was applied",
                )
                .with_context("file", filename.to_string()));
            }
            info!(target: "cad_dispatch", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            info!(target: "cad_dispatch", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "cad_dispatch", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(AppError::from(e).with_context("file", filename.to_string()));
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&sum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "cad_dispatch", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

/// Migrations recorded in the ledger, oldest first.
pub async fn applied_migrations(pool: &SqlitePool) -> AppResult<Vec<AppliedMigration>> {
    let rows = sqlx::query(
        "SELECT version, applied_at, checksum FROM schema_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|r| -> AppResult<AppliedMigration> {
            Ok(AppliedMigration {
                version: r.try_get("version")?,
                applied_at: r.try_get("applied_at")?,
                checksum: r.try_get("checksum")?,
            })
        })
        .collect()
}
