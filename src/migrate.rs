use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use tracing::info;

use crate::time::now_ms;

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202601120900_initial.sql",
        include_str!("../migrations/202601120900_initial.sql"),
    ),
    (
        "202602021030_member_reset_tokens.sql",
        include_str!("../migrations/202602021030_member_reset_tokens.sql"),
    ),
];

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{12}_[a-z0-9_]+\.sql$").expect("valid version pattern"));

static ADD_COLUMN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)").unwrap());

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

pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
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
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    for (filename, raw_sql) in MIGRATIONS {
        anyhow::ensure!(
            VERSION_RE.is_match(filename),
            "migration filename {} does not match NNNNNNNNNNNN_name.sql",
            filename
        );

        let cleaned = strip_comments(raw_sql);
        let checksum = format!("{:x}", Sha256::digest(cleaned.as_bytes()));

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "tatib", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            let upper = s.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            // ADD COLUMN is not idempotent in SQLite; skip when the column
            // already exists (e.g. a DB restored from a newer snapshot).
            if let Some(caps) = ADD_COLUMN_RE.captures(s) {
                let table = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let col = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                let exists: Option<i64> = sqlx::query_scalar(&format!(
                    "SELECT 1 FROM pragma_table_info('{table}') WHERE name='{col}'"
                ))
                .fetch_optional(&mut *tx)
                .await?;
                if exists.is_some() {
                    info!(target: "tatib", event = "migration_stmt_skip", file = %filename);
                    continue;
                }
            }
            sqlx::query(s).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)")
            .bind(filename)
            .bind(now_ms())
            .bind(&checksum)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(target: "tatib", event = "migration_applied", file = %filename);
    }

    Ok(())
}

/// Versions present in the binary alongside whether each is applied.
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<Vec<(String, bool)>> {
    let table_exists: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let mut applied: Vec<String> = Vec::new();
    if table_exists.is_some() {
        applied = sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;
    }

    Ok(MIGRATIONS
        .iter()
        .map(|(filename, _)| {
            let done = applied.iter().any(|v| v == filename);
            ((*filename).to_string(), done)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite::memory:");
        sqlx::query("PRAGMA foreign_keys=ON;")
            .execute(&pool)
            .await
            .expect("enable fks");
        pool
    }

    #[tokio::test]
    async fn migrations_apply_and_are_idempotent() {
        let pool = memory_pool().await;
        apply_migrations(&pool).await.expect("first apply");
        apply_migrations(&pool).await.expect("second apply");

        let status = migration_status(&pool).await.expect("status");
        assert!(status.iter().all(|(_, applied)| *applied));

        // reset-token columns arrived via the second migration
        let col: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM pragma_table_info('users') WHERE name='must_reset_password'",
        )
        .fetch_optional(&pool)
        .await
        .expect("pragma query");
        assert!(col.is_some());
    }

    #[test]
    fn version_pattern_rejects_loose_names() {
        assert!(VERSION_RE.is_match("202601120900_initial.sql"));
        assert!(!VERSION_RE.is_match("initial.sql"));
        assert!(!VERSION_RE.is_match("2026_initial.sql"));
    }
}
