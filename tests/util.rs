#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use tatib_lib::id::new_uuid_v7;
use tatib_lib::migrate::apply_migrations;
use tatib_lib::schools::{self, School};
use tatib_lib::time::now_ms;

/// In-memory pool with the full schema applied.
#[allow(dead_code)]
pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

/// A school created the onboarding way: first admin plus the default
/// categories and rules.
#[allow(dead_code)]
pub async fn seed_school(pool: &SqlitePool, name: &str, admin: &str) -> School {
    schools::create_school(pool, name, Some("Jl. Merdeka 1"), admin, "rahasia123")
        .await
        .expect("create school")
}

/// A school row with nothing underneath it: an empty tenant.
#[allow(dead_code)]
pub async fn bare_school(pool: &SqlitePool, name: &str) -> School {
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO schools (id, name, address, logo, created_at, updated_at)
         VALUES (?, ?, NULL, NULL, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert school");
    schools::get(pool, &id)
        .await
        .expect("load school")
        .expect("school present")
}

#[allow(dead_code)]
pub async fn count(pool: &SqlitePool, sql: &str, school_id: &str) -> i64 {
    sqlx::query_scalar(sql)
        .bind(school_id)
        .fetch_one(pool)
        .await
        .expect("count query")
}
