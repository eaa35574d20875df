use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, AppResult};
use crate::id::new_uuid_v7;
use crate::time::now_ms;

pub const ERR_EXISTS: &str = "CLASSROOM/EXISTS";
pub const ERR_NOT_FOUND: &str = "CLASSROOM/NOT_FOUND";
pub const ERR_NOT_EMPTY: &str = "CLASSROOM/NOT_EMPTY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub school_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&SqliteRow> for Classroom {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            name: row.try_get("name").map_err(AppError::from)?,
            school_id: row.try_get("school_id").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

pub async fn create(pool: &SqlitePool, school_id: &str, name: &str) -> AppResult<Classroom> {
    if find_by_name(pool, school_id, name).await?.is_some() {
        return Err(AppError::new(ERR_EXISTS, "Classroom already exists")
            .with_context("name", name.to_string()));
    }
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO classrooms (id, name, school_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(school_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(AppError::from)?;

    get(pool, school_id, &id)
        .await?
        .ok_or_else(|| AppError::new(ERR_NOT_FOUND, "Classroom missing after create"))
}

pub async fn get(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<Option<Classroom>> {
    let row = sqlx::query("SELECT * FROM classrooms WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Classroom::try_from).transpose()
}

pub async fn find_by_name(
    pool: &SqlitePool,
    school_id: &str,
    name: &str,
) -> AppResult<Option<Classroom>> {
    let row = sqlx::query("SELECT * FROM classrooms WHERE school_id = ? AND name = ?")
        .bind(school_id)
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Classroom::try_from).transpose()
}

pub async fn list(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<Classroom>> {
    let rows = sqlx::query("SELECT * FROM classrooms WHERE school_id = ? ORDER BY name")
        .bind(school_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;
    rows.iter().map(Classroom::try_from).collect()
}

/// Delete a classroom. Refused while any student is still assigned to it.
pub async fn delete(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<()> {
    let students: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students WHERE classroom_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?;
    if students > 0 {
        return Err(AppError::new(ERR_NOT_EMPTY, "Classroom still has students")
            .with_context("students", students.to_string()));
    }
    let res = sqlx::query("DELETE FROM classrooms WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Classroom not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}
