use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, AppResult};
use crate::id::new_uuid_v7;
use crate::time::now_ms;

pub const ERR_NOT_FOUND: &str = "CATEGORY/NOT_FOUND";

/// Violation category carrying the point value copied onto each violation
/// at recording time. Editing a category never touches past records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub points: i64,
    pub school_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&SqliteRow> for Category {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            name: row.try_get("name").map_err(AppError::from)?,
            points: row.try_get("points").map_err(AppError::from)?,
            school_id: row.try_get("school_id").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

pub async fn add(
    pool: &SqlitePool,
    school_id: &str,
    name: &str,
    points: i64,
) -> AppResult<Category> {
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO violation_categories (id, name, points, school_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(points)
    .bind(school_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(AppError::from)?;

    get(pool, school_id, &id)
        .await?
        .ok_or_else(|| AppError::new(ERR_NOT_FOUND, "Category missing after create"))
}

pub async fn get(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<Option<Category>> {
    let row = sqlx::query("SELECT * FROM violation_categories WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Category::try_from).transpose()
}

pub async fn find_by_name(
    pool: &SqlitePool,
    school_id: &str,
    name: &str,
) -> AppResult<Option<Category>> {
    let row = sqlx::query("SELECT * FROM violation_categories WHERE school_id = ? AND name = ?")
        .bind(school_id)
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Category::try_from).transpose()
}

pub async fn list(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<Category>> {
    let rows =
        sqlx::query("SELECT * FROM violation_categories WHERE school_id = ? ORDER BY created_at, id")
            .bind(school_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::from)?;
    rows.iter().map(Category::try_from).collect()
}

pub async fn delete(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM violation_categories WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Category not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}
