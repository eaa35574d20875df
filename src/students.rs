use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::id::{new_token, new_uuid_v7};
use crate::time::now_ms;

pub const ERR_NOT_FOUND: &str = "STUDENT/NOT_FOUND";
pub const ERR_NIS_TAKEN: &str = "STUDENT/NIS_TAKEN";
pub const ERR_HAS_VIOLATIONS: &str = "STUDENT/HAS_VIOLATIONS";
pub const ERR_CLASSROOM_INVALID: &str = "STUDENT/CLASSROOM_INVALID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub nis: String,
    pub classroom_id: Option<String>,
    pub school_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&SqliteRow> for Student {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            name: row.try_get("name").map_err(AppError::from)?,
            nis: row.try_get("nis").map_err(AppError::from)?,
            classroom_id: row.try_get("classroom_id").map_err(AppError::from)?,
            school_id: row.try_get("school_id").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

pub async fn create(
    pool: &SqlitePool,
    school_id: &str,
    name: &str,
    nis: &str,
    classroom_id: Option<&str>,
) -> AppResult<Student> {
    if find_by_nis(pool, school_id, nis).await?.is_some() {
        return Err(AppError::new(ERR_NIS_TAKEN, "NIS already registered in this school")
            .with_context("nis", nis.to_string()));
    }
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO students (id, name, nis, classroom_id, school_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(nis)
    .bind(classroom_id)
    .bind(school_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(AppError::from)?;

    get(pool, school_id, &id)
        .await?
        .ok_or_else(|| AppError::new(ERR_NOT_FOUND, "Student missing after create"))
}

/// Enroll a pasted list of names into one classroom. Each student gets a
/// short placeholder NIS to be corrected later; blank lines are skipped.
pub async fn bulk_enroll(
    pool: &SqlitePool,
    school_id: &str,
    classroom_id: &str,
    names: &[String],
) -> AppResult<usize> {
    let classroom: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM classrooms WHERE id = ? AND school_id = ?")
            .bind(classroom_id)
            .bind(school_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::from)?;
    if classroom.is_none() {
        return Err(AppError::new(ERR_CLASSROOM_INVALID, "Classroom not found")
            .with_context("classroom_id", classroom_id.to_string()));
    }

    let now = now_ms();
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    let mut count = 0usize;
    for raw in names {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        let placeholder_nis = new_token()[..8].to_string();
        sqlx::query(
            "INSERT INTO students (id, name, nis, classroom_id, school_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_uuid_v7())
        .bind(name)
        .bind(&placeholder_nis)
        .bind(classroom_id)
        .bind(school_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
        count += 1;
    }
    tx.commit().await.map_err(AppError::from)?;
    info!(
        target: "tatib",
        event = "students_enrolled",
        school_id = school_id,
        classroom_id = classroom_id,
        count = count
    );
    Ok(count)
}

/// Move students to another classroom of the same school.
pub async fn move_students(
    pool: &SqlitePool,
    school_id: &str,
    target_classroom_id: &str,
    student_ids: &[String],
) -> AppResult<usize> {
    let target: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM classrooms WHERE id = ? AND school_id = ?")
            .bind(target_classroom_id)
            .bind(school_id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::from)?;
    if target.is_none() {
        return Err(AppError::new(ERR_CLASSROOM_INVALID, "Target classroom not found")
            .with_context("classroom_id", target_classroom_id.to_string()));
    }

    let now = now_ms();
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    let mut moved = 0usize;
    for student_id in student_ids {
        let res = sqlx::query(
            "UPDATE students SET classroom_id = ?, updated_at = ? WHERE id = ? AND school_id = ?",
        )
        .bind(target_classroom_id)
        .bind(now)
        .bind(student_id)
        .bind(school_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
        moved += res.rows_affected() as usize;
    }
    tx.commit().await.map_err(AppError::from)?;
    Ok(moved)
}

pub async fn get(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<Option<Student>> {
    let row = sqlx::query("SELECT * FROM students WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Student::try_from).transpose()
}

pub async fn find_by_nis(
    pool: &SqlitePool,
    school_id: &str,
    nis: &str,
) -> AppResult<Option<Student>> {
    let row = sqlx::query("SELECT * FROM students WHERE school_id = ? AND nis = ?")
        .bind(school_id)
        .bind(nis)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Student::try_from).transpose()
}

pub async fn list(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<Student>> {
    let rows = sqlx::query("SELECT * FROM students WHERE school_id = ? ORDER BY created_at, id")
        .bind(school_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;
    rows.iter().map(Student::try_from).collect()
}

pub async fn list_of_classroom(
    pool: &SqlitePool,
    school_id: &str,
    classroom_id: &str,
) -> AppResult<Vec<Student>> {
    let rows = sqlx::query(
        "SELECT * FROM students WHERE school_id = ? AND classroom_id = ? ORDER BY name, id",
    )
    .bind(school_id)
    .bind(classroom_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    rows.iter().map(Student::try_from).collect()
}

/// Delete a student. Refused while any violation references them; the FK is
/// RESTRICT as well, this check just produces a friendlier error.
pub async fn delete(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<()> {
    let violations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM violations WHERE student_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?;
    if violations > 0 {
        return Err(AppError::new(ERR_HAS_VIOLATIONS, "Student has recorded violations")
            .with_context("violations", violations.to_string()));
    }
    let res = sqlx::query("DELETE FROM students WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Student not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}

/// Running point balance: the sum over violations that have not been
/// remitted. Derived on demand, never stored.
pub async fn active_points(pool: &SqlitePool, school_id: &str, student_id: &str) -> AppResult<i64> {
    let total: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(v.points) FROM violations v
         JOIN students s ON s.id = v.student_id
         WHERE v.student_id = ? AND s.school_id = ? AND v.is_remitted = 0",
    )
    .bind(student_id)
    .bind(school_id)
    .fetch_one(pool)
    .await
    .map_err(AppError::from)?;
    Ok(total.unwrap_or(0))
}
