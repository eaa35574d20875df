use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::id::new_uuid_v7;
use crate::rules;
use crate::time::now_ms;

pub const ERR_NOT_FOUND: &str = "VIOLATION/NOT_FOUND";
pub const ERR_STUDENT_NOT_FOUND: &str = "VIOLATION/STUDENT_NOT_FOUND";
pub const ERR_REASON_REQUIRED: &str = "VIOLATION/REASON_REQUIRED";

/// Evidence photos are capped per record; extra uploads are dropped.
pub const MAX_PHOTOS: usize = 10;

/// Category name recorded when no category was selected.
const FALLBACK_CATEGORY: &str = "Umum";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub description: String,
    /// Snapshot of the category's point value at recording time.
    pub points: i64,
    pub date_posted: i64,
    pub student_id: String,
    /// Denormalized rule label, `"{code} - {description}"`.
    pub pasal: Option<String>,
    /// Denormalized category name.
    pub category: Option<String>,
    pub reported_by: Option<String>,
    pub is_remitted: bool,
    pub remission_reason: Option<String>,
    pub remission_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub filename: String,
    pub violation_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for recording one violation against a student.
#[derive(Debug, Clone, Default)]
pub struct NewViolation {
    pub student_id: String,
    pub description: String,
    /// Selected category; `None` records zero points under the fallback name.
    pub category_id: Option<String>,
    /// Selected rule; ayat citations are restricted to this rule.
    pub rule_id: Option<String>,
    pub ayat_ids: Vec<String>,
    /// Asset filenames already written by the upload collaborator.
    pub photos: Vec<String>,
    pub reported_by: Option<String>,
    /// Event time in epoch ms; `None` means now.
    pub date_posted: Option<i64>,
}

impl TryFrom<&SqliteRow> for Violation {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            description: row.try_get("description").map_err(AppError::from)?,
            points: row.try_get("points").map_err(AppError::from)?,
            date_posted: row.try_get("date_posted").map_err(AppError::from)?,
            student_id: row.try_get("student_id").map_err(AppError::from)?,
            pasal: row.try_get("pasal").map_err(AppError::from)?,
            category: row.try_get("category").map_err(AppError::from)?,
            reported_by: row.try_get("reported_by").map_err(AppError::from)?,
            is_remitted: row
                .try_get::<i64, _>("is_remitted")
                .map(|v| v != 0)
                .map_err(AppError::from)?,
            remission_reason: row.try_get("remission_reason").map_err(AppError::from)?,
            remission_date: row.try_get("remission_date").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

impl TryFrom<&SqliteRow> for Photo {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            filename: row.try_get("filename").map_err(AppError::from)?,
            violation_id: row.try_get("violation_id").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

/// Record a violation: snapshot the category points and name, render the
/// rule label, link the cited ayats of that rule and the photo filenames,
/// all in one transaction.
pub async fn record_violation(
    pool: &SqlitePool,
    school_id: &str,
    input: NewViolation,
) -> AppResult<Violation> {
    let student: Option<i64> = sqlx::query_scalar("SELECT 1 FROM students WHERE id = ? AND school_id = ?")
        .bind(&input.student_id)
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    if student.is_none() {
        return Err(AppError::new(ERR_STUDENT_NOT_FOUND, "Student not found")
            .with_context("student_id", input.student_id.clone()));
    }

    let category = match input.category_id.as_deref() {
        Some(id) => crate::categories::get(pool, school_id, id).await?,
        None => None,
    };
    let (points, category_name) = category
        .map(|c| (c.points, c.name))
        .unwrap_or((0, FALLBACK_CATEGORY.to_string()));

    let pasal = match input.rule_id.as_deref() {
        Some(rule_id) => rules::get(pool, school_id, rule_id)
            .await?
            .map(|r| format!("{} - {}", r.code, r.description)),
        None => None,
    };

    let now = now_ms();
    let date_posted = input.date_posted.unwrap_or(now);
    let id = new_uuid_v7();

    let mut tx = pool.begin().await.map_err(AppError::from)?;
    sqlx::query(
        "INSERT INTO violations (id, description, points, date_posted, student_id, pasal,
                                 category, reported_by, is_remitted, remission_reason,
                                 remission_date, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, NULL, ?, ?)",
    )
    .bind(&id)
    .bind(&input.description)
    .bind(points)
    .bind(date_posted)
    .bind(&input.student_id)
    .bind(&pasal)
    .bind(&category_name)
    .bind(&input.reported_by)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    // Citations are only valid against the selected rule; anything else in
    // the list (another rule's ayat, a stale id) is dropped.
    if let Some(rule_id) = input.rule_id.as_deref() {
        for ayat_id in &input.ayat_ids {
            let belongs: Option<i64> = sqlx::query_scalar("SELECT 1 FROM ayats WHERE id = ? AND rule_id = ?")
                .bind(ayat_id)
                .bind(rule_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(AppError::from)?;
            if belongs.is_some() {
                sqlx::query("INSERT OR IGNORE INTO violation_ayats (violation_id, ayat_id) VALUES (?, ?)")
                    .bind(&id)
                    .bind(ayat_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(AppError::from)?;
            }
        }
    }

    for filename in input.photos.iter().take(MAX_PHOTOS) {
        sqlx::query(
            "INSERT INTO violation_photos (id, filename, violation_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_uuid_v7())
        .bind(filename)
        .bind(&id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    }

    tx.commit().await.map_err(AppError::from)?;
    info!(
        target: "tatib",
        event = "violation_recorded",
        school_id = school_id,
        student_id = %input.student_id,
        points = points
    );

    get(pool, school_id, &id)
        .await?
        .ok_or_else(|| AppError::new(ERR_NOT_FOUND, "Violation missing after create"))
}

pub async fn get(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<Option<Violation>> {
    let row = sqlx::query(
        "SELECT v.* FROM violations v
         JOIN students s ON s.id = v.student_id
         WHERE v.id = ? AND s.school_id = ?",
    )
    .bind(id)
    .bind(school_id)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from)?;
    row.as_ref().map(Violation::try_from).transpose()
}

/// A student's record, newest first.
pub async fn history(
    pool: &SqlitePool,
    school_id: &str,
    student_id: &str,
) -> AppResult<Vec<Violation>> {
    let rows = sqlx::query(
        "SELECT v.* FROM violations v
         JOIN students s ON s.id = v.student_id
         WHERE v.student_id = ? AND s.school_id = ?
         ORDER BY v.date_posted DESC, v.id DESC",
    )
    .bind(student_id)
    .bind(school_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    rows.iter().map(Violation::try_from).collect()
}

/// Permanently delete a violation; its photo rows and ayat links cascade,
/// the photo files on disk stay.
pub async fn delete_violation(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<()> {
    let res = sqlx::query(
        "DELETE FROM violations WHERE id = ? AND student_id IN
           (SELECT id FROM students WHERE school_id = ?)",
    )
    .bind(id)
    .bind(school_id)
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Violation not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}

/// Pardon a violation, keeping the record but excluding its points from the
/// student's balance. A reason is mandatory.
pub async fn remit(pool: &SqlitePool, school_id: &str, id: &str, reason: &str) -> AppResult<()> {
    if reason.trim().is_empty() {
        return Err(AppError::new(ERR_REASON_REQUIRED, "Remission reason is required"));
    }
    let now = now_ms();
    let res = sqlx::query(
        "UPDATE violations SET is_remitted = 1, remission_reason = ?, remission_date = ?, updated_at = ?
         WHERE id = ? AND student_id IN (SELECT id FROM students WHERE school_id = ?)",
    )
    .bind(reason)
    .bind(now)
    .bind(now)
    .bind(id)
    .bind(school_id)
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Violation not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}

pub async fn ayats_of(pool: &SqlitePool, violation_id: &str) -> AppResult<Vec<rules::Ayat>> {
    let rows = sqlx::query(
        "SELECT a.* FROM ayats a
         JOIN violation_ayats va ON va.ayat_id = a.id
         WHERE va.violation_id = ?
         ORDER BY a.created_at, a.id",
    )
    .bind(violation_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    rows.iter().map(rules::Ayat::try_from).collect()
}

pub async fn photos_of(pool: &SqlitePool, violation_id: &str) -> AppResult<Vec<Photo>> {
    let rows = sqlx::query(
        "SELECT * FROM violation_photos WHERE violation_id = ? ORDER BY created_at, id",
    )
    .bind(violation_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    rows.iter().map(Photo::try_from).collect()
}
