use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTotals {
    pub students: i64,
    pub violations: i64,
    pub classrooms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopOffender {
    pub student_id: String,
    pub name: String,
    pub count: i64,
    pub total_points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    /// `YYYY-MM-DD` in UTC.
    pub date: String,
    pub count: i64,
}

pub async fn tenant_totals(pool: &SqlitePool, school_id: &str) -> AppResult<TenantTotals> {
    let students: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students WHERE school_id = ?")
        .bind(school_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?;
    let violations: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM violations v
         JOIN students s ON s.id = v.student_id
         WHERE s.school_id = ?",
    )
    .bind(school_id)
    .fetch_one(pool)
    .await
    .map_err(AppError::from)?;
    let classrooms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classrooms WHERE school_id = ?")
        .bind(school_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?;
    Ok(TenantTotals {
        students,
        violations,
        classrooms,
    })
}

/// Violation counts grouped by the denormalized category name.
pub async fn category_breakdown(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<CategoryCount>> {
    let rows = sqlx::query(
        "SELECT v.category AS category, COUNT(*) AS count FROM violations v
         JOIN students s ON s.id = v.student_id
         WHERE s.school_id = ?
         GROUP BY v.category
         ORDER BY count DESC, category",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    rows.iter()
        .map(|row| {
            Ok(CategoryCount {
                category: row.try_get("category").map_err(AppError::from)?,
                count: row.try_get("count").map_err(AppError::from)?,
            })
        })
        .collect()
}

/// Students with the highest point totals for today (UTC), worst first.
pub async fn top_offenders_today(
    pool: &SqlitePool,
    school_id: &str,
    limit: i64,
) -> AppResult<Vec<TopOffender>> {
    let today = Utc::now().date_naive();
    let start = day_start_ms(today);
    let end = day_start_ms(today + Duration::days(1));

    let rows = sqlx::query(
        "SELECT s.id AS student_id, s.name AS name,
                COUNT(v.id) AS count, SUM(v.points) AS total_points
         FROM students s
         JOIN violations v ON v.student_id = s.id
         WHERE s.school_id = ? AND v.date_posted >= ? AND v.date_posted < ?
         GROUP BY s.id
         ORDER BY total_points DESC
         LIMIT ?",
    )
    .bind(school_id)
    .bind(start)
    .bind(end)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    rows.iter()
        .map(|row| {
            Ok(TopOffender {
                student_id: row.try_get("student_id").map_err(AppError::from)?,
                name: row.try_get("name").map_err(AppError::from)?,
                count: row.try_get("count").map_err(AppError::from)?,
                total_points: row.try_get("total_points").map_err(AppError::from)?,
            })
        })
        .collect()
}

/// Daily violation counts over the trailing window, one entry per day with
/// zeroes filled in for quiet days.
pub async fn daily_trend(pool: &SqlitePool, school_id: &str, days: i64) -> AppResult<Vec<DayCount>> {
    let today = Utc::now().date_naive();
    let start_date = today - Duration::days(days.max(1) - 1);
    let start_ms = day_start_ms(start_date);

    let rows = sqlx::query(
        "SELECT date(v.date_posted / 1000, 'unixepoch') AS day, COUNT(*) AS count
         FROM violations v
         JOIN students s ON s.id = v.student_id
         WHERE s.school_id = ? AND v.date_posted >= ?
         GROUP BY day",
    )
    .bind(school_id)
    .bind(start_ms)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;

    let mut counts = std::collections::HashMap::new();
    for row in &rows {
        let day: String = row.try_get("day").map_err(AppError::from)?;
        let count: i64 = row.try_get("count").map_err(AppError::from)?;
        counts.insert(day, count);
    }

    let mut out = Vec::new();
    let mut current = start_date;
    while current <= today {
        let key = current.format("%Y-%m-%d").to_string();
        let count = counts.get(&key).copied().unwrap_or(0);
        out.push(DayCount { date: key, count });
        current += Duration::days(1);
    }
    Ok(out)
}

fn day_start_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}
