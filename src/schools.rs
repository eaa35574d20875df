use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::auth::{hash_password, ROLE_SCHOOL_ADMIN};
use crate::error::{AppError, AppResult};
use crate::id::new_uuid_v7;
use crate::time::now_ms;

pub const ERR_NAME_TAKEN: &str = "SCHOOL/NAME_TAKEN";
pub const ERR_NOT_FOUND: &str = "SCHOOL/NOT_FOUND";

/// Tenant root. Every roster, rule and violation hangs off one school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub logo: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&SqliteRow> for School {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            name: row.try_get("name").map_err(AppError::from)?,
            address: row.try_get("address").map_err(AppError::from)?,
            logo: row.try_get("logo").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

/// Seed data every fresh school starts with, mirroring the onboarding flow.
const DEFAULT_CATEGORIES: [(&str, i64); 3] = [("Ringan", 5), ("Sedang", 15), ("Berat", 30)];
const DEFAULT_RULES: [(&str, &str); 2] = [
    ("Pasal 1", "Ketertiban Umum"),
    ("Pasal 2", "Kerapihan Seragam"),
];

/// Create a school together with its first school_admin account, default
/// categories and default rules, in one transaction. Super-admin operation;
/// the caller is responsible for having checked the actor's role.
pub async fn create_school(
    pool: &SqlitePool,
    name: &str,
    address: Option<&str>,
    admin_username: &str,
    admin_password: &str,
) -> AppResult<School> {
    if find_by_name(pool, name).await?.is_some() {
        return Err(AppError::new(ERR_NAME_TAKEN, "School name already registered")
            .with_context("name", name.to_string()));
    }
    let username_taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE username = ?")
        .bind(admin_username)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    if username_taken.is_some() {
        return Err(
            AppError::new(crate::users::ERR_USERNAME_TAKEN, "Username already in use")
                .with_context("username", admin_username.to_string()),
        );
    }

    let now = now_ms();
    let school_id = new_uuid_v7();

    let mut tx = pool.begin().await.map_err(AppError::from)?;
    sqlx::query(
        "INSERT INTO schools (id, name, address, logo, created_at, updated_at)
         VALUES (?, ?, ?, NULL, ?, ?)",
    )
    .bind(&school_id)
    .bind(name)
    .bind(address)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    sqlx::query(
        "INSERT INTO users (id, username, password, full_name, role, school_id, created_at, updated_at)
         VALUES (?, ?, ?, 'Administrator', ?, ?, ?, ?)",
    )
    .bind(new_uuid_v7())
    .bind(admin_username)
    .bind(hash_password(admin_password))
    .bind(ROLE_SCHOOL_ADMIN)
    .bind(&school_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?;

    for (cat_name, points) in DEFAULT_CATEGORIES {
        sqlx::query(
            "INSERT INTO violation_categories (id, name, points, school_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_uuid_v7())
        .bind(cat_name)
        .bind(points)
        .bind(&school_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    }
    for (code, description) in DEFAULT_RULES {
        sqlx::query(
            "INSERT INTO violation_rules (id, code, description, school_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_uuid_v7())
        .bind(code)
        .bind(description)
        .bind(&school_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
    }

    tx.commit().await.map_err(AppError::from)?;
    info!(target: "tatib", event = "school_created", school_id = %school_id, name = name);

    get(pool, &school_id)
        .await?
        .ok_or_else(|| AppError::new(ERR_NOT_FOUND, "School missing after create"))
}

pub async fn get(pool: &SqlitePool, school_id: &str) -> AppResult<Option<School>> {
    let row = sqlx::query("SELECT * FROM schools WHERE id = ?")
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(School::try_from).transpose()
}

pub async fn find_by_name(pool: &SqlitePool, name: &str) -> AppResult<Option<School>> {
    let row = sqlx::query("SELECT * FROM schools WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(School::try_from).transpose()
}

pub async fn list(pool: &SqlitePool) -> AppResult<Vec<School>> {
    let rows = sqlx::query("SELECT * FROM schools ORDER BY created_at, id")
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;
    rows.iter().map(School::try_from).collect()
}

/// Update the tenant profile. `None` fields are left untouched, matching the
/// settings form where empty inputs mean "keep".
pub async fn update_profile(
    pool: &SqlitePool,
    school_id: &str,
    name: Option<&str>,
    address: Option<&str>,
    logo: Option<&str>,
) -> AppResult<()> {
    let Some(existing) = get(pool, school_id).await? else {
        return Err(AppError::new(ERR_NOT_FOUND, "School not found")
            .with_context("school_id", school_id.to_string()));
    };

    let name = name.filter(|v| !v.trim().is_empty()).unwrap_or(&existing.name);
    let address = address.or(existing.address.as_deref());
    let logo = logo.or(existing.logo.as_deref());

    sqlx::query("UPDATE schools SET name = ?, address = ?, logo = ?, updated_at = ? WHERE id = ?")
        .bind(name)
        .bind(address)
        .bind(logo)
        .bind(now_ms())
        .bind(school_id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    Ok(())
}
