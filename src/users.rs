use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::auth::{hash_password, verify_password, ROLE_SCHOOL_ADMIN};
use crate::error::{AppError, AppResult};
use crate::id::new_uuid_v7;
use crate::time::now_ms;

pub const ERR_USERNAME_TAKEN: &str = "USER/USERNAME_TAKEN";
pub const ERR_NOT_FOUND: &str = "USER/NOT_FOUND";
pub const ERR_SELF_DELETE: &str = "USER/SELF_DELETE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub role: String,
    pub school_id: Option<String>,
    pub must_reset_password: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<&SqliteRow> for Member {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            username: row.try_get("username").map_err(AppError::from)?,
            full_name: row.try_get("full_name").map_err(AppError::from)?,
            role: row.try_get("role").map_err(AppError::from)?,
            school_id: row.try_get("school_id").map_err(AppError::from)?,
            must_reset_password: row
                .try_get::<i64, _>("must_reset_password")
                .map(|v| v != 0)
                .map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

/// Add a staff member to a school. Usernames are unique across the whole
/// system, not per tenant.
pub async fn add_member(
    pool: &SqlitePool,
    school_id: &str,
    username: &str,
    full_name: Option<&str>,
    password: &str,
) -> AppResult<Member> {
    if find_by_username(pool, username).await?.is_some() {
        return Err(AppError::new(ERR_USERNAME_TAKEN, "Username already in use")
            .with_context("username", username.to_string()));
    }
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO users (id, username, password, full_name, role, school_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(username)
    .bind(hash_password(password))
    .bind(full_name)
    .bind(ROLE_SCHOOL_ADMIN)
    .bind(school_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    info!(target: "tatib", event = "member_added", school_id = school_id, username = username);

    find_by_username(pool, username)
        .await?
        .ok_or_else(|| AppError::new(ERR_NOT_FOUND, "Member missing after create"))
}

pub async fn members_of(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<Member>> {
    let rows = sqlx::query("SELECT * FROM users WHERE school_id = ? ORDER BY created_at, id")
        .bind(school_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;
    rows.iter().map(Member::try_from).collect()
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<Member>> {
    let row = sqlx::query("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Member::try_from).transpose()
}

/// Check a credential pair. Accounts awaiting a password reset hold no
/// usable credential and never authenticate.
pub async fn authenticate(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> AppResult<Option<Member>> {
    let row = sqlx::query("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    let Some(row) = row.as_ref() else {
        return Ok(None);
    };
    let stored: Option<String> = row.try_get("password").map_err(AppError::from)?;
    if verify_password(stored.as_deref(), password) {
        Member::try_from(row).map(Some)
    } else {
        Ok(None)
    }
}

/// Set a fresh password for a member of the given school, clearing any
/// pending reset state.
pub async fn set_password(
    pool: &SqlitePool,
    school_id: &str,
    user_id: &str,
    new_password: &str,
) -> AppResult<()> {
    let res = sqlx::query(
        "UPDATE users
         SET password = ?, must_reset_password = 0, reset_token = NULL, updated_at = ?
         WHERE id = ? AND school_id = ?",
    )
    .bind(hash_password(new_password))
    .bind(now_ms())
    .bind(user_id)
    .bind(school_id)
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Member not found")
            .with_context("user_id", user_id.to_string()));
    }
    Ok(())
}

/// Delete a member account. The acting account cannot delete itself.
pub async fn delete_member(
    pool: &SqlitePool,
    school_id: &str,
    actor_id: &str,
    user_id: &str,
) -> AppResult<()> {
    if actor_id == user_id {
        return Err(AppError::new(ERR_SELF_DELETE, "Cannot delete own account"));
    }
    let res = sqlx::query("DELETE FROM users WHERE id = ? AND school_id = ?")
        .bind(user_id)
        .bind(school_id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_NOT_FOUND, "Member not found")
            .with_context("user_id", user_id.to_string()));
    }
    Ok(())
}

/// Redeem a reset token: sets the password and unlocks the account.
pub async fn redeem_reset_token(
    pool: &SqlitePool,
    username: &str,
    token: &str,
    new_password: &str,
) -> AppResult<bool> {
    let res = sqlx::query(
        "UPDATE users
         SET password = ?, must_reset_password = 0, reset_token = NULL, updated_at = ?
         WHERE username = ? AND reset_token = ? AND must_reset_password = 1",
    )
    .bind(hash_password(new_password))
    .bind(now_ms())
    .bind(username)
    .bind(token)
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    Ok(res.rows_affected() > 0)
}
