use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{AppError, AppResult};
use crate::id::new_uuid_v7;
use crate::time::now_ms;

pub const ERR_RULE_NOT_FOUND: &str = "RULE/NOT_FOUND";
pub const ERR_AYAT_NOT_FOUND: &str = "RULE/AYAT_NOT_FOUND";

/// Top-level regulation clause ("pasal"). Owns its ayats: deleting a rule
/// removes them through the FK cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub code: String,
    pub description: String,
    pub school_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Sub-clause of a rule describing one prohibited behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ayat {
    pub id: String,
    pub number: Option<String>,
    pub description: String,
    pub rule_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleWithAyats {
    pub rule: Rule,
    pub ayats: Vec<Ayat>,
}

impl TryFrom<&SqliteRow> for Rule {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            code: row.try_get("code").map_err(AppError::from)?,
            description: row.try_get("description").map_err(AppError::from)?,
            school_id: row.try_get("school_id").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

impl TryFrom<&SqliteRow> for Ayat {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            number: row.try_get("number").map_err(AppError::from)?,
            description: row.try_get("description").map_err(AppError::from)?,
            rule_id: row.try_get("rule_id").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

pub async fn add_rule(
    pool: &SqlitePool,
    school_id: &str,
    code: &str,
    description: &str,
) -> AppResult<Rule> {
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO violation_rules (id, code, description, school_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(code)
    .bind(description)
    .bind(school_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(AppError::from)?;

    get(pool, school_id, &id)
        .await?
        .ok_or_else(|| AppError::new(ERR_RULE_NOT_FOUND, "Rule missing after create"))
}

pub async fn get(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<Option<Rule>> {
    let row = sqlx::query("SELECT * FROM violation_rules WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Rule::try_from).transpose()
}

pub async fn find_by_code(
    pool: &SqlitePool,
    school_id: &str,
    code: &str,
) -> AppResult<Option<Rule>> {
    let row = sqlx::query("SELECT * FROM violation_rules WHERE school_id = ? AND code = ?")
        .bind(school_id)
        .bind(code)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)?;
    row.as_ref().map(Rule::try_from).transpose()
}

pub async fn list(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<Rule>> {
    let rows = sqlx::query("SELECT * FROM violation_rules WHERE school_id = ? ORDER BY created_at, id")
        .bind(school_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;
    rows.iter().map(Rule::try_from).collect()
}

/// Delete a rule. Its ayats and their violation links go with it.
pub async fn delete_rule(pool: &SqlitePool, school_id: &str, id: &str) -> AppResult<()> {
    let res = sqlx::query("DELETE FROM violation_rules WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .execute(pool)
        .await
        .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_RULE_NOT_FOUND, "Rule not found")
            .with_context("id", id.to_string()));
    }
    Ok(())
}

pub async fn add_ayat(
    pool: &SqlitePool,
    school_id: &str,
    rule_id: &str,
    number: Option<&str>,
    description: &str,
) -> AppResult<Ayat> {
    if get(pool, school_id, rule_id).await?.is_none() {
        return Err(AppError::new(ERR_RULE_NOT_FOUND, "Rule not found")
            .with_context("rule_id", rule_id.to_string()));
    }
    let now = now_ms();
    let id = new_uuid_v7();
    sqlx::query(
        "INSERT INTO ayats (id, number, description, rule_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(number)
    .bind(description)
    .bind(rule_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(AppError::from)?;

    let row = sqlx::query("SELECT * FROM ayats WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .map_err(AppError::from)?;
    Ayat::try_from(&row)
}

/// Delete an ayat. Tenant membership is checked through the owning rule.
pub async fn delete_ayat(pool: &SqlitePool, school_id: &str, ayat_id: &str) -> AppResult<()> {
    let res = sqlx::query(
        "DELETE FROM ayats WHERE id = ? AND rule_id IN
           (SELECT id FROM violation_rules WHERE school_id = ?)",
    )
    .bind(ayat_id)
    .bind(school_id)
    .execute(pool)
    .await
    .map_err(AppError::from)?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ERR_AYAT_NOT_FOUND, "Ayat not found")
            .with_context("ayat_id", ayat_id.to_string()));
    }
    Ok(())
}

pub async fn ayats_of(pool: &SqlitePool, rule_id: &str) -> AppResult<Vec<Ayat>> {
    let rows = sqlx::query("SELECT * FROM ayats WHERE rule_id = ? ORDER BY created_at, id")
        .bind(rule_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;
    rows.iter().map(Ayat::try_from).collect()
}

/// The full rule book of a tenant, each rule with its ayats attached.
pub async fn rules_with_ayats(pool: &SqlitePool, school_id: &str) -> AppResult<Vec<RuleWithAyats>> {
    let mut out = Vec::new();
    for rule in list(pool, school_id).await? {
        let ayats = ayats_of(pool, &rule.id).await?;
        out.push(RuleWithAyats { rule, ayats });
    }
    Ok(out)
}
