use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};

use crate::assets::AssetStore;
use crate::auth::ROLE_SCHOOL_ADMIN;
use crate::error::AppError;
use crate::id::{new_token, new_uuid_v7};
use crate::time::now_ms;

use super::archive::{self, ArchiveError};
use super::manifest::AyatRef;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("malformed archive: {0}")]
    Malformed(#[from] ArchiveError),
    #[error("school not found: {0}")]
    SchoolNotFound(String),
    #[error("asset store failure: {0}")]
    Asset(AppError),
    #[error("database failure: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub students_created: u64,
    pub violations_created: u64,
    /// Accounts recreated from the archive. They hold no password; the
    /// operator hands each token to its owner out of band.
    pub locked_members: Vec<LockedMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedMember {
    pub username: String,
    pub reset_token: String,
}

/// Merge an archive into one tenant. Entities already present under their
/// natural key are reused, everything else is created, and every relational
/// write rides a single transaction: a failure anywhere rolls the database
/// back to where it was. Asset files extracted before the failure stay on
/// disk; they are harmless orphans, not corruption.
pub async fn restore_backup(
    pool: &SqlitePool,
    assets: &AssetStore,
    school_id: &str,
    bytes: &[u8],
) -> Result<RestoreSummary, RestoreError> {
    let (manifest, archive_assets) = archive::decode(bytes)?;

    let known: Option<i64> = sqlx::query_scalar("SELECT 1 FROM schools WHERE id = ?")
        .bind(school_id)
        .fetch_optional(pool)
        .await?;
    if known.is_none() {
        return Err(RestoreError::SchoolNotFound(school_id.to_string()));
    }

    // Logo first: nothing later depends on it and the relational update in
    // step 1 only records the filename.
    if let Some(logo) = manifest.school.logo.as_deref() {
        if let Some(payload) = archive_assets.get(logo) {
            assets.write(logo, payload).map_err(RestoreError::Asset)?;
        }
    }

    let now = now_ms();
    let mut summary = RestoreSummary::default();
    let mut tx = pool.begin().await?;

    // 1. Tenant profile: archive values win where present.
    sqlx::query(
        "UPDATE schools SET name = ?, address = COALESCE(?, address),
                logo = COALESCE(?, logo), updated_at = ?
         WHERE id = ?",
    )
    .bind(&manifest.school.name)
    .bind(&manifest.school.address)
    .bind(&manifest.school.logo)
    .bind(now)
    .bind(school_id)
    .execute(&mut *tx)
    .await?;

    // 2. Rule book before anything that cites it.
    for rule in &manifest.settings.rules {
        let rule_id = match find_rule(&mut tx, school_id, &rule.code).await? {
            Some(id) => id,
            None => {
                let id = new_uuid_v7();
                sqlx::query(
                    "INSERT INTO violation_rules (id, code, description, school_id, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&rule.code)
                .bind(&rule.description)
                .bind(school_id)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };
        for ayat in &rule.ayats {
            let present: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM ayats WHERE rule_id = ? AND description = ? AND number IS ?",
            )
            .bind(&rule_id)
            .bind(&ayat.description)
            .bind(&ayat.number)
            .fetch_optional(&mut *tx)
            .await?;
            if present.is_none() {
                sqlx::query(
                    "INSERT INTO ayats (id, number, description, rule_id, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(new_uuid_v7())
                .bind(&ayat.number)
                .bind(&ayat.description)
                .bind(&rule_id)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    // 3. Categories, classrooms, members.
    for category in &manifest.settings.categories {
        let present: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM violation_categories WHERE school_id = ? AND name = ?",
        )
        .bind(school_id)
        .bind(&category.name)
        .fetch_optional(&mut *tx)
        .await?;
        if present.is_none() {
            sqlx::query(
                "INSERT INTO violation_categories (id, name, points, school_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(new_uuid_v7())
            .bind(&category.name)
            .bind(category.points)
            .bind(school_id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
    }

    for classroom in &manifest.settings.classrooms {
        if find_classroom(&mut tx, school_id, &classroom.name)
            .await?
            .is_none()
        {
            sqlx::query(
                "INSERT INTO classrooms (id, name, school_id, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(new_uuid_v7())
            .bind(&classroom.name)
            .bind(school_id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
    }

    // Usernames are unique across the whole system, so the match is global.
    // Recreated accounts get no password, only a one-time reset token.
    for member in &manifest.settings.members {
        let present: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE username = ?")
            .bind(&member.username)
            .fetch_optional(&mut *tx)
            .await?;
        if present.is_none() {
            let token = new_token();
            sqlx::query(
                "INSERT INTO users (id, username, password, full_name, role, school_id,
                                    must_reset_password, reset_token, created_at, updated_at)
                 VALUES (?, ?, NULL, ?, ?, ?, 1, ?, ?, ?)",
            )
            .bind(new_uuid_v7())
            .bind(&member.username)
            .bind(&member.full_name)
            .bind(ROLE_SCHOOL_ADMIN)
            .bind(school_id)
            .bind(&token)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            info!(
                target: "tatib",
                event = "member_restored_locked",
                username = %member.username
            );
            summary.locked_members.push(LockedMember {
                username: member.username.clone(),
                reset_token: token,
            });
        }
    }

    // 4 & 5. Roster, then each student's record.
    for student in &manifest.students {
        let classroom_id = match student.classroom.as_deref() {
            Some(name) => find_classroom(&mut tx, school_id, name).await?,
            None => None,
        };

        let student_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM students WHERE school_id = ? AND nis = ?")
                .bind(school_id)
                .bind(&student.nis)
                .fetch_optional(&mut *tx)
                .await?;
        let student_id = match student_id {
            Some(id) => id,
            None => {
                let id = new_uuid_v7();
                sqlx::query(
                    "INSERT INTO students (id, name, nis, classroom_id, school_id, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&student.name)
                .bind(&student.nis)
                .bind(&classroom_id)
                .bind(school_id)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                summary.students_created += 1;
                id
            }
        };

        for violation in &student.violations {
            let date_posted = violation.date_ms().ok_or_else(|| {
                ArchiveError::ManifestInvalid(format!("violation date: {:?}", violation.date))
            })?;

            let existing: Option<String> = sqlx::query_scalar(
                "SELECT id FROM violations
                 WHERE student_id = ? AND date_posted = ? AND description = ?",
            )
            .bind(&student_id)
            .bind(date_posted)
            .bind(&violation.description)
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                continue;
            }

            let violation_id = new_uuid_v7();
            sqlx::query(
                "INSERT INTO violations (id, description, points, date_posted, student_id, pasal,
                                         category, reported_by, is_remitted, remission_reason,
                                         remission_date, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
            )
            .bind(&violation_id)
            .bind(&violation.description)
            .bind(violation.points)
            .bind(date_posted)
            .bind(&student_id)
            .bind(&violation.pasal)
            .bind(&violation.kategori)
            .bind(&violation.reporter)
            .bind(violation.is_remitted as i64)
            .bind(&violation.remission_reason)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            summary.violations_created += 1;

            for ayat in &violation.ayats {
                if let Some(ayat_id) = find_tenant_ayat(&mut tx, school_id, ayat).await? {
                    sqlx::query(
                        "INSERT OR IGNORE INTO violation_ayats (violation_id, ayat_id) VALUES (?, ?)",
                    )
                    .bind(&violation_id)
                    .bind(&ayat_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            for photo in &violation.photos {
                match assets.exists(photo) {
                    Ok(false) => {
                        if let Some(payload) = archive_assets.get(photo) {
                            assets.write(photo, payload).map_err(RestoreError::Asset)?;
                        }
                    }
                    Ok(true) => {}
                    Err(err) => {
                        warn!(
                            target: "tatib",
                            event = "restore_asset_skipped",
                            filename = %photo,
                            error = %err
                        );
                    }
                }

                let recorded: Option<i64> = sqlx::query_scalar(
                    "SELECT 1 FROM violation_photos WHERE violation_id = ? AND filename = ?",
                )
                .bind(&violation_id)
                .bind(photo)
                .fetch_optional(&mut *tx)
                .await?;
                if recorded.is_none() {
                    sqlx::query(
                        "INSERT INTO violation_photos (id, filename, violation_id, created_at, updated_at)
                         VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(new_uuid_v7())
                    .bind(photo)
                    .bind(&violation_id)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
    }

    tx.commit().await?;
    info!(
        target: "tatib",
        event = "restore_complete",
        school_id = school_id,
        students_created = summary.students_created,
        violations_created = summary.violations_created,
        members_created = summary.locked_members.len()
    );
    Ok(summary)
}

async fn find_rule(
    tx: &mut SqliteConnection,
    school_id: &str,
    code: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM violation_rules WHERE school_id = ? AND code = ?")
        .bind(school_id)
        .bind(code)
        .fetch_optional(tx)
        .await
}

async fn find_classroom(
    tx: &mut SqliteConnection,
    school_id: &str,
    name: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM classrooms WHERE school_id = ? AND name = ?")
        .bind(school_id)
        .bind(name)
        .fetch_optional(tx)
        .await
}

/// Ayat lookup for violation links, scoped to the importing tenant through
/// the owning rule.
async fn find_tenant_ayat(
    tx: &mut SqliteConnection,
    school_id: &str,
    ayat: &AyatRef,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT a.id FROM ayats a
         JOIN violation_rules r ON r.id = a.rule_id
         WHERE r.school_id = ? AND a.description = ? AND a.number IS ?",
    )
    .bind(school_id)
    .bind(&ayat.description)
    .bind(&ayat.number)
    .fetch_optional(tx)
    .await
}
