use std::collections::BTreeMap;

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::assets::AssetStore;
use crate::error::{AppError, AppResult};
use crate::time::{format_archive_ts, now_ms};
use crate::{categories, classrooms, rules, schools, violations};

use super::archive;
use super::manifest::{
    AyatRef, BackupManifest, CategoryEntry, ClassroomEntry, MemberEntry, RuleEntry, SchoolSection,
    SettingsSection, StudentEntry, ViolationEntry,
};

/// Snapshot one tenant into a portable archive: settings, roster and
/// violation history in `data.json`, referenced photo/logo files embedded
/// alongside. An asset named in the database but gone from disk is skipped,
/// never fatal.
pub async fn create_backup(
    pool: &SqlitePool,
    assets: &AssetStore,
    school_id: &str,
) -> AppResult<Vec<u8>> {
    let school = schools::get(pool, school_id).await?.ok_or_else(|| {
        AppError::new(schools::ERR_NOT_FOUND, "School not found")
            .with_context("school_id", school_id.to_string())
    })?;

    let rule_entries: Vec<RuleEntry> = rules::rules_with_ayats(pool, school_id)
        .await?
        .into_iter()
        .map(|entry| RuleEntry {
            code: entry.rule.code,
            description: entry.rule.description,
            ayats: entry.ayats.into_iter().map(ayat_ref).collect(),
        })
        .collect();

    let category_entries: Vec<CategoryEntry> = categories::list(pool, school_id)
        .await?
        .into_iter()
        .map(|c| CategoryEntry {
            name: c.name,
            points: c.points,
        })
        .collect();

    let classroom_entries: Vec<ClassroomEntry> = classrooms::list(pool, school_id)
        .await?
        .into_iter()
        .map(|c| ClassroomEntry { name: c.name })
        .collect();

    let member_rows = sqlx::query(
        "SELECT username, full_name FROM users
         WHERE school_id = ? AND role != 'super_admin'
         ORDER BY created_at, id",
    )
    .bind(school_id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)?;
    let member_entries: Vec<MemberEntry> = member_rows
        .iter()
        .map(|row| {
            Ok(MemberEntry {
                username: row.try_get("username").map_err(AppError::from)?,
                full_name: row.try_get("full_name").map_err(AppError::from)?,
            })
        })
        .collect::<AppResult<_>>()?;

    let mut student_entries = Vec::new();
    for student in crate::students::list(pool, school_id).await? {
        let classroom_name = match student.classroom_id.as_deref() {
            Some(id) => classrooms::get(pool, school_id, id).await?.map(|c| c.name),
            None => None,
        };

        let violation_rows = sqlx::query(
            "SELECT * FROM violations WHERE student_id = ? ORDER BY date_posted, id",
        )
        .bind(&student.id)
        .fetch_all(pool)
        .await
        .map_err(AppError::from)?;

        let mut violation_entries = Vec::new();
        for row in &violation_rows {
            let violation = violations::Violation::try_from(row)?;
            let ayats = violations::ayats_of(pool, &violation.id)
                .await?
                .into_iter()
                .map(ayat_ref)
                .collect();
            let photos = violations::photos_of(pool, &violation.id)
                .await?
                .into_iter()
                .map(|p| p.filename)
                .collect();
            violation_entries.push(ViolationEntry {
                date: format_archive_ts(violation.date_posted),
                description: violation.description,
                points: violation.points,
                pasal: violation.pasal,
                kategori: violation.category,
                reporter: violation.reported_by,
                is_remitted: violation.is_remitted,
                remission_reason: violation.remission_reason,
                ayats,
                photos,
            });
        }

        student_entries.push(StudentEntry {
            name: student.name,
            nis: student.nis,
            classroom: classroom_name,
            violations: violation_entries,
        });
    }

    let manifest = BackupManifest {
        school: SchoolSection {
            name: school.name,
            address: school.address,
            logo: school.logo,
        },
        export_timestamp: format_archive_ts(now_ms()),
        settings: SettingsSection {
            members: member_entries,
            rules: rule_entries,
            categories: category_entries,
            classrooms: classroom_entries,
        },
        students: student_entries,
    };

    let mut embedded: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for filename in manifest.referenced_assets() {
        if embedded.contains_key(filename) {
            continue;
        }
        match assets.exists(filename) {
            Ok(true) => {
                embedded.insert(filename.to_string(), assets.read(filename)?);
            }
            Ok(false) => {
                warn!(
                    target: "tatib",
                    event = "export_asset_missing",
                    filename = filename
                );
            }
            Err(err) => {
                warn!(
                    target: "tatib",
                    event = "export_asset_unreadable",
                    filename = filename,
                    error = %err
                );
            }
        }
    }

    let bytes = archive::encode(&manifest, &embedded)?;
    info!(
        target: "tatib",
        event = "backup_created",
        school_id = school_id,
        students = manifest.students.len(),
        assets = embedded.len(),
        bytes = bytes.len()
    );
    Ok(bytes)
}

fn ayat_ref(ayat: rules::Ayat) -> AyatRef {
    AyatRef {
        number: ayat.number,
        description: ayat.description,
    }
}
