mod util;

use std::collections::BTreeMap;

use tempfile::TempDir;

use tatib_lib::assets::AssetStore;
use tatib_lib::backup::manifest::{
    AyatRef, BackupManifest, CategoryEntry, ClassroomEntry, MemberEntry, RuleEntry, SchoolSection,
    SettingsSection, StudentEntry, ViolationEntry,
};
use tatib_lib::backup::{encode, restore_backup};
use tatib_lib::users;

fn sample_manifest() -> BackupManifest {
    BackupManifest {
        school: SchoolSection {
            name: "SMP Asal".into(),
            address: Some("Jl. Kenanga 3".into()),
            logo: None,
        },
        export_timestamp: "2026-02-01T06:00:00.000Z".into(),
        settings: SettingsSection {
            members: vec![MemberEntry {
                username: "guru1".into(),
                full_name: Some("Bu Rina".into()),
            }],
            rules: vec![RuleEntry {
                code: "Pasal 9".into(),
                description: "Kedisiplinan".into(),
                ayats: vec![AyatRef {
                    number: Some("1".into()),
                    description: "Tidak memakai atribut".into(),
                }],
            }],
            categories: vec![CategoryEntry {
                name: "Sedang".into(),
                points: 15,
            }],
            classrooms: vec![ClassroomEntry { name: "8B".into() }],
        },
        students: vec![
            StudentEntry {
                name: "Andi".into(),
                nis: "2001".into(),
                classroom: Some("8B".into()),
                violations: vec![ViolationEntry {
                    date: "2026-01-10T07:30:00.000Z".into(),
                    description: "Tidak memakai dasi".into(),
                    points: 15,
                    pasal: Some("Pasal 9 - Kedisiplinan".into()),
                    kategori: Some("Sedang".into()),
                    reporter: Some("Bu Rina".into()),
                    is_remitted: false,
                    remission_reason: None,
                    ayats: vec![AyatRef {
                        number: Some("1".into()),
                        description: "Tidak memakai atribut".into(),
                    }],
                    photos: vec![],
                }],
            },
            // Same name, different NIS: a distinct person.
            StudentEntry {
                name: "Andi".into(),
                nis: "2002".into(),
                classroom: Some("8B".into()),
                violations: vec![],
            },
        ],
    }
}

async fn table_counts(pool: &sqlx::SqlitePool, school_id: &str) -> (i64, i64, i64, i64, i64, i64) {
    (
        util::count(pool, "SELECT COUNT(*) FROM violation_rules WHERE school_id = ?", school_id).await,
        util::count(
            pool,
            "SELECT COUNT(*) FROM ayats WHERE rule_id IN (SELECT id FROM violation_rules WHERE school_id = ?)",
            school_id,
        )
        .await,
        util::count(pool, "SELECT COUNT(*) FROM violation_categories WHERE school_id = ?", school_id).await,
        util::count(pool, "SELECT COUNT(*) FROM classrooms WHERE school_id = ?", school_id).await,
        util::count(pool, "SELECT COUNT(*) FROM students WHERE school_id = ?", school_id).await,
        util::count(
            pool,
            "SELECT COUNT(*) FROM violations WHERE student_id IN (SELECT id FROM students WHERE school_id = ?)",
            school_id,
        )
        .await,
    )
}

#[tokio::test]
async fn importing_twice_creates_nothing_new() {
    let pool = util::temp_pool().await;
    let school = util::bare_school(&pool, "SMP Tujuan").await;
    let dir = TempDir::new().unwrap();
    let store = AssetStore::new(dir.path());

    let archive = encode(&sample_manifest(), &BTreeMap::new()).unwrap();

    let first = restore_backup(&pool, &store, &school.id, &archive).await.unwrap();
    assert_eq!(first.students_created, 2);
    assert_eq!(first.violations_created, 1);
    assert_eq!(first.locked_members.len(), 1);
    let after_first = table_counts(&pool, &school.id).await;
    assert_eq!(after_first, (1, 1, 1, 1, 2, 1));

    let second = restore_backup(&pool, &store, &school.id, &archive).await.unwrap();
    assert_eq!(second.students_created, 0);
    assert_eq!(second.violations_created, 0);
    assert!(second.locked_members.is_empty());
    assert_eq!(table_counts(&pool, &school.id).await, after_first);

    let members: i64 =
        util::count(&pool, "SELECT COUNT(*) FROM users WHERE school_id = ?", &school.id).await;
    assert_eq!(members, 1);
}

#[tokio::test]
async fn students_are_matched_by_nis_not_name() {
    let pool = util::temp_pool().await;
    let school = util::bare_school(&pool, "SMP Tujuan").await;
    let dir = TempDir::new().unwrap();
    let store = AssetStore::new(dir.path());

    let archive = encode(&sample_manifest(), &BTreeMap::new()).unwrap();
    restore_backup(&pool, &store, &school.id, &archive).await.unwrap();

    let names: Vec<(String, String)> =
        sqlx::query_as("SELECT name, nis FROM students WHERE school_id = ? ORDER BY nis")
            .bind(&school.id)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(
        names,
        vec![
            ("Andi".to_string(), "2001".to_string()),
            ("Andi".to_string(), "2002".to_string())
        ]
    );
}

#[tokio::test]
async fn restored_member_is_locked_until_token_reset() {
    let pool = util::temp_pool().await;
    let school = util::bare_school(&pool, "SMP Tujuan").await;
    let dir = TempDir::new().unwrap();
    let store = AssetStore::new(dir.path());

    let archive = encode(&sample_manifest(), &BTreeMap::new()).unwrap();
    let summary = restore_backup(&pool, &store, &school.id, &archive).await.unwrap();
    let locked = &summary.locked_members[0];
    assert_eq!(locked.username, "guru1");

    // No credential exists yet, so nothing authenticates.
    assert!(users::authenticate(&pool, "guru1", "").await.unwrap().is_none());
    assert!(users::authenticate(&pool, "guru1", "guru123").await.unwrap().is_none());

    assert!(
        users::redeem_reset_token(&pool, "guru1", &locked.reset_token, "barubanget9")
            .await
            .unwrap()
    );
    // The token is single-use.
    assert!(
        !users::redeem_reset_token(&pool, "guru1", &locked.reset_token, "lagi")
            .await
            .unwrap()
    );

    let member = users::authenticate(&pool, "guru1", "barubanget9")
        .await
        .unwrap()
        .expect("unlocked member authenticates");
    assert!(!member.must_reset_password);
}
