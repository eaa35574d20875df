mod util;

use tempfile::TempDir;

use tatib_lib::assets::AssetStore;
use tatib_lib::backup::{create_backup, restore_backup};
use tatib_lib::violations::NewViolation;
use tatib_lib::{categories, classrooms, rules, schools, students, violations};

const EVENT_MS: i64 = 1_750_000_000_123;

/// One rule with two ayats, one category, one student with one violation
/// citing both ayats and one photo: exporting and importing into an empty
/// tenant reproduces everything, timestamps included.
#[tokio::test]
async fn round_trip_into_empty_tenant() {
    let pool_a = util::temp_pool().await;
    let school_a = util::bare_school(&pool_a, "SMP Asal").await;
    let dir_a = TempDir::new().unwrap();
    let store_a = AssetStore::new(dir_a.path());

    let rule = rules::add_rule(&pool_a, &school_a.id, "Pasal 1", "Ketertiban Umum")
        .await
        .unwrap();
    let ayat_1 = rules::add_ayat(&pool_a, &school_a.id, &rule.id, Some("1"), "Datang terlambat")
        .await
        .unwrap();
    let ayat_2 = rules::add_ayat(&pool_a, &school_a.id, &rule.id, Some("2"), "Membolos")
        .await
        .unwrap();
    let category = categories::add(&pool_a, &school_a.id, "Ringan", 5)
        .await
        .unwrap();
    let classroom = classrooms::create(&pool_a, &school_a.id, "7A").await.unwrap();
    let student = students::create(&pool_a, &school_a.id, "Budi", "1001", Some(&classroom.id))
        .await
        .unwrap();

    store_a.write("bukti1.jpg", b"jpeg bytes").unwrap();
    store_a.write("logo_a.png", b"png bytes").unwrap();
    schools::update_profile(&pool_a, &school_a.id, None, None, Some("logo_a.png"))
        .await
        .unwrap();

    violations::record_violation(
        &pool_a,
        &school_a.id,
        NewViolation {
            student_id: student.id.clone(),
            description: "Terlambat apel pagi".into(),
            category_id: Some(category.id.clone()),
            rule_id: Some(rule.id.clone()),
            ayat_ids: vec![ayat_1.id.clone(), ayat_2.id.clone()],
            photos: vec!["bukti1.jpg".into()],
            reported_by: Some("Pak Harun".into()),
            date_posted: Some(EVENT_MS),
        },
    )
    .await
    .unwrap();

    let archive = create_backup(&pool_a, &store_a, &school_a.id).await.unwrap();

    let pool_b = util::temp_pool().await;
    let school_b = util::bare_school(&pool_b, "SMP Tujuan").await;
    let dir_b = TempDir::new().unwrap();
    let store_b = AssetStore::new(dir_b.path());

    let summary = restore_backup(&pool_b, &store_b, &school_b.id, &archive)
        .await
        .unwrap();
    assert_eq!(summary.students_created, 1);
    assert_eq!(summary.violations_created, 1);
    assert!(summary.locked_members.is_empty());

    let school_b = schools::get(&pool_b, &school_b.id).await.unwrap().unwrap();
    assert_eq!(school_b.name, "SMP Asal");
    assert_eq!(school_b.logo.as_deref(), Some("logo_a.png"));
    assert!(store_b.exists("logo_a.png").unwrap());

    let restored_rules = rules::rules_with_ayats(&pool_b, &school_b.id).await.unwrap();
    assert_eq!(restored_rules.len(), 1);
    assert_eq!(restored_rules[0].rule.code, "Pasal 1");
    assert_eq!(restored_rules[0].ayats.len(), 2);

    let restored_categories = categories::list(&pool_b, &school_b.id).await.unwrap();
    assert_eq!(restored_categories.len(), 1);
    assert_eq!(restored_categories[0].points, 5);

    assert_eq!(classrooms::list(&pool_b, &school_b.id).await.unwrap().len(), 1);

    let roster = students::list(&pool_b, &school_b.id).await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].nis, "1001");
    assert!(roster[0].classroom_id.is_some());

    let record = violations::history(&pool_b, &school_b.id, &roster[0].id)
        .await
        .unwrap();
    assert_eq!(record.len(), 1);
    let violation = &record[0];
    assert_eq!(violation.date_posted, EVENT_MS);
    assert_eq!(violation.points, 5);
    assert_eq!(violation.pasal.as_deref(), Some("Pasal 1 - Ketertiban Umum"));
    assert_eq!(violation.category.as_deref(), Some("Ringan"));
    assert_eq!(violation.reported_by.as_deref(), Some("Pak Harun"));
    assert!(!violation.is_remitted);

    let cited = violations::ayats_of(&pool_b, &violation.id).await.unwrap();
    assert_eq!(cited.len(), 2);

    let photos = violations::photos_of(&pool_b, &violation.id).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].filename, "bukti1.jpg");
    assert!(store_b.exists("bukti1.jpg").unwrap());
}

/// A photo that vanished from disk before the export still yields a valid
/// archive, and the import records the photo row without a backing file.
#[tokio::test]
async fn missing_asset_tolerated_both_ways() {
    let pool_a = util::temp_pool().await;
    let school_a = util::bare_school(&pool_a, "SMP Asal").await;
    let dir_a = TempDir::new().unwrap();
    let store_a = AssetStore::new(dir_a.path());

    let student = students::create(&pool_a, &school_a.id, "Sari", "1002", None)
        .await
        .unwrap();
    violations::record_violation(
        &pool_a,
        &school_a.id,
        NewViolation {
            student_id: student.id.clone(),
            description: "Seragam tidak lengkap".into(),
            photos: vec!["hilang.jpg".into()],
            date_posted: Some(EVENT_MS),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // "hilang.jpg" was never written to the store.
    let archive = create_backup(&pool_a, &store_a, &school_a.id).await.unwrap();

    let pool_b = util::temp_pool().await;
    let school_b = util::bare_school(&pool_b, "SMP Tujuan").await;
    let dir_b = TempDir::new().unwrap();
    let store_b = AssetStore::new(dir_b.path());

    let summary = restore_backup(&pool_b, &store_b, &school_b.id, &archive)
        .await
        .unwrap();
    assert_eq!(summary.violations_created, 1);

    let roster = students::list(&pool_b, &school_b.id).await.unwrap();
    let record = violations::history(&pool_b, &school_b.id, &roster[0].id)
        .await
        .unwrap();
    let photos = violations::photos_of(&pool_b, &record[0].id).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].filename, "hilang.jpg");
    assert!(!store_b.exists("hilang.jpg").unwrap());
}
