mod util;

use tatib_lib::users;

#[tokio::test]
async fn first_admin_can_authenticate() {
    let pool = util::temp_pool().await;
    util::seed_school(&pool, "SMP 1", "admin1").await;

    let member = users::authenticate(&pool, "admin1", "rahasia123")
        .await
        .unwrap()
        .expect("seeded admin authenticates");
    assert_eq!(member.role, "school_admin");
    assert!(member.school_id.is_some());

    assert!(users::authenticate(&pool, "admin1", "salah").await.unwrap().is_none());
    assert!(users::authenticate(&pool, "nobody", "rahasia123").await.unwrap().is_none());
}

#[tokio::test]
async fn usernames_are_globally_unique() {
    let pool = util::temp_pool().await;
    let school_1 = util::seed_school(&pool, "SMP 1", "admin1").await;
    let school_2 = util::seed_school(&pool, "SMP 2", "admin2").await;

    users::add_member(&pool, &school_1.id, "guru1", Some("Bu Rina"), "pw12345")
        .await
        .unwrap();
    // Taken even from another school.
    let err = users::add_member(&pool, &school_2.id, "guru1", None, "pw12345")
        .await
        .unwrap_err();
    assert_eq!(err.code(), users::ERR_USERNAME_TAKEN);
}

#[tokio::test]
async fn members_cannot_delete_themselves() {
    let pool = util::temp_pool().await;
    let school = util::seed_school(&pool, "SMP 1", "admin1").await;
    let admin = users::find_by_username(&pool, "admin1").await.unwrap().unwrap();
    let other = users::add_member(&pool, &school.id, "guru1", None, "pw12345")
        .await
        .unwrap();

    let err = users::delete_member(&pool, &school.id, &admin.id, &admin.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), users::ERR_SELF_DELETE);

    users::delete_member(&pool, &school.id, &admin.id, &other.id)
        .await
        .unwrap();
    assert!(users::find_by_username(&pool, "guru1").await.unwrap().is_none());
}

#[tokio::test]
async fn password_reset_replaces_the_credential() {
    let pool = util::temp_pool().await;
    let school = util::seed_school(&pool, "SMP 1", "admin1").await;
    let member = users::add_member(&pool, &school.id, "guru1", None, "lamabanget")
        .await
        .unwrap();

    users::set_password(&pool, &school.id, &member.id, "barubanget")
        .await
        .unwrap();
    assert!(users::authenticate(&pool, "guru1", "lamabanget").await.unwrap().is_none());
    assert!(users::authenticate(&pool, "guru1", "barubanget").await.unwrap().is_some());
}
