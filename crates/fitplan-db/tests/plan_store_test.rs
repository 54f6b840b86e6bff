//! Integration tests for the `user_plans` and `users` query modules.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::models::{
    DietAttributes, Family, PersistedPlan, PlanAttributes, Provenance,
};
use fitplan_db::queries::plans::{self, NewPlan, PlanUpdate};
use fitplan_db::queries::users;
use fitplan_test_utils::{create_test_db, create_test_user, drop_test_db};

fn diet(calories: u32) -> PlanAttributes {
    PlanAttributes::Diet(DietAttributes {
        calories,
        protein: Some(120),
        carbs: None,
        fats: None,
        meals: vec![],
    })
}

async fn insert(
    pool: &PgPool,
    owner: Uuid,
    name: &str,
    category: &str,
    provenance: Provenance,
) -> PersistedPlan {
    let attributes = diet(2000);
    let tags = vec!["test".to_owned()];
    plans::insert_plan(
        pool,
        &NewPlan {
            owner_id: owner,
            family: Family::Diet,
            name,
            category,
            description: None,
            attributes: &attributes,
            tags: &tags,
            provenance,
            template_id: None,
        },
    )
    .await
    .expect("insert_plan should succeed")
}

/// Run `set_active_exclusive` + `set_active_pointer` in one transaction.
async fn activate(pool: &PgPool, owner: Uuid, plan_id: Uuid) {
    let now = Utc::now();
    let mut tx = pool.begin().await.unwrap();
    plans::set_active_exclusive(&mut tx, owner, Family::Diet, plan_id, now)
        .await
        .unwrap();
    users::set_active_pointer(&mut *tx, owner, Family::Diet, plan_id, now)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn insert_plan_starts_inactive() {
    let (pool, db_name) = create_test_db().await;
    let user = create_test_user(&pool).await;

    let plan = insert(&pool, user.id, "My Plan", "muscle", Provenance::Custom).await;
    assert!(!plan.is_active);
    assert!(plan.is_custom);
    assert!(!plan.is_preset);
    assert_eq!(plan.provenance(), Provenance::Custom);
    assert_eq!(plan.attributes.0, diet(2000));
    assert_eq!(plan.tags, vec!["test".to_owned()]);
    assert!(plan.last_active_update.is_none());

    let fetched = plans::get_plan(&pool, plan.id).await.unwrap().unwrap();
    assert_eq!(fetched, plan);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn find_by_identity_only_matches_materialized_presets() {
    let (pool, db_name) = create_test_db().await;
    let user = create_test_user(&pool).await;

    insert(&pool, user.id, "Keto Burn", "keto", Provenance::Custom).await;
    let found = plans::find_by_identity(&pool, user.id, "Keto Burn", "keto", Family::Diet)
        .await
        .unwrap();
    assert!(found.is_none(), "custom plans are not template instances");

    let preset = insert(&pool, user.id, "Keto Burn", "keto", Provenance::Preset).await;
    let found = plans::find_by_identity(&pool, user.id, "Keto Burn", "keto", Family::Diet)
        .await
        .unwrap()
        .expect("materialized preset should be found");
    assert_eq!(found.id, preset.id);

    let wrong_family =
        plans::find_by_identity(&pool, user.id, "Keto Burn", "keto", Family::Workout)
            .await
            .unwrap();
    assert!(wrong_family.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn set_active_exclusive_moves_the_flag() {
    let (pool, db_name) = create_test_db().await;
    let user = create_test_user(&pool).await;

    let a = insert(&pool, user.id, "A", "cut", Provenance::Custom).await;
    let b = insert(&pool, user.id, "B", "bulk", Provenance::Custom).await;

    activate(&pool, user.id, a.id).await;
    let active = plans::find_active(&pool, user.id, Family::Diet).await.unwrap();
    assert_eq!(active.map(|p| p.id), Some(a.id));

    activate(&pool, user.id, b.id).await;
    let all = plans::list_by_owner(&pool, user.id, Family::Diet).await.unwrap();
    let flags: Vec<(Uuid, bool)> = all.iter().map(|p| (p.id, p.is_active)).collect();
    assert_eq!(flags, vec![(a.id, false), (b.id, true)]);
    assert_eq!(
        plans::count_active(&pool, user.id, Family::Diet).await.unwrap(),
        1
    );

    let u = users::get_user(&pool, user.id).await.unwrap().unwrap();
    assert_eq!(u.active_diet_plan_id, Some(b.id));
    assert_eq!(u.active_workout_plan_id, None);
    assert!(u.last_active_plan_update.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn set_active_exclusive_rejects_foreign_target_and_rolls_back() {
    let (pool, db_name) = create_test_db().await;
    let alice = create_test_user(&pool).await;
    let bob = create_test_user(&pool).await;

    let mine = insert(&pool, alice.id, "Mine", "cut", Provenance::Custom).await;
    let theirs = insert(&pool, bob.id, "Theirs", "cut", Provenance::Custom).await;
    activate(&pool, alice.id, mine.id).await;

    let mut tx = pool.begin().await.unwrap();
    let result =
        plans::set_active_exclusive(&mut tx, alice.id, Family::Diet, theirs.id, Utc::now()).await;
    assert!(result.is_err());
    drop(tx);

    // The clearing statement was rolled back with the transaction.
    let active = plans::find_active(&pool, alice.id, Family::Diet).await.unwrap();
    assert_eq!(active.map(|p| p.id), Some(mine.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reactivation_refreshes_timestamp_only() {
    let (pool, db_name) = create_test_db().await;
    let user = create_test_user(&pool).await;
    let plan = insert(&pool, user.id, "A", "cut", Provenance::Custom).await;

    activate(&pool, user.id, plan.id).await;
    let first = plans::get_plan(&pool, plan.id).await.unwrap().unwrap();
    activate(&pool, user.id, plan.id).await;
    let second = plans::get_plan(&pool, plan.id).await.unwrap().unwrap();

    assert!(first.is_active && second.is_active);
    assert!(second.last_active_update > first.last_active_update);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_plan_fields_is_owner_scoped() {
    let (pool, db_name) = create_test_db().await;
    let alice = create_test_user(&pool).await;
    let bob = create_test_user(&pool).await;
    let plan = insert(&pool, alice.id, "A", "cut", Provenance::Custom).await;

    let attributes = diet(2400);
    let tags: Vec<String> = vec![];
    let update = PlanUpdate {
        name: "A2",
        category: "maintain",
        description: Some("edited"),
        attributes: &attributes,
        tags: &tags,
    };

    let denied = plans::update_plan_fields(&pool, bob.id, Family::Diet, plan.id, &update)
        .await
        .unwrap();
    assert!(denied.is_none());

    let updated = plans::update_plan_fields(&pool, alice.id, Family::Diet, plan.id, &update)
        .await
        .unwrap()
        .expect("owner can update");
    assert_eq!(updated.name, "A2");
    assert_eq!(updated.category, "maintain");
    assert_eq!(updated.description.as_deref(), Some("edited"));
    assert_eq!(updated.attributes.0, diet(2400));
    assert_eq!(updated.is_active, plan.is_active);
    assert_eq!(updated.owner_id, alice.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn set_active_pointer_requires_existing_user() {
    let (pool, db_name) = create_test_db().await;

    let result =
        users::set_active_pointer(&pool, Uuid::new_v4(), Family::Workout, Uuid::new_v4(), Utc::now())
            .await;
    assert!(result.is_err());

    let missing = users::lock_user(&pool, Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}
