//! Round-trip tests for the search store.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use sqlx::PgPool;

use dirsync_common::SearchSpec;
use dirsync_engine::SpecStore;
use dirsync_store::SearchStore;

async fn test_store() -> Option<SearchStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = SearchStore::new(pool.clone());
    store.migrate().await.ok()?;
    sqlx::query("TRUNCATE searches").execute(&pool).await.ok()?;
    Some(store)
}

fn spec(id: &str, refresh: u64) -> SearchSpec {
    SearchSpec {
        id: id.to_string(),
        filter: "(objectClass=person)".to_string(),
        refresh,
        base_dn: Some("ou=u,dc=x".to_string()),
        oneshot: false,
    }
}

#[tokio::test]
async fn upsert_load_delete_round_trip() {
    let Some(store) = test_store().await else {
        return;
    };

    store.upsert(&spec("a", 10)).await.unwrap();
    store.upsert(&spec("b", 20)).await.unwrap();

    let mut loaded = store.load_all().await.unwrap();
    loaded.sort_by(|x, y| x.id.cmp(&y.id));
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], spec("a", 10));
    assert_eq!(loaded[1], spec("b", 20));

    store.remove("a").await.unwrap();
    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "b");
}

#[tokio::test]
async fn upsert_replaces_existing_row() {
    let Some(store) = test_store().await else {
        return;
    };

    store.upsert(&spec("a", 10)).await.unwrap();
    let mut updated = spec("a", 99);
    updated.base_dn = None;
    updated.oneshot = true;
    store.upsert(&updated).await.unwrap();

    let loaded = store.load_all().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0], updated);
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let Some(store) = test_store().await else {
        return;
    };
    store.migrate().await.unwrap();
    store.migrate().await.unwrap();
}

#[tokio::test]
async fn remove_of_unknown_id_is_a_no_op() {
    let Some(store) = test_store().await else {
        return;
    };
    store.remove("missing").await.unwrap();
}
