use gator_core::models::SaveOutcome;
use gator_core::testutil::make_product;
use gator_core::traits::ProductStore;
use gator_db::ProductRepository;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn save_creates_then_updates() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let mut product = make_product("gmk-olivia", 2);
    product.tags = ["keycaps".to_string(), "gmk".to_string()].into();
    product.images = vec!["https://cdn.test/a.jpg".into(), "https://cdn.test/b.jpg".into()];
    product.metadata.insert("vendor".into(), "GMK".into());

    assert_eq!(repo.save("r1", &product).await.unwrap(), SaveOutcome::Created);
    assert_eq!(repo.save("r1", &product).await.unwrap(), SaveOutcome::Updated);
    assert_eq!(repo.count_for_reseller("r1").await.unwrap(), 1);

    let stored = repo
        .find("MOCK", "gmk-olivia", "r1")
        .await
        .unwrap()
        .expect("product stored");
    assert_eq!(stored.name, product.name);
    assert_eq!(stored.variants, product.variants);
    assert_eq!(stored.images, product.images);
    assert_eq!(stored.tags, product.tags);
    assert_eq!(stored.metadata.get("vendor").map(String::as_str), Some("GMK"));
}

#[tokio::test]
async fn save_replaces_variants_wholesale() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    repo.save("r1", &make_product("epbt-kuro", 3)).await.unwrap();

    let mut rescraped = make_product("epbt-kuro", 1);
    rescraped.variants[0].price = 4999.0;
    rescraped.variants[0].available = false;
    repo.save("r1", &rescraped).await.unwrap();

    let stored = repo.find("MOCK", "epbt-kuro", "r1").await.unwrap().unwrap();
    assert_eq!(stored.variants.len(), 1);
    assert_eq!(stored.variants[0].price, 4999.0);
    assert!(!stored.variants[0].available);
}

#[tokio::test]
async fn same_source_id_is_distinct_per_reseller() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let product = make_product("gmk-botanical", 1);
    assert_eq!(repo.save("r1", &product).await.unwrap(), SaveOutcome::Created);
    assert_eq!(repo.save("r2", &product).await.unwrap(), SaveOutcome::Created);

    assert_eq!(repo.count_for_reseller("r1").await.unwrap(), 1);
    assert_eq!(repo.count_for_reseller("r2").await.unwrap(), 1);
}

#[tokio::test]
async fn save_rejects_missing_identity() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let mut product = make_product("x", 1);
    product.source_id.clear();
    assert!(repo.save("r1", &product).await.unwrap_err().is_validation());
    assert!(repo.save("", &make_product("y", 1)).await.unwrap_err().is_validation());
    assert!(repo.find("MOCK", "y", "").await.unwrap().is_none());
}
