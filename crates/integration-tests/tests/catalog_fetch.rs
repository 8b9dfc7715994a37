//! Integration tests for loading the catalog from the order service.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use bioapp_core::{Price, ProductId};
use bioapp_integration_tests::{client_for, mount_catalog};
use bioapp_storefront::catalog::{
    CatalogFilter, CatalogRefresher, CatalogStore, PriceRange, RefreshError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_refresh_loads_legacy_catalog() {
    let server = mount_catalog().await;
    let store = CatalogStore::default();
    let mut refresher = CatalogRefresher::new(client_for(&server), store.clone());

    assert_eq!(refresher.refresh().await.unwrap(), 3);

    let catalog = store.snapshot();
    let omega = catalog.get(&ProductId::new("2")).unwrap();
    assert_eq!(omega.name, "Omega 3");
    assert_eq!(omega.price, Price::from_cents(2450));
    assert_eq!(omega.stock, 3);

    let colageno = catalog.get(&ProductId::new("3")).unwrap();
    assert_eq!(colageno.price, Price::from_cents(6500));
    assert!(!colageno.in_stock());
}

#[tokio::test]
async fn test_subscribers_see_refreshed_catalog() {
    let server = mount_catalog().await;
    let store = CatalogStore::default();
    let mut updates = store.subscribe();
    let mut refresher = CatalogRefresher::new(client_for(&server), store.clone());

    refresher.refresh().await.unwrap();

    updates.changed().await.unwrap();
    assert_eq!(updates.borrow().len(), 3);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_catalog() {
    let seeded = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products/"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&seeded)
        .await;

    let store = CatalogStore::default();
    let mut first = CatalogRefresher::new(client_for(&mount_catalog().await), store.clone());
    first.refresh().await.unwrap();

    let mut failing = CatalogRefresher::new(client_for(&seeded), store.clone());
    let err = failing.refresh().await.unwrap_err();

    assert!(matches!(err, RefreshError::Api(_)));
    assert_eq!(store.snapshot().len(), 3);
}

// =============================================================================
// Browsing
// =============================================================================

#[tokio::test]
async fn test_search_and_filters_over_fetched_catalog() {
    let server = mount_catalog().await;
    let store = CatalogStore::default();
    CatalogRefresher::new(client_for(&server), store.clone())
        .refresh()
        .await
        .unwrap();
    let catalog = store.snapshot();

    assert_eq!(catalog.categories(), vec!["Aceites", "Proteínas"]);

    let proteins = catalog.search(&CatalogFilter {
        category: Some("Proteínas".to_string()),
        ..CatalogFilter::default()
    });
    assert_eq!(proteins.len(), 2);

    let cheap = catalog.search(&CatalogFilter {
        price_range: Some(PriceRange::Under30),
        ..CatalogFilter::default()
    });
    assert_eq!(cheap.len(), 1);
    assert_eq!(cheap[0].name, "Omega 3");

    let by_name = catalog.search(&CatalogFilter {
        query: "VEGANA".to_string(),
        ..CatalogFilter::default()
    });
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].id.as_str(), "1");
}
