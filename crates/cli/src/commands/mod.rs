//! Subcommand implementations.

pub mod checkout;
pub mod classify;
pub mod products;
pub mod quote;

use bioapp_storefront::api::ApiClient;
use bioapp_storefront::catalog::{CatalogRefresher, CatalogStore};
use bioapp_storefront::config::StorefrontConfig;

/// Fetch the catalog once and return the client alongside the loaded store.
pub async fn load_catalog(
    config: &StorefrontConfig,
) -> Result<(ApiClient, CatalogStore), Box<dyn std::error::Error>> {
    let api = ApiClient::new(&config.api)?;
    let store = CatalogStore::default();

    let mut refresher = CatalogRefresher::new(api.clone(), store.clone());
    let count = refresher.refresh().await?;
    tracing::info!(count, base_url = api.base_url(), "Catalog loaded");

    Ok((api, store))
}
