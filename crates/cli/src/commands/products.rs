//! List the catalog.

use bioapp_storefront::catalog::CatalogFilter;
use bioapp_storefront::config::StorefrontConfig;

/// Fetch the catalog and log every product matching `filter`.
pub async fn list(
    config: &StorefrontConfig,
    filter: &CatalogFilter,
    show_categories: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, store) = super::load_catalog(config).await?;
    let catalog = store.snapshot();

    if show_categories {
        tracing::info!(categories = ?catalog.categories(), "Categories");
    }

    let matches = catalog.search(filter);
    if matches.is_empty() {
        tracing::info!("No products match");
        return Ok(());
    }

    for product in &matches {
        tracing::info!(
            id = %product.id,
            price = %product.price.display_mxn(),
            stock = product.stock,
            category = product.category.as_deref().unwrap_or("-"),
            "{}",
            product.name
        );
    }
    tracing::info!(shown = matches.len(), total = catalog.len(), "Done");

    Ok(())
}
