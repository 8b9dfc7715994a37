//! Product catalog.
//!
//! The catalog is fetched as a whole and swapped in atomically: readers hold
//! an `Arc<Catalog>` snapshot, so a refresh that lands mid-computation only
//! becomes visible on their next [`CatalogStore::snapshot`] call.
//!
//! A [`CatalogRefresher`] owns at most one in-flight fetch. Starting a new
//! fetch or dropping the refresher aborts the previous one.

pub mod filter;

use std::collections::HashMap;
use std::sync::Arc;

use bioapp_core::{Price, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{ApiError, StoreApi};

pub use filter::{CatalogFilter, PriceRange};

/// Name given to cart lines whose product has left the catalog.
pub const UNAVAILABLE_PRODUCT: &str = "Unavailable product";

/// A purchasable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    pub stock: u32,
    pub category: Option<String>,
    pub image: Option<String>,
}

impl Product {
    /// Zero-price stand-in for a product the catalog no longer knows about.
    #[must_use]
    pub fn placeholder(id: ProductId) -> Self {
        Self {
            id,
            name: UNAVAILABLE_PRODUCT.to_string(),
            price: Price::ZERO,
            stock: 0,
            category: None,
            image: None,
        }
    }

    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

// =============================================================================
// Catalog snapshot
// =============================================================================

/// An immutable list of products with an id index.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
    index: HashMap<ProductId, usize>,
}

impl Catalog {
    /// Build a catalog. When an id repeats, the first occurrence wins.
    #[must_use]
    pub fn new(products: Vec<Product>) -> Self {
        let mut index = HashMap::with_capacity(products.len());
        for (position, product) in products.iter().enumerate() {
            if index.contains_key(&product.id) {
                warn!(product_id = %product.id, "Duplicate product id in catalog; keeping first");
                continue;
            }
            index.insert(product.id.clone(), position);
        }
        Self { products, index }
    }

    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<&Product> {
        self.index.get(id).and_then(|&i| self.products.get(i))
    }

    #[must_use]
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Distinct categories, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self
            .products
            .iter()
            .filter_map(|p| p.category.as_deref())
            .collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }

    /// Products matching `filter`, in catalog order.
    #[must_use]
    pub fn search(&self, filter: &CatalogFilter) -> Vec<&Product> {
        self.products.iter().filter(|p| filter.matches(p)).collect()
    }
}

// =============================================================================
// CatalogStore
// =============================================================================

/// Shared handle to the current catalog snapshot.
///
/// Cloning the store is cheap; all clones see the same snapshot.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    current: Arc<watch::Sender<Arc<Catalog>>>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CatalogStore {
    #[must_use]
    pub fn new(products: Vec<Product>) -> Self {
        let (current, _) = watch::channel(Arc::new(Catalog::new(products)));
        Self {
            current: Arc::new(current),
        }
    }

    /// The catalog as of now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.current.borrow())
    }

    /// Replace the whole product list in one swap.
    pub fn replace(&self, products: Vec<Product>) {
        let catalog = Catalog::new(products);
        debug!(count = catalog.len(), "Catalog replaced");
        self.current.send_replace(Arc::new(catalog));
    }

    /// Watch for catalog swaps.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Catalog>> {
        self.current.subscribe()
    }
}

// =============================================================================
// CatalogRefresher
// =============================================================================

/// Errors from a catalog refresh.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Catalog fetch failed: {0}")]
    Api(#[from] ApiError),

    /// A newer fetch replaced this one, or the refresher was dropped.
    #[error("Catalog fetch cancelled")]
    Cancelled,

    #[error("Catalog fetch task failed: {0}")]
    Task(String),
}

/// Runs catalog fetches in the background, one at a time.
pub struct CatalogRefresher<S> {
    api: S,
    store: CatalogStore,
    in_flight: Option<JoinHandle<Result<usize, ApiError>>>,
}

impl<S> CatalogRefresher<S>
where
    S: StoreApi + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub const fn new(api: S, store: CatalogStore) -> Self {
        Self {
            api,
            store,
            in_flight: None,
        }
    }

    /// Start a fetch, cancelling any fetch already in flight.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        self.cancel();

        let api = self.api.clone();
        let store = self.store.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let products = api.fetch_products().await?;
            let count = products.len();
            store.replace(products);
            Ok::<_, ApiError>(count)
        }));
    }

    /// Whether a fetch is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the in-flight fetch, if any. The catalog is left untouched.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            if !handle.is_finished() {
                debug!("Cancelling in-flight catalog fetch");
            }
            handle.abort();
        }
    }

    /// Wait for the in-flight fetch and report how many products it loaded.
    ///
    /// Returns `None` if no fetch was started.
    pub async fn finish(&mut self) -> Option<Result<usize, RefreshError>> {
        let handle = self.in_flight.take()?;
        let result = match handle.await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(e)) => {
                warn!(error = %e, "Catalog fetch failed; keeping previous catalog");
                Err(RefreshError::Api(e))
            }
            Err(e) if e.is_cancelled() => Err(RefreshError::Cancelled),
            Err(e) => Err(RefreshError::Task(e.to_string())),
        };
        Some(result)
    }

    /// Start a fetch and wait for it.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError` if the fetch fails; the previous catalog stays
    /// in place.
    pub async fn refresh(&mut self) -> Result<usize, RefreshError> {
        self.start();
        self.finish().await.unwrap_or(Err(RefreshError::Cancelled))
    }
}

impl<S> Drop for CatalogRefresher<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}
