//! Integration tests for the bioApp storefront engine.
//!
//! Every test runs against a [`wiremock`] order service, so no network access
//! or running backend is needed:
//!
//! ```bash
//! cargo test -p bioapp-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `catalog_fetch` - Catalog loading and refresh against the service
//! - `checkout_flow` - Cart to hosted payment page to loopback return
//! - `in_app_payment` - Card-form messages and intent confirmation

use std::sync::{Arc, Mutex, PoisonError};

use bioapp_storefront::api::ApiClient;
use bioapp_storefront::checkout::UrlOpener;
use bioapp_storefront::config::ApiConfig;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Catalog served by [`mount_catalog`], in the service's legacy field names.
#[must_use]
pub fn catalog_body() -> Value {
    json!({
        "results": [
            {"ID_PRODUCTO": 1, "PROD_NOMBRE": "Proteína Vegana", "PROD_PRECIO_PUB": "39.99", "STOCK_PROD": 5, "PROD_CATEGORIA": "Proteínas"},
            {"ID_PRODUCTO": 2, "PROD_NOMBRE": "Omega 3", "PROD_PRECIO_PUB": 24.50, "STOCK_PROD": "3", "PROD_CATEGORIA": "Aceites"},
            {"ID_PRODUCTO": 3, "PROD_NOMBRE": "Colágeno", "PROD_PRECIO_PUB": "$65.00", "STOCK_PROD": 0, "PROD_CATEGORIA": "Proteínas"}
        ]
    })
}

/// Start a mock order service that serves [`catalog_body`] at `/api/products/`.
pub async fn mount_catalog() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/products/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
        .mount(&server)
        .await;
    server
}

/// Client for the mock service's `/api` root.
///
/// # Panics
///
/// Panics if the HTTP client cannot be built.
#[must_use]
#[allow(clippy::expect_used)]
pub fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&ApiConfig::new(&format!("{}/api/", server.uri())))
        .expect("client builds for mock server")
}

/// Records every URL it is asked to open instead of launching a browser.
#[derive(Debug, Clone, Default)]
pub struct RecordingOpener {
    opened: Arc<Mutex<Vec<String>>>,
}

impl RecordingOpener {
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UrlOpener for RecordingOpener {
    fn open_url(&self, url: &str) -> std::io::Result<()> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }
}
