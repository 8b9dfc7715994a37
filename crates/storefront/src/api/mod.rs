//! HTTP client for the bioApp order/catalog service.
//!
//! # Endpoints
//!
//! - `GET  {api}/products/` - Product catalog (array or `{results: [...]}`)
//! - `POST {api}/orders/create-checkout/` - Create an order and a hosted payment session
//! - `POST {api}/payments/confirm-intent/` - Confirm an in-app payment intent
//! - `POST {api}/auth/register/` - Create a buyer account
//! - `POST {api}/token/` - Exchange credentials for access/refresh tokens
//! - `POST {api}/auth/password/reset/` - Email a password reset link
//! - `POST {api}/auth/password/reset/confirm/` - Set a new password from a reset link
//!
//! The service is loose about field names, so responses are decoded through
//! [`wire`], which accepts every alias the backend has been seen to emit.

pub mod wire;

use std::future::Future;
use std::sync::Arc;

use bioapp_core::{Email, OrderId, PaymentIntentId, ProductId};
use reqwest::Method;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::catalog::Product;
use crate::config::ApiConfig;

/// Errors that can occur when talking to the order/catalog service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never completed (connection refused, timeout, TLS...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {}", .detail.as_deref().unwrap_or("no detail provided"))]
    Status {
        status: u16,
        /// Server-provided `detail`/`error` message, if any.
        detail: Option<String>,
    },

    /// The response body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The response was JSON but lacked a required field.
    #[error("Response missing field: {0}")]
    MissingField(&'static str),
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// One line of an order-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutItem {
    #[serde(rename = "productId")]
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Body of `POST /orders/create-checkout/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub full_name: String,
    pub email: String,
    pub address: String,
    /// Amount to charge in MXN, rounded to centavos.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Hosted payment session returned by order creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// URL of the hosted payment page. The service may omit it on failure paths.
    pub checkout_url: Option<String>,
    /// Server-side order ID, when the service returns one.
    pub order_id: Option<OrderId>,
}

#[derive(Debug, Serialize)]
struct ConfirmIntentRequest<'a> {
    payment_intent_id: &'a PaymentIntentId,
    order_id: &'a OrderId,
}

/// A new buyer account.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub password: SecretString,
}

/// A password reset link's `uid`/`token` pair and the new password.
#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub uid: String,
    pub token: SecretString,
    pub new_password: SecretString,
}

/// Bearer tokens issued by `POST /token/`.
///
/// Implements `Debug` manually to redact both tokens.
#[derive(Clone)]
pub struct AuthTokens {
    pub access: SecretString,
    pub refresh: Option<SecretString>,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    password: &'a str,
    password2: &'a str,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ResetRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct ResetConfirmRequest<'a> {
    uid: &'a str,
    token: &'a str,
    new_password: &'a str,
}

// =============================================================================
// StoreApi seam
// =============================================================================

/// Operations the storefront needs from the remote service.
///
/// [`ApiClient`] is the production implementation; tests substitute fakes.
pub trait StoreApi {
    /// Fetch the full product catalog.
    fn fetch_products(&self) -> impl Future<Output = Result<Vec<Product>, ApiError>> + Send;

    /// Create an order and a hosted payment session for it.
    fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> impl Future<Output = Result<CheckoutSession, ApiError>> + Send;

    /// Ask the service whether an in-app payment intent has been paid.
    fn confirm_payment_intent(
        &self,
        payment_intent_id: &PaymentIntentId,
        order_id: &OrderId,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;
}

/// Account operations on the remote service.
///
/// Kept apart from [`StoreApi`] so catalog and checkout code never needs
/// credentials.
pub trait AccountApi {
    /// Create an account.
    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Exchange a username (the buyer's email) and password for tokens.
    fn obtain_tokens(
        &self,
        username: &str,
        password: &SecretString,
    ) -> impl Future<Output = Result<AuthTokens, ApiError>> + Send;

    /// Ask the service to email a password reset link.
    fn request_password_reset(&self, email: &Email) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Set a new password using a reset link.
    fn confirm_password_reset(
        &self,
        reset: &PasswordReset,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the bioApp order/catalog REST service.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.base_url.clone(),
                token: config.token.clone(),
            }),
        })
    }

    /// A client that sends `token` instead of the configured one.
    #[must_use]
    pub fn with_bearer(&self, token: &SecretString) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                client: self.inner.client.clone(),
                base_url: self.inner.base_url.clone(),
                token: Some(token.clone()),
            }),
        }
    }

    /// The base URL every endpoint path is appended to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.inner.base_url);
        let builder = self
            .inner
            .client
            .request(method, url)
            .header("Accept", "application/json");

        match &self.inner.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Send a request and decode the JSON body of a successful response.
    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<serde_json::Value, ApiError> {
        let response = builder.send().await?;
        let status = response.status();

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                body = %response_text.chars().take(500).collect::<String>(),
                "Order service returned non-success status"
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: wire::error_detail(&response_text),
            });
        }

        if response_text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %response_text.chars().take(500).collect::<String>(),
                "Failed to parse order service response"
            );
            ApiError::Parse(e)
        })
    }
}

impl StoreApi for ApiClient {
    #[instrument(skip(self), fields(base_url = %self.inner.base_url))]
    async fn fetch_products(&self) -> Result<Vec<Product>, ApiError> {
        let body = self.execute(self.request(Method::GET, "/products/")).await?;
        let products = wire::parse_products(&body)?;
        debug!(count = products.len(), "Fetched catalog");
        Ok(products)
    }

    #[instrument(skip(self, request), fields(items = request.items.len(), amount = %request.amount))]
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ApiError> {
        let body = self
            .execute(self.request(Method::POST, "/orders/create-checkout/").json(request))
            .await?;
        Ok(wire::parse_checkout_session(&body))
    }

    #[instrument(skip(self))]
    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &PaymentIntentId,
        order_id: &OrderId,
    ) -> Result<bool, ApiError> {
        let request = ConfirmIntentRequest {
            payment_intent_id,
            order_id,
        };
        let body = self
            .execute(self.request(Method::POST, "/payments/confirm-intent/").json(&request))
            .await?;
        Ok(body
            .get("paid")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }
}

impl AccountApi for ApiClient {
    #[instrument(skip(self, registration), fields(email = %registration.email))]
    async fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        let password = registration.password.expose_secret();
        let request = RegisterRequest {
            username: &registration.username,
            email: registration.email.as_str(),
            first_name: &registration.first_name,
            last_name: &registration.last_name,
            password,
            password2: password,
        };
        self.execute(self.request(Method::POST, "/auth/register/").json(&request))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, password))]
    async fn obtain_tokens(&self, username: &str, password: &SecretString) -> Result<AuthTokens, ApiError> {
        let request = TokenRequest {
            username,
            password: password.expose_secret(),
        };
        let body = self
            .execute(self.request(Method::POST, "/token/").json(&request))
            .await?;
        wire::parse_tokens(&body)
    }

    #[instrument(skip(self))]
    async fn request_password_reset(&self, email: &Email) -> Result<(), ApiError> {
        let request = ResetRequest {
            email: email.as_str(),
        };
        self.execute(self.request(Method::POST, "/auth/password/reset/").json(&request))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, reset), fields(uid = %reset.uid))]
    async fn confirm_password_reset(&self, reset: &PasswordReset) -> Result<(), ApiError> {
        let request = ResetConfirmRequest {
            uid: &reset.uid,
            token: reset.token.expose_secret(),
            new_password: reset.new_password.expose_secret(),
        };
        self.execute(self.request(Method::POST, "/auth/password/reset/confirm/").json(&request))
            .await?;
        Ok(())
    }
}
