//! Checkout error taxonomy with Sentry integration.
//!
//! Every failure in the checkout path is caught at the orchestration boundary
//! and turned into a [`Toast`]. None of them is fatal. Service-side failures
//! are additionally captured to Sentry before the buyer sees them.

use bioapp_core::EmailError;
use thiserror::Error;

use crate::api::ApiError;
use crate::notify::Toast;

/// A cart or buyer precondition failed. The buyer can fix it and retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Quantity {requested} of {name} exceeds stock ({available})")]
    InsufficientStock {
        name: String,
        requested: u32,
        available: u32,
    },

    #[error("No cart line is in stock")]
    NothingAvailable,

    #[error("Missing buyer field: {0}")]
    MissingBuyerField(&'static str),

    #[error("Invalid buyer email: {0}")]
    InvalidEmail(#[from] EmailError),
}

/// Errors surfaced by the checkout orchestrator.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The order-creation request never completed.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The order service rejected the request.
    #[error("Order service returned {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Server { status: u16, detail: Option<String> },

    /// The order service answered with something we could not use.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Order created, but no hosted payment URL came back.
    #[error("Order service returned no checkout URL")]
    MissingCheckoutUrl,

    /// The hosted payment page could not be opened.
    #[error("Could not open payment page: {0}")]
    Handoff(String),

    /// Another checkout is still in flight.
    #[error("A checkout is already in progress")]
    Busy,
}

impl From<ApiError> for CheckoutError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Http(e) => Self::Network(e),
            ApiError::Status { status, detail } => Self::Server { status, detail },
            ApiError::Parse(e) => Self::MalformedResponse(e.to_string()),
            ApiError::MissingField(field) => Self::MalformedResponse(format!("missing {field}")),
        }
    }
}

impl CheckoutError {
    /// Whether the failure originated outside the app and should be reported.
    #[must_use]
    pub const fn is_service_error(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Server { .. }
                | Self::MalformedResponse(_)
                | Self::MissingCheckoutUrl
                | Self::Handoff(_)
        )
    }

    /// The message shown to the buyer.
    ///
    /// Internal detail is hidden; server-provided detail is shown verbatim.
    #[must_use]
    pub fn toast(&self) -> Toast {
        match self {
            Self::Validation(err) => Toast::warning(match err {
                ValidationError::EmptyCart => "Your cart is empty".to_string(),
                ValidationError::InsufficientStock {
                    name, available, ..
                } => format!("Invalid quantity for {name}. Available: {available}"),
                ValidationError::NothingAvailable => "No products available in stock".to_string(),
                ValidationError::MissingBuyerField(field) => format!("Please enter your {field}"),
                ValidationError::InvalidEmail(_) => "Please enter a valid email address".to_string(),
            }),
            Self::Network(_) => Toast::error("Network error while creating the order"),
            Self::Server { detail, .. } => Toast::error(
                detail
                    .clone()
                    .unwrap_or_else(|| "Could not create the order".to_string()),
            ),
            Self::MalformedResponse(_) => Toast::error("Invalid response from the server"),
            Self::MissingCheckoutUrl => Toast::error("No payment URL was returned"),
            Self::Handoff(_) => Toast::error("Could not open the payment page"),
            Self::Busy => Toast::warning("A checkout is already in progress"),
        }
    }

    /// Log the error, capturing service-side failures to Sentry.
    pub fn report(&self) {
        if self.is_service_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Checkout failed"
            );
        } else {
            tracing::warn!(error = %self, "Checkout rejected");
        }
    }
}

/// Set the Sentry user context for the signed-in buyer.
pub fn set_sentry_user(email: &str, name: &str) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            email: Some(email.to_string()),
            username: Some(name.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context on sign-out.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a buyer action.
///
/// Breadcrumbs appear in Sentry reports as the trail leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}
