//! Payment outcome intake.
//!
//! Outcomes reach the app two ways:
//!
//! - A return URL opened by the hosted payment page (deep link or loopback
//!   request). Classified by [`classify`].
//! - A JSON message posted by the in-app card form. Handled by
//!   [`handle_in_app_message`].
//!
//! # Return URL contract
//!
//! `status=success|paid|succeeded` or `status=failure|failed|cancelled|error`,
//! with `order_id` (or `orderId`) naming the order and an optional `reason`
//! or `error` on failures. URLs without a `status` parameter fall back to
//! matching `payment-success`, `/orders/completed` or `success` anywhere in
//! the URL, case-insensitively. Anything else is not a payment return and is
//! ignored.

use bioapp_core::{OrderId, PaymentIntentId, PaymentOutcome};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::StoreApi;
use crate::checkout::CheckoutOrchestrator;
use crate::deeplink::{DeepLinkHub, ReturnSubscription};
use crate::notify::Notifier;
use crate::orders::OrderHistory;

const LEGACY_SUCCESS_MARKERS: &[&str] = &["payment-success", "/orders/completed", "success"];
const SUCCESS_STATUSES: &[&str] = &["success", "paid", "succeeded"];
const FAILURE_STATUSES: &[&str] = &["failure", "failed", "cancelled", "canceled", "error"];

/// What a return URL says about the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnOutcome {
    Success {
        order_id: Option<OrderId>,
    },
    Failure {
        order_id: Option<OrderId>,
        reason: Option<String>,
    },
    /// Not a payment return, or not a terminal one.
    Ignored,
}

impl ReturnOutcome {
    #[must_use]
    pub const fn payment_outcome(&self) -> Option<PaymentOutcome> {
        match self {
            Self::Success { .. } => Some(PaymentOutcome::Paid),
            Self::Failure { .. } => Some(PaymentOutcome::Failed),
            Self::Ignored => None,
        }
    }

    #[must_use]
    pub const fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Success { order_id } | Self::Failure { order_id, .. } => order_id.as_ref(),
            Self::Ignored => None,
        }
    }
}

/// Classify a return URL.
#[must_use]
pub fn classify(url: &str) -> ReturnOutcome {
    let parsed = Url::parse(url.trim()).ok();
    let param = |names: &[&str]| {
        parsed.as_ref().and_then(|u| {
            u.query_pairs()
                .find(|(key, value)| names.iter().any(|name| key == name) && !value.trim().is_empty())
                .map(|(_, value)| value.trim().to_string())
        })
    };
    let order_id = param(&["order_id", "orderId"]).map(OrderId::new);

    if let Some(status) = param(&["status"]) {
        let status = status.to_ascii_lowercase();
        if SUCCESS_STATUSES.contains(&status.as_str()) {
            return ReturnOutcome::Success { order_id };
        }
        if FAILURE_STATUSES.contains(&status.as_str()) {
            return ReturnOutcome::Failure {
                order_id,
                reason: param(&["reason", "error"]),
            };
        }
        debug!(%status, "Non-terminal payment status in return URL");
        return ReturnOutcome::Ignored;
    }

    let lowered = url.to_lowercase();
    if LEGACY_SUCCESS_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        debug!(%url, "Return URL matched legacy success marker");
        return ReturnOutcome::Success { order_id };
    }

    ReturnOutcome::Ignored
}

/// Terminal screen to show after a payment outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentView {
    Success {
        order_id: Option<OrderId>,
        /// Payment went through on the client but the service has not
        /// confirmed it yet.
        processing: bool,
    },
    Error {
        order_id: Option<OrderId>,
        message: String,
    },
}

// =============================================================================
// Return URLs
// =============================================================================

/// Live return URL listener.
///
/// Attaching checks the launch URL once, then follows live URLs. Dropping
/// the handler deregisters it from the hub.
#[derive(Debug)]
pub struct PaymentReturnHandler {
    subscription: ReturnSubscription,
    initial_url: Option<String>,
}

impl PaymentReturnHandler {
    #[must_use]
    pub fn attach(hub: &DeepLinkHub) -> Self {
        let subscription = hub.subscribe();
        let initial_url = hub.take_initial_url();
        if let Some(url) = &initial_url {
            debug!(%url, "App launched with a return URL");
        }
        Self {
            subscription,
            initial_url,
        }
    }

    /// Next return URL, starting with the launch URL if there was one.
    pub async fn next_url(&mut self) -> Option<String> {
        if let Some(url) = self.initial_url.take() {
            return Some(url);
        }
        self.subscription.recv().await
    }

    /// Next URL that carries a payment outcome. Other URLs are skipped.
    pub async fn next_outcome(&mut self) -> Option<ReturnOutcome> {
        while let Some(url) = self.next_url().await {
            match classify(&url) {
                ReturnOutcome::Ignored => debug!(%url, "Ignoring non-payment URL"),
                outcome => return Some(outcome),
            }
        }
        None
    }
}

/// Handle one return URL: reconcile the order and pick the screen to show.
///
/// Returns `None` for URLs that are not payment returns.
pub fn on_return_url<A, O, N: Notifier>(
    url: &str,
    checkout: &mut CheckoutOrchestrator<A, O, N>,
    history: &mut OrderHistory,
) -> Option<PaymentView> {
    let outcome = classify(url);
    let payment = outcome.payment_outcome()?;
    info!(%url, ?payment, "Payment return received");

    let resolved = checkout
        .resolve(outcome.order_id(), payment, history)
        .map(|resolution| resolution.order_id)
        .or_else(|| outcome.order_id().cloned());

    Some(match outcome {
        ReturnOutcome::Failure { reason, .. } => PaymentView::Error {
            order_id: resolved,
            message: reason.unwrap_or_else(|| "Payment was not completed".to_string()),
        },
        _ => PaymentView::Success {
            order_id: resolved,
            processing: false,
        },
    })
}

// =============================================================================
// In-app payment messages
// =============================================================================

/// Message posted by the in-app card form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InAppPaymentMessage {
    Succeeded {
        payment_intent: Option<PaymentIntentId>,
    },
    Processing,
    Failed {
        error: Option<String>,
    },
}

impl InAppPaymentMessage {
    /// Decode a raw message.
    ///
    /// `paymentIntent` may be an id string or an object with an `id`; `error`
    /// may be a string or an object with a `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not JSON. Unknown statuses decode as
    /// `Processing`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        let status = value.get("status").and_then(Value::as_str).unwrap_or_default();

        Ok(match status {
            "success" => Self::Succeeded {
                payment_intent: ["paymentIntent", "payment_intent", "paymentIntentId"]
                    .iter()
                    .filter_map(|key| value.get(*key))
                    .find_map(|pi| match pi {
                        Value::String(id) => Some(id.clone()),
                        Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(String::from),
                        _ => None,
                    })
                    .filter(|id| !id.trim().is_empty())
                    .map(PaymentIntentId::new),
            },
            "error" => Self::Failed {
                error: value.get("error").and_then(|e| match e {
                    Value::String(message) => Some(message.clone()),
                    Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(String::from),
                    _ => None,
                }),
            },
            _ => Self::Processing,
        })
    }
}

/// Handle a message from the in-app card form for `order_id`.
///
/// A client-side success is confirmed with the order service. If the service
/// does not report the intent as paid yet (or cannot be reached) the order
/// stays pending and the success screen is shown as processing.
pub async fn handle_in_app_message<S, A, O, N>(
    raw: &str,
    order_id: &OrderId,
    api: &S,
    checkout: &mut CheckoutOrchestrator<A, O, N>,
    history: &mut OrderHistory,
) -> PaymentView
where
    S: StoreApi,
    N: Notifier,
{
    let message = match InAppPaymentMessage::from_json(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unreadable in-app payment message");
            return PaymentView::Error {
                order_id: Some(order_id.clone()),
                message: "Invalid payment response".to_string(),
            };
        }
    };

    match message {
        InAppPaymentMessage::Succeeded {
            payment_intent: Some(intent),
        } => {
            let paid = match api.confirm_payment_intent(&intent, order_id).await {
                Ok(paid) => paid,
                Err(e) => {
                    warn!(error = %e, payment_intent = %intent, "Payment intent confirmation failed");
                    false
                }
            };
            if paid {
                checkout.resolve(Some(order_id), PaymentOutcome::Paid, history);
            }
            PaymentView::Success {
                order_id: Some(order_id.clone()),
                processing: !paid,
            }
        }
        InAppPaymentMessage::Succeeded { payment_intent: None } | InAppPaymentMessage::Processing => {
            PaymentView::Success {
                order_id: Some(order_id.clone()),
                processing: true,
            }
        }
        InAppPaymentMessage::Failed { error } => {
            checkout.resolve(Some(order_id), PaymentOutcome::Failed, history);
            PaymentView::Error {
                order_id: Some(order_id.clone()),
                message: error.unwrap_or_else(|| "Payment was not completed".to_string()),
            }
        }
    }
}
