//! Classify a payment return URL offline.

use bioapp_storefront::payment_return::{ReturnOutcome, classify};

pub fn run(url: &str) {
    match classify(url) {
        ReturnOutcome::Success { order_id } => {
            tracing::info!(order_id = ?order_id.as_ref().map(|id| id.as_str()), "Payment succeeded");
        }
        ReturnOutcome::Failure { order_id, reason } => {
            tracing::info!(
                order_id = ?order_id.as_ref().map(|id| id.as_str()),
                reason = reason.as_deref().unwrap_or("-"),
                "Payment failed"
            );
        }
        ReturnOutcome::Ignored => tracing::info!("Not a payment return"),
    }
}
