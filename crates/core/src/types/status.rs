//! Status enums for orders, shipping, and payment outcomes.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a locally recorded order.
///
/// Orders are written as `Pending` when checkout is submitted and only the
/// payment return path moves them to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    /// Whether the status is final for reconciliation purposes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Shipping option selected in the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    /// Free above the threshold, flat fee below it.
    #[default]
    Standard,
    /// Flat fee regardless of subtotal.
    Express,
}

impl std::fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Express => write!(f, "express"),
        }
    }
}

impl std::str::FromStr for ShippingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "express" => Ok(Self::Express),
            _ => Err(format!("invalid shipping method: {s}")),
        }
    }
}

/// Outcome of an external payment, as reported by a return URL or an
/// in-app payment message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl From<PaymentOutcome> for OrderStatus {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Paid => Self::Paid,
            PaymentOutcome::Failed => Self::Failed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_shipping_method_from_str() {
        assert_eq!("standard".parse::<ShippingMethod>(), Ok(ShippingMethod::Standard));
        assert_eq!(" Express ".parse::<ShippingMethod>(), Ok(ShippingMethod::Express));
        assert!("free".parse::<ShippingMethod>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&OrderStatus::Paid).unwrap(), "\"paid\"");
        assert_eq!(
            serde_json::to_string(&ShippingMethod::Express).unwrap(),
            "\"express\""
        );
    }

    #[test]
    fn test_outcome_into_status() {
        assert_eq!(OrderStatus::from(PaymentOutcome::Paid), OrderStatus::Paid);
        assert_eq!(OrderStatus::from(PaymentOutcome::Failed), OrderStatus::Failed);
    }
}
