//! Local order history.
//!
//! Orders are recorded as `Pending` the moment checkout is submitted, before
//! any payment happens. The payment return path later resolves them to
//! `Paid` or `Failed`. Past orders are never edited beyond that status change
//! and never removed.

use bioapp_core::{OrderId, OrderStatus, PaymentOutcome, Price, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cart::OrderDraft;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderHistoryError {
    #[error("Order {0} is already recorded")]
    DuplicateId(OrderId),
}

/// A purchased line, frozen at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Price,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub lines: Vec<OrderLine>,
    pub total: Price,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl Order {
    /// A new pending order for a priced draft.
    #[must_use]
    pub fn pending(id: OrderId, draft: &OrderDraft) -> Self {
        Self {
            id,
            lines: draft
                .lines
                .iter()
                .map(|line| OrderLine {
                    product_id: line.product.id.clone(),
                    name: line.product.name.clone(),
                    unit_price: line.product.price,
                    quantity: line.quantity,
                })
                .collect(),
            total: draft.total,
            created_at: Utc::now(),
            status: OrderStatus::Pending,
        }
    }
}

/// What [`OrderHistory::resolve`] did with a payment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The status changed.
    Applied { from: OrderStatus, to: OrderStatus },
    /// The order already had this status (duplicate delivery).
    Unchanged,
    /// A failure arrived for an order that is already paid.
    Ignored,
    /// No order with this id is recorded.
    UnknownOrder,
}

/// Append-only list of orders, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderHistory {
    orders: Vec<Order>,
}

impl OrderHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an order.
    ///
    /// # Errors
    ///
    /// Returns `OrderHistoryError::DuplicateId` if an order with the same id
    /// is already recorded.
    pub fn add_order(&mut self, order: Order) -> Result<(), OrderHistoryError> {
        if self.get(&order.id).is_some() {
            return Err(OrderHistoryError::DuplicateId(order.id));
        }
        debug!(order_id = %order.id, total = %order.total, "Recorded order");
        self.orders.push(order);
        Ok(())
    }

    /// Apply a payment outcome to an order.
    ///
    /// Safe to call repeatedly and in any order: repeats are no-ops, a late
    /// success still promotes a failed order, and a failure never demotes a
    /// paid one.
    pub fn resolve(&mut self, id: &OrderId, outcome: PaymentOutcome) -> Reconciliation {
        let Some(order) = self.orders.iter_mut().find(|o| &o.id == id) else {
            warn!(order_id = %id, ?outcome, "Payment outcome for unknown order");
            return Reconciliation::UnknownOrder;
        };

        let to = OrderStatus::from(outcome);
        let from = order.status;
        match (from, to) {
            _ if from == to => Reconciliation::Unchanged,
            (OrderStatus::Paid, OrderStatus::Failed) => {
                warn!(order_id = %id, "Ignoring failure for an order already paid");
                Reconciliation::Ignored
            }
            _ => {
                order.status = to;
                info!(order_id = %id, %from, %to, "Order status updated");
                Reconciliation::Applied { from, to }
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| &o.id == id)
    }

    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Most recent order still waiting for a payment outcome.
    #[must_use]
    pub fn latest_pending(&self) -> Option<&Order> {
        self.orders
            .iter()
            .rev()
            .find(|o| o.status == OrderStatus::Pending)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::Cart;
    use crate::catalog::Catalog;
    use crate::catalog::tests::product;
    use crate::config::DEFAULT_TAX_RATE;

    fn draft() -> OrderDraft {
        let catalog = Catalog::new(vec![product("p1", 3999, 10)]);
        let mut cart = Cart::new();
        cart.add_line(ProductId::new("p1"));
        cart.add_line(ProductId::new("p1"));
        cart.compute_totals(&catalog, DEFAULT_TAX_RATE)
    }

    fn history_with(id: &str) -> OrderHistory {
        let mut history = OrderHistory::new();
        history
            .add_order(Order::pending(OrderId::new(id), &draft()))
            .unwrap();
        history
    }

    #[test]
    fn test_pending_order_from_draft() {
        let order = Order::pending(OrderId::new("ord_1"), &draft());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 2);
        assert_eq!(order.lines[0].unit_price, Price::from_cents(3999));
        assert_eq!(order.total, draft().total);
    }

    #[test]
    fn test_add_order_appends_pending() {
        let mut history = history_with("ord_1");
        let before = history.len();

        history
            .add_order(Order::pending(OrderId::new("ord_2"), &draft()))
            .unwrap();

        assert_eq!(history.len(), before + 1);
        let last = history.orders().last().unwrap();
        assert_eq!(last.id, OrderId::new("ord_2"));
        assert_eq!(last.status, OrderStatus::Pending);
    }

    #[test]
    fn test_add_order_rejects_duplicate_id() {
        let mut history = history_with("ord_1");
        let err = history
            .add_order(Order::pending(OrderId::new("ord_1"), &draft()))
            .unwrap_err();
        assert_eq!(err, OrderHistoryError::DuplicateId(OrderId::new("ord_1")));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut history = history_with("ord_1");
        let id = OrderId::new("ord_1");

        assert_eq!(
            history.resolve(&id, PaymentOutcome::Paid),
            Reconciliation::Applied {
                from: OrderStatus::Pending,
                to: OrderStatus::Paid
            }
        );
        assert_eq!(history.resolve(&id, PaymentOutcome::Paid), Reconciliation::Unchanged);
        assert_eq!(history.get(&id).unwrap().status, OrderStatus::Paid);
    }

    #[test]
    fn test_resolve_out_of_order_delivery() {
        let mut history = history_with("ord_1");
        let id = OrderId::new("ord_1");

        history.resolve(&id, PaymentOutcome::Failed);
        assert_eq!(history.get(&id).unwrap().status, OrderStatus::Failed);

        // A retried payment can still succeed.
        history.resolve(&id, PaymentOutcome::Paid);
        assert_eq!(history.get(&id).unwrap().status, OrderStatus::Paid);

        assert_eq!(history.resolve(&id, PaymentOutcome::Failed), Reconciliation::Ignored);
        assert_eq!(history.get(&id).unwrap().status, OrderStatus::Paid);
    }

    #[test]
    fn test_resolve_unknown_order() {
        let mut history = history_with("ord_1");
        assert_eq!(
            history.resolve(&OrderId::new("nope"), PaymentOutcome::Paid),
            Reconciliation::UnknownOrder
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_latest_pending() {
        let mut history = history_with("ord_1");
        history
            .add_order(Order::pending(OrderId::new("ord_2"), &draft()))
            .unwrap();
        assert_eq!(history.latest_pending().unwrap().id, OrderId::new("ord_2"));

        history.resolve(&OrderId::new("ord_2"), PaymentOutcome::Paid);
        assert_eq!(history.latest_pending().unwrap().id, OrderId::new("ord_1"));

        history.resolve(&OrderId::new("ord_1"), PaymentOutcome::Failed);
        assert!(history.latest_pending().is_none());
    }
}
