//! Checkout state machine.
//!
//! ```text
//! Idle -> Validating -> Submitting -> AwaitingExternalPayment -> Resolved { Paid | Failed }
//!   ^         |             |                  |
//!   +---------+-------------+                  +--> Abandoned { HandoffFailed | TimedOut | Cancelled }
//! ```
//!
//! A pending order is recorded as soon as the order service accepts the
//! draft, before the buyer is handed off to the hosted payment page. It is
//! never rolled back: abandoned orders stay pending until a late payment
//! return resolves them.

use std::io;
use std::time::Duration;

use bioapp_core::{Email, OrderId, PaymentOutcome};
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::{CheckoutItem, CheckoutRequest, StoreApi};
use crate::cart::{Cart, OrderDraft};
use crate::catalog::Catalog;
use crate::config::{DEFAULT_TAX_RATE, MAX_TIMEOUT_SECS, StorefrontConfig};
use crate::error::{CheckoutError, ValidationError, add_breadcrumb};
use crate::notify::{Notifier, Toast};
use crate::orders::{Order, OrderHistory, OrderHistoryError, Reconciliation};
use crate::payment_return::PaymentReturnHandler;

/// Default wait for a payment return before giving up.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Longest accepted payment wait; longer timeouts are clamped to it.
pub const MAX_PAYMENT_TIMEOUT: Duration = Duration::from_secs(MAX_TIMEOUT_SECS);

/// Opens a URL with the platform's external browser or handler.
pub trait UrlOpener {
    /// # Errors
    ///
    /// Returns an error if the URL could not be handed off.
    fn open_url(&self, url: &str) -> io::Result<()>;
}

impl<T: UrlOpener + ?Sized> UrlOpener for &T {
    fn open_url(&self, url: &str) -> io::Result<()> {
        (**self).open_url(url)
    }
}

/// Who is paying and where to ship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyerInfo {
    pub full_name: String,
    pub email: Email,
    pub address: String,
}

impl BuyerInfo {
    /// Validate raw form input.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the name or address is blank or the email
    /// is invalid.
    pub fn new(full_name: &str, email: &str, address: &str) -> Result<Self, ValidationError> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(ValidationError::MissingBuyerField("full name"));
        }
        let address = address.trim();
        if address.is_empty() {
            return Err(ValidationError::MissingBuyerField("address"));
        }

        Ok(Self {
            full_name: full_name.to_string(),
            email: Email::parse(email)?,
            address: address.to_string(),
        })
    }
}

/// Why a checkout stopped waiting for payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The hosted payment page could not be opened.
    HandoffFailed,
    /// No payment return arrived in time.
    TimedOut,
    /// The buyer backed out.
    Cancelled,
    /// The return listener went away.
    ListenerClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CheckoutState {
    #[default]
    Idle,
    Validating,
    Submitting,
    AwaitingExternalPayment {
        order_id: OrderId,
        checkout_url: String,
        deadline: Instant,
    },
    Resolved {
        order_id: OrderId,
        outcome: PaymentOutcome,
    },
    Abandoned {
        order_id: OrderId,
        reason: AbandonReason,
    },
}

impl CheckoutState {
    /// The order this checkout created, once one exists.
    #[must_use]
    pub const fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::AwaitingExternalPayment { order_id, .. }
            | Self::Resolved { order_id, .. }
            | Self::Abandoned { order_id, .. } => Some(order_id),
            Self::Idle | Self::Validating | Self::Submitting => None,
        }
    }

    #[must_use]
    pub const fn is_awaiting_payment(&self) -> bool {
        matches!(self, Self::AwaitingExternalPayment { .. })
    }
}

/// A payment outcome applied to a recorded order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub order_id: OrderId,
    pub reconciliation: Reconciliation,
}

/// Check that a draft can be submitted.
///
/// # Errors
///
/// Returns `ValidationError::EmptyCart` for an empty draft,
/// `ValidationError::NothingAvailable` if no line has both quantity and
/// stock, and `ValidationError::InsufficientStock` for the first line whose
/// quantity exceeds its stock.
pub fn validate(draft: &OrderDraft) -> Result<(), ValidationError> {
    if draft.is_empty() {
        return Err(ValidationError::EmptyCart);
    }
    if !draft.lines.iter().any(|line| line.is_purchasable()) {
        return Err(ValidationError::NothingAvailable);
    }
    if let Some(line) = draft
        .lines
        .iter()
        .find(|line| line.quantity == 0 || line.quantity > line.product.stock)
    {
        return Err(ValidationError::InsufficientStock {
            name: line.product.name.clone(),
            requested: line.quantity,
            available: line.product.stock,
        });
    }
    Ok(())
}

// =============================================================================
// CheckoutOrchestrator
// =============================================================================

/// Drives one checkout at a time from cart to payment outcome.
pub struct CheckoutOrchestrator<A, O, N> {
    api: A,
    opener: O,
    notifier: N,
    tax_rate: Decimal,
    payment_timeout: Duration,
    state: CheckoutState,
}

impl<A, O, N> std::fmt::Debug for CheckoutOrchestrator<A, O, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("tax_rate", &self.tax_rate)
            .field("payment_timeout", &self.payment_timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<A, O, N> CheckoutOrchestrator<A, O, N> {
    #[must_use]
    pub const fn new(api: A, opener: O, notifier: N) -> Self {
        Self {
            api,
            opener,
            notifier,
            tax_rate: DEFAULT_TAX_RATE,
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            state: CheckoutState::Idle,
        }
    }

    /// An orchestrator using the configured tax rate and payment timeout.
    #[must_use]
    pub const fn from_config(api: A, opener: O, notifier: N, config: &StorefrontConfig) -> Self {
        Self::new(api, opener, notifier)
            .with_tax_rate(config.tax_rate)
            .with_payment_timeout(config.payment_timeout)
    }

    #[must_use]
    pub const fn with_tax_rate(mut self, tax_rate: Decimal) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    /// Set the payment wait, clamped to [`MAX_PAYMENT_TIMEOUT`].
    #[must_use]
    pub const fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = if timeout.as_secs() >= MAX_TIMEOUT_SECS {
            MAX_PAYMENT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    #[must_use]
    pub const fn state(&self) -> &CheckoutState {
        &self.state
    }

    #[must_use]
    pub const fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    /// Return to `Idle` from any state. Recorded orders are kept.
    pub fn reset(&mut self) {
        debug!(state = ?self.state, "Checkout reset");
        self.state = CheckoutState::Idle;
    }
}

impl<A, O, N: Notifier> CheckoutOrchestrator<A, O, N> {
    /// Stop waiting for payment. The order stays pending.
    ///
    /// Returns `false` if no payment was being awaited.
    pub fn cancel(&mut self) -> bool {
        self.abandon(AbandonReason::Cancelled)
    }

    /// Abandon the checkout if its payment deadline has passed.
    pub fn expire_if_overdue(&mut self) -> bool {
        match &self.state {
            CheckoutState::AwaitingExternalPayment { deadline, .. } if Instant::now() >= *deadline => {
                self.abandon(AbandonReason::TimedOut)
            }
            _ => false,
        }
    }

    /// Apply a payment outcome.
    ///
    /// Without an explicit `order_id` the outcome is correlated to this
    /// checkout's order, or else to the most recent pending order. Safe to
    /// call with duplicate or out-of-order outcomes.
    pub fn resolve(
        &mut self,
        order_id: Option<&OrderId>,
        outcome: PaymentOutcome,
        history: &mut OrderHistory,
    ) -> Option<Resolution> {
        let Some(order_id) = order_id
            .or_else(|| self.state.order_id())
            .or_else(|| history.latest_pending().map(|order| &order.id))
            .cloned()
        else {
            warn!(?outcome, "Payment outcome with no order to apply it to");
            return None;
        };

        let reconciliation = history.resolve(&order_id, outcome);
        if reconciliation == Reconciliation::UnknownOrder {
            return None;
        }

        if let Reconciliation::Applied { .. } = reconciliation {
            add_breadcrumb("checkout", "Payment resolved", &[("order_id", order_id.as_str())]);
            self.notifier.show(match outcome {
                PaymentOutcome::Paid => Toast::success("Payment confirmed. Thank you for your purchase!"),
                PaymentOutcome::Failed => Toast::error("Payment was not completed"),
            });
        }

        if self.state.order_id() == Some(&order_id) {
            let outcome = match reconciliation {
                Reconciliation::Ignored => PaymentOutcome::Paid,
                _ => outcome,
            };
            self.state = CheckoutState::Resolved {
                order_id: order_id.clone(),
                outcome,
            };
        }

        Some(Resolution {
            order_id,
            reconciliation,
        })
    }

    /// Wait for this checkout's payment return, up to the payment timeout.
    ///
    /// Returns immediately unless a payment is being awaited. Returns for
    /// other orders are applied to history while waiting.
    pub async fn await_payment(
        &mut self,
        returns: &mut PaymentReturnHandler,
        history: &mut OrderHistory,
    ) -> &CheckoutState {
        let CheckoutState::AwaitingExternalPayment { deadline, .. } = &self.state else {
            return &self.state;
        };
        let deadline = *deadline;

        while self.state.is_awaiting_payment() {
            match tokio::time::timeout_at(deadline, returns.next_outcome()).await {
                Ok(Some(outcome)) => {
                    if let Some(payment) = outcome.payment_outcome() {
                        self.resolve(outcome.order_id(), payment, history);
                    }
                }
                Ok(None) => {
                    self.abandon(AbandonReason::ListenerClosed);
                }
                Err(_) => {
                    self.expire_if_overdue();
                }
            }
        }
        &self.state
    }

    fn abandon(&mut self, reason: AbandonReason) -> bool {
        let CheckoutState::AwaitingExternalPayment { order_id, .. } = &self.state else {
            return false;
        };
        let order_id = order_id.clone();
        warn!(order_id = %order_id, ?reason, "Checkout abandoned; order stays pending");

        match reason {
            AbandonReason::TimedOut => self.notifier.show(Toast::warning(
                "Payment was not confirmed in time. Your order is saved as pending.",
            )),
            AbandonReason::Cancelled => self.notifier.show(Toast::info("Payment cancelled")),
            AbandonReason::HandoffFailed | AbandonReason::ListenerClosed => {}
        }

        self.state = CheckoutState::Abandoned { order_id, reason };
        true
    }

    fn fail(&mut self, err: CheckoutError) -> CheckoutError {
        err.report();
        self.notifier.show(err.toast());
        if !matches!(err, CheckoutError::Busy | CheckoutError::Handoff(_)) {
            self.state = CheckoutState::Idle;
        }
        err
    }
}

impl<A, O, N> CheckoutOrchestrator<A, O, N>
where
    A: StoreApi,
    O: UrlOpener,
    N: Notifier,
{
    /// Submit the cart and hand the buyer off to the hosted payment page.
    ///
    /// On success the orchestrator is `AwaitingExternalPayment` and a pending
    /// order is in `history`.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError` for validation, service, and handoff failures.
    /// A toast has already been shown for every error. After a handoff
    /// failure the state is `Abandoned` and the pending order is kept; after
    /// any other failure the state is back to `Idle` and nothing was recorded.
    #[instrument(skip_all, fields(lines = cart.lines().len()))]
    pub async fn submit(
        &mut self,
        cart: &Cart,
        catalog: &Catalog,
        buyer: &BuyerInfo,
        history: &mut OrderHistory,
    ) -> Result<OrderId, CheckoutError> {
        if self.state.is_awaiting_payment() {
            return Err(self.fail(CheckoutError::Busy));
        }

        self.state = CheckoutState::Validating;
        let draft = cart.compute_totals(catalog, self.tax_rate);
        if let Err(e) = validate(&draft) {
            return Err(self.fail(e.into()));
        }

        self.state = CheckoutState::Submitting;
        self.notifier
            .show(Toast::info("Creating order and redirecting to payment..."));

        let request = checkout_request(&draft, buyer);
        let session = match self.api.create_checkout(&request).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e.into())),
        };
        let Some(checkout_url) = session.checkout_url.filter(|url| !url.is_empty()) else {
            return Err(self.fail(CheckoutError::MissingCheckoutUrl));
        };

        let order_id = session.order_id.unwrap_or_else(|| {
            let local = OrderId::new(format!("local_{}", Uuid::new_v4().simple()));
            warn!(order_id = %local, "Order service returned no order id; using a local one");
            local
        });
        match history.add_order(Order::pending(order_id.clone(), &draft)) {
            Ok(()) => {}
            Err(OrderHistoryError::DuplicateId(id)) => {
                warn!(order_id = %id, "Order already recorded; keeping existing entry");
            }
        }
        add_breadcrumb("checkout", "Order created", &[("order_id", order_id.as_str())]);
        info!(order_id = %order_id, total = %draft.total, "Order created; opening payment page");

        if let Err(e) = self.opener.open_url(&checkout_url) {
            self.state = CheckoutState::Abandoned {
                order_id,
                reason: AbandonReason::HandoffFailed,
            };
            return Err(self.fail(CheckoutError::Handoff(e.to_string())));
        }

        self.state = CheckoutState::AwaitingExternalPayment {
            order_id: order_id.clone(),
            checkout_url,
            deadline: payment_deadline(Instant::now(), self.payment_timeout),
        };
        Ok(order_id)
    }
}

/// `now + timeout`, saturating at the longest wait the clock can represent.
fn payment_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(MAX_PAYMENT_TIMEOUT))
        .unwrap_or(now)
}

fn checkout_request(draft: &OrderDraft, buyer: &BuyerInfo) -> CheckoutRequest {
    CheckoutRequest {
        items: draft
            .lines
            .iter()
            .map(|line| CheckoutItem {
                product_id: line.product.id.clone(),
                quantity: line.quantity,
            })
            .collect(),
        full_name: buyer.full_name.clone(),
        email: buyer.email.to_string(),
        address: buyer.address.clone(),
        amount: draft
            .total
            .amount()
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    }
}
