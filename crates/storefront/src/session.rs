//! One buyer's session.
//!
//! [`Session`] owns every piece of mutable storefront state: the catalog
//! handle, cart, order history, and account. Operations that span several
//! of them (pricing, checkout, payment returns) go through the session, which
//! lends out the pieces each step needs.

use bioapp_core::{OrderId, PaymentOutcome, ProductId, ShippingMethod};
use rust_decimal::Decimal;
use tracing::warn;

use crate::account::Account;
use crate::api::StoreApi;
use crate::cart::{Cart, CartError, OrderDraft};
use crate::catalog::CatalogStore;
use crate::checkout::{BuyerInfo, CheckoutOrchestrator, CheckoutState, UrlOpener};
use crate::config::{DEFAULT_TAX_RATE, StorefrontConfig};
use crate::error::CheckoutError;
use crate::notify::Notifier;
use crate::orders::OrderHistory;
use crate::payment_return::{self, PaymentReturnHandler, PaymentView};

/// Checkout form fields pre-filled from the signed-in buyer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuyerPrefill {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    catalog: CatalogStore,
    cart: Cart,
    orders: OrderHistory,
    account: Account,
    tax_rate: Decimal,
}

impl Session {
    #[must_use]
    pub fn new(catalog: CatalogStore) -> Self {
        Self {
            catalog,
            cart: Cart::new(),
            orders: OrderHistory::new(),
            account: Account::new(),
            tax_rate: DEFAULT_TAX_RATE,
        }
    }

    #[must_use]
    pub fn from_config(catalog: CatalogStore, config: &StorefrontConfig) -> Self {
        Self::new(catalog).with_tax_rate(config.tax_rate)
    }

    #[must_use]
    pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    #[must_use]
    pub const fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    #[must_use]
    pub const fn cart(&self) -> &Cart {
        &self.cart
    }

    #[must_use]
    pub const fn orders(&self) -> &OrderHistory {
        &self.orders
    }

    #[must_use]
    pub const fn account(&self) -> &Account {
        &self.account
    }

    pub const fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Add one unit of a product.
    ///
    /// Products the catalog does not know are still added; they price at
    /// zero until the catalog catches up.
    pub fn add_to_cart(&mut self, product_id: ProductId) {
        if self.catalog.snapshot().get(&product_id).is_none() {
            warn!(product_id = %product_id, "Adding product missing from catalog to cart");
        }
        self.cart.add_line(product_id);
    }

    pub fn remove_from_cart(&mut self, product_id: &ProductId) -> bool {
        self.cart.remove_line(product_id)
    }

    /// Set a line's quantity, checked against current stock.
    ///
    /// A refused change leaves the line as it was and shows a warning
    /// through `notifier`.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the line is missing or stock is insufficient.
    pub fn set_quantity(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
        notifier: &impl Notifier,
    ) -> Result<(), CartError> {
        let catalog = self.catalog.snapshot();
        self.cart
            .set_quantity(product_id, quantity, &catalog)
            .inspect_err(|e| {
                warn!(error = %e, "Quantity change refused");
                notifier.show(e.toast());
            })
    }

    pub const fn set_shipping(&mut self, method: ShippingMethod) {
        self.cart.set_shipping(method);
    }

    pub fn clear_cart(&mut self) {
        self.cart.clear();
    }

    /// Price the cart against the current catalog.
    #[must_use]
    pub fn totals(&self) -> OrderDraft {
        self.cart.compute_totals(&self.catalog.snapshot(), self.tax_rate)
    }

    /// Checkout form fields for the signed-in buyer, blank otherwise.
    #[must_use]
    pub fn buyer_prefill(&self) -> BuyerPrefill {
        self.account
            .user()
            .map(|user| BuyerPrefill {
                full_name: user.name.clone(),
                email: user.email.to_string(),
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Submit the cart through `checkout`.
    ///
    /// # Errors
    ///
    /// See [`CheckoutOrchestrator::submit`].
    pub async fn checkout<A, O, N>(
        &mut self,
        checkout: &mut CheckoutOrchestrator<A, O, N>,
        buyer: &BuyerInfo,
    ) -> Result<OrderId, CheckoutError>
    where
        A: StoreApi,
        O: UrlOpener,
        N: Notifier,
    {
        let catalog = self.catalog.snapshot();
        checkout
            .submit(&self.cart, &catalog, buyer, &mut self.orders)
            .await
    }

    /// Wait for the payment return of the current checkout.
    pub async fn await_payment<A, O, N: Notifier>(
        &mut self,
        checkout: &mut CheckoutOrchestrator<A, O, N>,
        returns: &mut PaymentReturnHandler,
    ) -> CheckoutState {
        let state = checkout.await_payment(returns, &mut self.orders).await.clone();
        self.clear_cart_if_paid(&state);
        state
    }

    /// Handle a return URL delivered outside [`Session::await_payment`].
    pub fn handle_return_url<A, O, N: Notifier>(
        &mut self,
        checkout: &mut CheckoutOrchestrator<A, O, N>,
        url: &str,
    ) -> Option<PaymentView> {
        let view = payment_return::on_return_url(url, checkout, &mut self.orders)?;
        self.clear_cart_if_paid(checkout.state());
        Some(view)
    }

    /// Handle a message from the in-app card form.
    pub async fn handle_in_app_message<S, A, O, N>(
        &mut self,
        api: &S,
        checkout: &mut CheckoutOrchestrator<A, O, N>,
        order_id: &OrderId,
        raw: &str,
    ) -> PaymentView
    where
        S: StoreApi,
        N: Notifier,
    {
        let view =
            payment_return::handle_in_app_message(raw, order_id, api, checkout, &mut self.orders)
                .await;
        self.clear_cart_if_paid(checkout.state());
        view
    }

    /// The cart is emptied once this session's checkout is paid.
    fn clear_cart_if_paid(&mut self, state: &CheckoutState) {
        if let CheckoutState::Resolved {
            outcome: PaymentOutcome::Paid,
            ..
        } = state
        {
            self.cart.clear();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use bioapp_core::{OrderStatus, PaymentIntentId};

    use super::*;
    use crate::api::{ApiError, CheckoutRequest, CheckoutSession};
    use crate::catalog::Product;
    use crate::catalog::tests::product;
    use crate::deeplink::DeepLinkHub;
    use crate::notify::{Toast, ToastLevel, ToastQueue};

    #[derive(Clone)]
    struct Service {
        paid: bool,
        confirmed: Arc<Mutex<Vec<(PaymentIntentId, OrderId)>>>,
    }

    impl StoreApi for Service {
        async fn fetch_products(&self) -> Result<Vec<Product>, ApiError> {
            Ok(Vec::new())
        }

        async fn create_checkout(&self, _: &CheckoutRequest) -> Result<CheckoutSession, ApiError> {
            Ok(CheckoutSession {
                checkout_url: Some("https://pay.example/cs".to_string()),
                order_id: Some(OrderId::new("ord_1")),
            })
        }

        async fn confirm_payment_intent(
            &self,
            intent: &PaymentIntentId,
            order_id: &OrderId,
        ) -> Result<bool, ApiError> {
            self.confirmed
                .lock()
                .unwrap()
                .push((intent.clone(), order_id.clone()));
            Ok(self.paid)
        }
    }

    struct NoopOpener;

    impl UrlOpener for NoopOpener {
        fn open_url(&self, _: &str) -> io::Result<()> {
            Ok(())
        }
    }

    fn service(paid: bool) -> Service {
        Service {
            paid,
            confirmed: Arc::default(),
        }
    }

    fn session() -> Session {
        Session::new(CatalogStore::new(vec![product("p1", 3999, 10)]))
    }

    fn buyer() -> BuyerInfo {
        BuyerInfo::new("Ana", "ana@bioapp.mx", "Calle 1").unwrap()
    }

    #[test]
    fn test_cart_operations_use_current_catalog() {
        let mut session = session();
        session.add_to_cart(ProductId::new("p1"));
        session.add_to_cart(ProductId::new("p1"));
        assert_eq!(session.totals().total.display_mxn(), "$96.78 MXN");

        let toasts = ToastQueue::new();
        assert!(session.set_quantity(&ProductId::new("p1"), 11, &toasts).is_err());
        session.catalog().replace(vec![product("p1", 3999, 20)]);
        session.set_quantity(&ProductId::new("p1"), 11, &toasts).unwrap();
        assert_eq!(session.cart().quantity_of(&ProductId::new("p1")), Some(11));

        session.set_shipping(ShippingMethod::Express);
        session.clear_cart();
        assert!(session.totals().is_empty());
        assert_eq!(session.cart().shipping(), ShippingMethod::Express);
    }

    #[test]
    fn test_refused_quantity_shows_stock_warning() {
        let mut session = session();
        let toasts = ToastQueue::new();
        session.add_to_cart(ProductId::new("p1"));
        session.add_to_cart(ProductId::new("p1"));

        let err = session
            .set_quantity(&ProductId::new("p1"), 11, &toasts)
            .unwrap_err();

        assert!(matches!(err, CartError::InsufficientStock { available: 10, .. }));
        assert_eq!(session.cart().quantity_of(&ProductId::new("p1")), Some(2));
        assert_eq!(
            toasts.drain(),
            vec![Toast::warning("Only 10 units available")]
        );

        session
            .set_quantity(&ProductId::new("missing"), 1, &toasts)
            .unwrap_err();
        assert_eq!(toasts.last().unwrap().level, ToastLevel::Warning);
    }

    #[test]
    fn test_unknown_product_is_added() {
        let mut session = session();
        session.add_to_cart(ProductId::new("ghost"));
        assert_eq!(session.cart().quantity_of(&ProductId::new("ghost")), Some(1));
        assert!(session.totals().subtotal.is_zero());
    }

    #[test]
    fn test_buyer_prefill() {
        let mut session = session();
        assert_eq!(session.buyer_prefill(), BuyerPrefill::default());

        session.account_mut().register("Ana López", "ana@bioapp.mx").unwrap();
        assert_eq!(
            session.buyer_prefill(),
            BuyerPrefill {
                full_name: "Ana López".to_string(),
                email: "ana@bioapp.mx".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_paid_return_clears_cart() {
        let mut session = session();
        let mut checkout = CheckoutOrchestrator::new(service(true), NoopOpener, ToastQueue::new());
        session.add_to_cart(ProductId::new("p1"));

        let order_id = session.checkout(&mut checkout, &buyer()).await.unwrap();
        assert!(!session.cart().is_empty());

        let view = session
            .handle_return_url(&mut checkout, "bioapp://payment-success")
            .unwrap();
        assert_eq!(
            view,
            PaymentView::Success {
                order_id: Some(order_id.clone()),
                processing: false
            }
        );
        assert_eq!(session.orders().get(&order_id).unwrap().status, OrderStatus::Paid);
        assert!(session.cart().is_empty());

        assert!(session.handle_return_url(&mut checkout, "bioapp://product/1").is_none());
    }

    #[tokio::test]
    async fn test_failed_return_keeps_cart() {
        let mut session = session();
        let mut checkout = CheckoutOrchestrator::new(service(true), NoopOpener, ToastQueue::new());
        let hub = DeepLinkHub::new();
        let mut returns = PaymentReturnHandler::attach(&hub);
        session.add_to_cart(ProductId::new("p1"));
        session.checkout(&mut checkout, &buyer()).await.unwrap();

        hub.publish("bioapp://return?status=failed&reason=declined");
        let state = session.await_payment(&mut checkout, &mut returns).await;

        assert!(matches!(
            state,
            CheckoutState::Resolved {
                outcome: PaymentOutcome::Failed,
                ..
            }
        ));
        assert!(!session.cart().is_empty());
    }

    #[tokio::test]
    async fn test_in_app_message_confirms_intent() {
        let api = service(true);
        let mut session = session();
        let mut checkout = CheckoutOrchestrator::new(api.clone(), NoopOpener, ToastQueue::new());
        session.add_to_cart(ProductId::new("p1"));
        let order_id = session.checkout(&mut checkout, &buyer()).await.unwrap();

        let view = session
            .handle_in_app_message(
                &api,
                &mut checkout,
                &order_id,
                r#"{"status":"success","paymentIntent":{"id":"pi_9"}}"#,
            )
            .await;

        assert_eq!(
            view,
            PaymentView::Success {
                order_id: Some(order_id.clone()),
                processing: false
            }
        );
        assert_eq!(
            *api.confirmed.lock().unwrap(),
            vec![(PaymentIntentId::new("pi_9"), order_id.clone())]
        );
        assert_eq!(session.orders().get(&order_id).unwrap().status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_in_app_message_unconfirmed_stays_pending() {
        let api = service(false);
        let mut session = session();
        let mut checkout = CheckoutOrchestrator::new(api.clone(), NoopOpener, ToastQueue::new());
        session.add_to_cart(ProductId::new("p1"));
        let order_id = session.checkout(&mut checkout, &buyer()).await.unwrap();

        let view = session
            .handle_in_app_message(&api, &mut checkout, &order_id, r#"{"status":"success","paymentIntent":"pi_1"}"#)
            .await;
        assert_eq!(
            view,
            PaymentView::Success {
                order_id: Some(order_id.clone()),
                processing: true
            }
        );
        assert_eq!(session.orders().get(&order_id).unwrap().status, OrderStatus::Pending);
        assert!(checkout.state().is_awaiting_payment());

        let view = session
            .handle_in_app_message(&api, &mut checkout, &order_id, r#"{"status":"error","error":"Tarjeta rechazada"}"#)
            .await;
        assert_eq!(
            view,
            PaymentView::Error {
                order_id: Some(order_id.clone()),
                message: "Tarjeta rechazada".to_string()
            }
        );
        assert_eq!(session.orders().get(&order_id).unwrap().status, OrderStatus::Failed);
    }
}
