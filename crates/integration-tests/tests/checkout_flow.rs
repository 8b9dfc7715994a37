//! Integration tests for the hosted-page checkout flow.
//!
//! Each test submits a cart to a mock order service, then delivers the
//! payment return through the loopback listener the way a browser would.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use bioapp_core::{OrderId, OrderStatus, PaymentOutcome, Price, ProductId, ShippingMethod};
use bioapp_integration_tests::{RecordingOpener, client_for, mount_catalog};
use bioapp_storefront::api::ApiClient;
use bioapp_storefront::catalog::{CatalogRefresher, CatalogStore};
use bioapp_storefront::checkout::{AbandonReason, BuyerInfo, CheckoutOrchestrator, CheckoutState};
use bioapp_storefront::deeplink::{DeepLinkHub, serve_loopback};
use bioapp_storefront::error::CheckoutError;
use bioapp_storefront::notify::{ToastLevel, ToastQueue};
use bioapp_storefront::payment_return::PaymentReturnHandler;
use bioapp_storefront::session::Session;
use serde_json::json;
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Orchestrator = CheckoutOrchestrator<ApiClient, RecordingOpener, Arc<ToastQueue>>;

struct Harness {
    server: MockServer,
    session: Session,
    checkout: Orchestrator,
    opener: RecordingOpener,
    toasts: Arc<ToastQueue>,
}

async fn harness() -> Harness {
    let server = mount_catalog().await;
    let store = CatalogStore::default();
    CatalogRefresher::new(client_for(&server), store.clone())
        .refresh()
        .await
        .unwrap();

    let opener = RecordingOpener::default();
    let toasts = Arc::new(ToastQueue::new());
    let checkout = CheckoutOrchestrator::new(client_for(&server), opener.clone(), toasts.clone());

    Harness {
        server,
        session: Session::new(store),
        checkout,
        opener,
        toasts,
    }
}

fn buyer() -> BuyerInfo {
    BuyerInfo::new("Ana López", "ana@bioapp.mx", "Av. Reforma 1, CDMX").unwrap()
}

async fn mount_create_checkout(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/orders/create-checkout/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Start a loopback listener on an ephemeral port and return its origin.
async fn start_loopback(hub: &DeepLinkHub) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(serve_loopback(listener, hub.clone(), std::future::pending()));
    origin
}

/// Hit the loopback listener after a short delay, like a browser redirect.
fn redirect_later(url: String) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        reqwest::get(url).await.unwrap();
    });
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_checkout_paid_through_loopback_return() {
    let mut h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/orders/create-checkout/"))
        .and(body_partial_json(json!({
            "items": [{"productId": "1", "quantity": 2}],
            "email": "ana@bioapp.mx",
            "amount": 96.78
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "checkout_url": "https://pay.example/cs_991",
            "order_id": 991
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.session.add_to_cart(ProductId::new("1"));
    h.session.add_to_cart(ProductId::new("1"));
    let draft = h.session.totals();
    assert_eq!(draft.shipping_cost, Price::ZERO);
    assert_eq!(draft.total.display_mxn(), "$96.78 MXN");

    let hub = DeepLinkHub::new();
    let origin = start_loopback(&hub).await;
    let mut returns = PaymentReturnHandler::attach(&hub);

    let order_id = h.session.checkout(&mut h.checkout, &buyer()).await.unwrap();
    assert_eq!(order_id, OrderId::new("991"));
    assert_eq!(h.opener.opened(), vec!["https://pay.example/cs_991".to_string()]);
    assert!(h.checkout.state().is_awaiting_payment());
    assert_eq!(
        h.session.orders().get(&order_id).unwrap().status,
        OrderStatus::Pending
    );

    redirect_later(format!("{origin}/payment-success?order_id=991"));
    let state = h.session.await_payment(&mut h.checkout, &mut returns).await;

    assert_eq!(
        state,
        CheckoutState::Resolved {
            order_id: order_id.clone(),
            outcome: PaymentOutcome::Paid,
        }
    );
    let order = h.session.orders().get(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.total, draft.total);
    assert!(h.session.cart().is_empty());
    assert_eq!(h.toasts.last().unwrap().level, ToastLevel::Success);
}

#[tokio::test]
async fn test_structured_failure_return_marks_order_failed() {
    let mut h = harness().await;
    mount_create_checkout(
        &h.server,
        json!({"checkoutUrl": "https://pay.example/cs_7", "orderId": "7"}),
    )
    .await;

    h.session.add_to_cart(ProductId::new("2"));
    h.session.set_shipping(ShippingMethod::Express);

    let hub = DeepLinkHub::new();
    let origin = start_loopback(&hub).await;
    let mut returns = PaymentReturnHandler::attach(&hub);

    let order_id = h.session.checkout(&mut h.checkout, &buyer()).await.unwrap();
    redirect_later(format!(
        "{origin}/checkout/return?status=failed&order_id=7&reason=card_declined"
    ));
    let state = h.session.await_payment(&mut h.checkout, &mut returns).await;

    assert_eq!(
        state,
        CheckoutState::Resolved {
            order_id: order_id.clone(),
            outcome: PaymentOutcome::Failed,
        }
    );
    assert_eq!(
        h.session.orders().get(&order_id).unwrap().status,
        OrderStatus::Failed
    );
    assert_eq!(h.session.cart().item_count(), 1);
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn test_server_rejection_records_nothing() {
    let mut h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/orders/create-checkout/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "Sin stock"})))
        .mount(&h.server)
        .await;

    h.session.add_to_cart(ProductId::new("1"));
    let err = h.session.checkout(&mut h.checkout, &buyer()).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Server { status: 400, .. }));
    assert_eq!(h.checkout.state(), &CheckoutState::Idle);
    assert!(h.session.orders().is_empty());
    assert!(h.opener.opened().is_empty());

    let toast = h.toasts.last().unwrap();
    assert_eq!(toast.level, ToastLevel::Error);
    assert_eq!(toast.message, "Sin stock");
}

#[tokio::test]
async fn test_out_of_stock_cart_never_reaches_service() {
    let mut h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/orders/create-checkout/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    h.session.add_to_cart(ProductId::new("3"));
    let err = h.session.checkout(&mut h.checkout, &buyer()).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Validation(_)));
    assert!(h.session.orders().is_empty());
}

#[tokio::test]
async fn test_unconfirmed_payment_times_out_as_pending() {
    let mut h = harness().await;
    mount_create_checkout(
        &h.server,
        json!({"url": "https://pay.example/cs_55", "id": 55}),
    )
    .await;
    h.checkout = CheckoutOrchestrator::new(
        client_for(&h.server),
        h.opener.clone(),
        h.toasts.clone(),
    )
    .with_payment_timeout(Duration::from_millis(100));

    let hub = DeepLinkHub::new();
    let mut returns = PaymentReturnHandler::attach(&hub);

    h.session.add_to_cart(ProductId::new("1"));
    let order_id = h.session.checkout(&mut h.checkout, &buyer()).await.unwrap();
    let state = h.session.await_payment(&mut h.checkout, &mut returns).await;

    assert_eq!(
        state,
        CheckoutState::Abandoned {
            order_id: order_id.clone(),
            reason: AbandonReason::TimedOut,
        }
    );
    assert_eq!(
        h.session.orders().get(&order_id).unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(h.toasts.last().unwrap().level, ToastLevel::Warning);

    h.checkout.reset();
    assert_eq!(h.checkout.state(), &CheckoutState::Idle);
}

#[tokio::test]
async fn test_late_return_after_timeout_still_reconciles() {
    let mut h = harness().await;
    mount_create_checkout(
        &h.server,
        json!({"checkout_url": "https://pay.example/cs_12", "order_id": "12"}),
    )
    .await;
    h.checkout = CheckoutOrchestrator::new(
        client_for(&h.server),
        h.opener.clone(),
        h.toasts.clone(),
    )
    .with_payment_timeout(Duration::from_millis(50));

    let hub = DeepLinkHub::new();
    let mut returns = PaymentReturnHandler::attach(&hub);

    h.session.add_to_cart(ProductId::new("1"));
    let order_id = h.session.checkout(&mut h.checkout, &buyer()).await.unwrap();
    h.session.await_payment(&mut h.checkout, &mut returns).await;

    let view = h
        .session
        .handle_return_url(&mut h.checkout, "bioapp://payment-success?order_id=12");

    assert!(view.is_some());
    assert_eq!(
        h.session.orders().get(&order_id).unwrap().status,
        OrderStatus::Paid
    );
}
