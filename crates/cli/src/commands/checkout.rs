//! Submit a cart and wait for the hosted payment page to come back.
//!
//! Return URLs reach the CLI through a loopback HTTP listener bound to
//! `STOREFRONT_RETURN_HOST:STOREFRONT_RETURN_PORT`.

use bioapp_core::{PaymentOutcome, ShippingMethod};
use bioapp_storefront::checkout::{BuyerInfo, CheckoutOrchestrator, CheckoutState};
use bioapp_storefront::config::StorefrontConfig;
use bioapp_storefront::deeplink::{DeepLinkHub, serve_loopback};
use bioapp_storefront::error::CheckoutError;
use bioapp_storefront::notify::{Notifier, TracingNotifier};
use bioapp_storefront::payment_return::PaymentReturnHandler;
use bioapp_storefront::session::Session;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;

use crate::browser::Browser;

pub struct CheckoutArgs {
    pub product_ids: Vec<String>,
    pub shipping: ShippingMethod,
    pub full_name: String,
    pub email: String,
    pub address: String,
    pub open_browser: bool,
}

pub async fn run(
    config: &StorefrontConfig,
    args: CheckoutArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (api, store) = super::load_catalog(config).await?;
    let mut session = Session::from_config(store, config);
    super::quote::fill_cart(&mut session, &args.product_ids, args.shipping);
    super::quote::log_draft(&session.totals());

    let buyer = match BuyerInfo::new(&args.full_name, &args.email, &args.address) {
        Ok(buyer) => buyer,
        Err(e) => {
            let err = CheckoutError::from(e);
            TracingNotifier.show(err.toast());
            return Err(err.into());
        }
    };

    let hub = DeepLinkHub::new();
    let listener = TcpListener::bind(config.return_addr()).await?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_loopback(listener, hub.clone(), async move {
        let _ = stop_rx.await;
    }));

    let mut returns = PaymentReturnHandler::attach(&hub);
    let opener = if args.open_browser {
        Browser::System
    } else {
        Browser::LogOnly
    };
    let mut checkout = CheckoutOrchestrator::from_config(api, opener, TracingNotifier, config);

    let result = match session.checkout(&mut checkout, &buyer).await {
        Ok(order_id) => {
            tracing::info!(order_id = %order_id, "Waiting for payment (Ctrl+C to stop)");

            let finished = tokio::select! {
                state = session.await_payment(&mut checkout, &mut returns) => Some(state),
                () = shutdown_signal() => None,
            };
            if finished.is_none() {
                checkout.cancel();
            }

            let status = session.orders().get(&order_id).map(|order| order.status);
            tracing::info!(order_id = %order_id, ?status, "{}", outcome_summary(checkout.state()));
            Ok(())
        }
        Err(e) => Err(e.into()),
    };

    drop(returns);
    let _ = stop_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Loopback listener failed"),
        Err(e) => tracing::warn!(error = %e, "Loopback listener task failed"),
    }

    result
}

/// One-line description of where the checkout ended.
fn outcome_summary(state: &CheckoutState) -> String {
    match state {
        CheckoutState::Resolved {
            order_id,
            outcome: PaymentOutcome::Paid,
        } => format!("Order {order_id} paid"),
        CheckoutState::Resolved { order_id, .. } => format!("Payment for order {order_id} failed"),
        CheckoutState::Abandoned { order_id, reason } => {
            format!("Order {order_id} left pending ({reason:?})")
        }
        other => format!("Checkout stopped in state {other:?}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
