//! Return URL delivery.
//!
//! The platform hands return URLs to the app in two ways: once at cold start
//! (the URL the app was launched with) and as live events afterwards.
//! [`DeepLinkHub`] models both. Hosts without an OS deep-link mechanism run
//! [`serve_loopback`], a local HTTP listener whose requests are republished
//! as return URLs.
//!
//! Each [`ReturnSubscription`] is a scoped listener; dropping it deregisters.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::payment_return::{ReturnOutcome, classify};

const CHANNEL_CAPACITY: usize = 16;

/// Fan-out point for return URLs.
///
/// Cloning is cheap; all clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct DeepLinkHub {
    sender: broadcast::Sender<String>,
    initial_url: Arc<Mutex<Option<String>>>,
}

impl Default for DeepLinkHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepLinkHub {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            initial_url: Arc::new(Mutex::new(None)),
        }
    }

    /// A hub whose app was launched with `url`.
    #[must_use]
    pub fn with_initial_url(url: impl Into<String>) -> Self {
        let hub = Self::new();
        *hub.lock_initial() = Some(url.into());
        hub
    }

    /// Take the launch URL. Only the first caller gets it.
    pub fn take_initial_url(&self) -> Option<String> {
        self.lock_initial().take()
    }

    /// Deliver a URL to every live subscriber. Returns how many received it.
    pub fn publish(&self, url: impl Into<String>) -> usize {
        let url = url.into();
        match self.sender.send(url) {
            Ok(receivers) => {
                debug!(receivers, "Published return URL");
                receivers
            }
            Err(broadcast::error::SendError(url)) => {
                warn!(%url, "Return URL received with no listener attached");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> ReturnSubscription {
        ReturnSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn lock_initial(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.initial_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered return URL listener.
#[derive(Debug)]
pub struct ReturnSubscription {
    receiver: broadcast::Receiver<String>,
}

impl ReturnSubscription {
    /// Wait for the next URL. Returns `None` once every hub is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(url) => return Some(url),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Return listener fell behind; dropped URLs");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

// =============================================================================
// Loopback listener
// =============================================================================

#[derive(Clone)]
struct LoopbackState {
    hub: DeepLinkHub,
    origin: String,
}

/// Router that republishes every request URL to `hub`.
///
/// `origin` (e.g. `http://127.0.0.1:8787`) is prefixed to the request path
/// to rebuild the full URL.
pub fn loopback_router(hub: DeepLinkHub, origin: impl Into<String>) -> Router {
    let state = LoopbackState {
        hub,
        origin: origin.into(),
    };

    Router::new()
        .route("/health", get(health))
        .fallback(capture_return)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the loopback listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read or the server
/// fails.
pub async fn serve_loopback(
    listener: TcpListener,
    hub: DeepLinkHub,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let origin = format!("http://{}", listener.local_addr()?);
    info!(%origin, "Listening for payment returns");

    axum::serve(listener, loopback_router(hub, origin))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn capture_return(
    State(state): State<LoopbackState>,
    uri: Uri,
) -> (StatusCode, &'static str) {
    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), ToString::to_string);
    let url = format!("{}{path}", state.origin);

    let page = match classify(&url) {
        ReturnOutcome::Success { .. } => {
            "Payment received. You can close this window and return to the app."
        }
        ReturnOutcome::Failure { .. } => {
            "Payment was not completed. You can close this window and try again from the app."
        }
        ReturnOutcome::Ignored => {
            debug!(%url, "Loopback request is not a payment return");
            return (StatusCode::NOT_FOUND, "Not a payment return.");
        }
    };

    if state.hub.publish(url) == 0 {
        warn!("Payment return arrived with no listener attached");
    }
    (StatusCode::OK, page)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_initial_url_taken_once() {
        let hub = DeepLinkHub::with_initial_url("bioapp://payment-success?order_id=1");
        let clone = hub.clone();

        assert_eq!(
            clone.take_initial_url().as_deref(),
            Some("bioapp://payment-success?order_id=1")
        );
        assert!(hub.take_initial_url().is_none());
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let hub = DeepLinkHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish("bioapp://x"), 2);
        assert_eq!(a.recv().await.as_deref(), Some("bioapp://x"));
        assert_eq!(b.recv().await.as_deref(), Some("bioapp://x"));
    }

    #[test]
    fn test_dropping_subscription_deregisters() {
        let hub = DeepLinkHub::new();
        let subscription = hub.subscribe();
        assert_eq!(hub.listener_count(), 1);

        drop(subscription);
        assert_eq!(hub.listener_count(), 0);
        assert_eq!(hub.publish("bioapp://nobody"), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_hub_dropped() {
        let hub = DeepLinkHub::new();
        let mut subscription = hub.subscribe();
        drop(hub);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_loopback_republishes_requests() {
        let hub = DeepLinkHub::new();
        let mut subscription = hub.subscribe();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_loopback(listener, hub.clone(), async {
            stopped.await.ok();
        }));

        let body = reqwest::get(format!("http://{addr}/payment-success?order_id=42"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("Payment received"));

        let url = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(url, format!("http://{addr}/payment-success?order_id=42"));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_loopback_page_follows_return_outcome() {
        let hub = DeepLinkHub::new();
        let mut subscription = hub.subscribe();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_loopback(listener, hub.clone(), async {
            stopped.await.ok();
        }));

        let failed = reqwest::get(format!("http://{addr}/checkout/return?status=failed&order_id=7"))
            .await
            .unwrap();
        assert_eq!(failed.status(), reqwest::StatusCode::OK);
        let body = failed.text().await.unwrap();
        assert!(body.contains("not completed"));
        assert!(!body.contains("Payment received"));

        let favicon = reqwest::get(format!("http://{addr}/favicon.ico")).await.unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        let url = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(url, format!("http://{addr}/checkout/return?status=failed&order_id=7"));
        assert_eq!(hub.publish("bioapp://next"), 1);
        assert_eq!(subscription.recv().await.as_deref(), Some("bioapp://next"));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
