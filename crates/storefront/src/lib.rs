//! bioApp storefront engine.
//!
//! Client-side state and protocol for the bioApp mobile storefront: the
//! product catalog, cart pricing, the checkout state machine that hands the
//! buyer off to a hosted payment page, and the return path that reconciles
//! local order history once the payment outcome arrives.
//!
//! # Architecture
//!
//! - [`catalog`] - Remote product list, swapped atomically on refresh
//! - [`cart`] - Cart lines, shipping selection, and totals
//! - [`checkout`] - `Idle -> Validating -> Submitting -> AwaitingExternalPayment -> ...`
//! - [`payment_return`] - Classifies return URLs and in-app payment messages
//! - [`orders`] - Append-only local order history
//! - [`deeplink`] - Return URL fan-out and the loopback listener
//! - [`session`] - Owns all mutable state for one buyer session
//!
//! Everything that talks to the outside world sits behind a seam: the order
//! service ([`api::StoreApi`]), the URL opener ([`checkout::UrlOpener`]),
//! and toast presentation ([`notify::Notifier`]).

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod account;
pub mod api;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod deeplink;
pub mod error;
pub mod notify;
pub mod orders;
pub mod payment_return;
pub mod session;
