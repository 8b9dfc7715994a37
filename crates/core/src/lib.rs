//! bioApp Core - Shared types library.
//!
//! This crate provides common types used across all bioApp components:
//! - `storefront` - Catalog, cart, checkout and payment-return engine
//! - `cli` - Command-line driver for browsing and checking out
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients. This keeps it
//! lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, MXN prices, emails, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
