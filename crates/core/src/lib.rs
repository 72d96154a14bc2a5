//! Cart Sync Core - Shared types library.
//!
//! This crate provides the domain types used across all Cart Sync components:
//! - `storefront` - Cart synchronization engine (guest and server carts)
//! - `cli` - Command-line driver for the engine
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, carts, coupons and status enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub use rust_decimal::Decimal;

pub mod types;

pub use types::*;
