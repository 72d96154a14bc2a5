//! Cart sync engine.
//!
//! Keeps a shopper's cart consistent across the guest cart stored on the
//! device and the authenticated cart held by the cart API, merging the two
//! when the shopper signs in.
//!
//! # Modules
//!
//! - `config` - Environment configuration
//! - `error` - Error taxonomy and Sentry breadcrumbs
//! - `gateway` - Cart API client trait and HTTP implementation
//! - `models` - Authentication signal and storage keys
//! - `services` - The cart service
//! - `storage` - Device-local storage and the guest cart

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod services;
pub mod storage;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{CartError, MergeError, MergeFailure, Result};
pub use services::{AddToCart, CartService, CartSnapshot, CheckoutSummary, MergeReport};
