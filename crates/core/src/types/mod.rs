//! Core types for cart synchronization.
//!
//! This module provides type-safe wrappers for carts, coupons and the
//! status values shared between the engine and its callers.

pub mod cart;
pub mod coupon;
pub mod id;
pub mod status;

pub use cart::{Cart, CartItem, CartMutationError, CartTotals, InvariantViolation};
pub use coupon::{Coupon, DiscountCap, DiscountType};
pub use id::*;
pub use status::*;
