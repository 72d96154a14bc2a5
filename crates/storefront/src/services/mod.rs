//! Business logic services.
//!
//! # Services
//!
//! - `cart` - Cart state container, guest cart merge and coupons

pub mod cart;

pub use cart::{
    AddToCart, CartService, CartSnapshot, CartVersion, CheckoutSummary, MergeCoordinator,
    MergeReport,
};
