//! Remote cart and coupon API.
//!
//! # Architecture
//!
//! - [`CartGateway`] is the seam the cart service talks through; the server
//!   is the source of truth for authenticated carts
//! - [`HttpCartGateway`] speaks the JSON API over `reqwest`
//! - Responses are wrapped as `{success, data, message?}`; `success: false`
//!   becomes [`GatewayError::Rejected`]
//!
//! # Endpoints
//!
//! - `GET /cart` - full cart snapshot
//! - `POST /cart/add` - add a variant
//! - `PATCH /cart/update/:itemId` - set a line quantity
//! - `DELETE /cart/remove/:itemId` - remove a line
//! - `DELETE /cart/clear` - empty the cart
//! - `POST /coupons/verify` - compute a discount for a code
//! - `POST /coupons/apply` - persist a code on the cart

mod http;
pub mod types;

pub use http::HttpCartGateway;
pub use types::CouponVerification;

use std::time::Duration;

use async_trait::async_trait;
use cart_sync_core::{Cart, CartItemId, Decimal, VariantId};
use thiserror::Error;

/// Errors that can occur when calling the cart API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The call did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success status without a readable response envelope.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered `success: false`.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The session is not authenticated.
    #[error("unauthorized")]
    Unauthorized,

    /// Rate limited by the server.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response body could not be understood.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Operations the cart service needs from the server.
///
/// Mutations return nothing: their responses are fragments, and the service
/// always follows up with [`CartGateway::get_cart`] for the full state.
#[async_trait]
pub trait CartGateway: Send + Sync {
    /// Fetch the authoritative cart.
    async fn get_cart(&self) -> Result<Cart, GatewayError>;

    /// Add `quantity` of a variant.
    async fn add_item(&self, variant_id: &VariantId, quantity: u32) -> Result<(), GatewayError>;

    /// Set a line's quantity.
    async fn update_item(&self, item_id: &CartItemId, quantity: u32)
    -> Result<(), GatewayError>;

    /// Remove a line.
    async fn remove_item(&self, item_id: &CartItemId) -> Result<(), GatewayError>;

    /// Empty the cart.
    async fn clear_cart(&self) -> Result<(), GatewayError>;

    /// Compute the discount `code` gives on `cart_total`.
    async fn verify_coupon(
        &self,
        code: &str,
        cart_total: Decimal,
    ) -> Result<CouponVerification, GatewayError>;

    /// Persist `code` on the server cart.
    async fn apply_coupon(&self, code: &str) -> Result<(), GatewayError>;
}
