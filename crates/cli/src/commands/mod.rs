//! Cart commands.
//!
//! Each invocation opens a session over the guest cart file and the cart API,
//! hydrates it, runs one command and waits for background work to settle
//! before exiting.

use std::sync::Arc;

use cart_sync_core::{Cart, CartItemId, Decimal};
use cart_sync_storefront::config::CartSyncConfig;
use cart_sync_storefront::gateway::{GatewayError, HttpCartGateway};
use cart_sync_storefront::models::AuthState;
use cart_sync_storefront::storage::{FileStorage, LocalCartStore};
use cart_sync_storefront::{AddToCart, CartError, CartService};
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The cart API client could not be built.
    #[error("Cart API client error: {0}")]
    Gateway(#[from] GatewayError),

    /// A cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Signing in needs a session cookie.
    #[error("Missing environment variable: CART_SESSION_COOKIE (required to sign in)")]
    MissingCredentials,
}

/// One CLI invocation's view of the cart.
pub struct Session {
    service: CartService,
    has_credentials: bool,
}

impl Session {
    /// Build the cart service from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn open(config: &CartSyncConfig, authenticated: bool) -> Result<Self, CommandError> {
        let gateway = HttpCartGateway::new(&config.api, config.sync.request_timeout)?;
        let local = LocalCartStore::new(Arc::new(FileStorage::new(&config.storage_dir)));
        let auth = if authenticated {
            AuthState::AUTHENTICATED
        } else {
            AuthState::ANONYMOUS
        };

        Ok(Self {
            service: CartService::new(Arc::new(gateway), local, config.sync, auth),
            has_credentials: config.api.session_cookie.is_some(),
        })
    }

    pub const fn require_credentials(&self) -> Result<(), CommandError> {
        if self.has_credentials {
            Ok(())
        } else {
            Err(CommandError::MissingCredentials)
        }
    }

    pub async fn show(&self) -> Result<(), CommandError> {
        let cart = self.service.hydrate().await?;
        self.print_cart(&cart);
        Ok(())
    }

    pub async fn add(
        &self,
        variant: String,
        quantity: u32,
        price: Decimal,
    ) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        self.service
            .add_to_cart(AddToCart::new(variant, quantity, price))
            .await?;
        self.finish().await;
        Ok(())
    }

    pub async fn update(&self, item: String, quantity: u32) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        self.service
            .update_cart_item(&CartItemId::new(item), quantity)
            .await?;
        self.finish().await;
        Ok(())
    }

    pub async fn remove(&self, item: String) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        self.service.remove_from_cart(&CartItemId::new(item)).await?;
        self.finish().await;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        self.service.clear_cart().await?;
        self.service.settle().await;
        tracing::info!("Cart cleared");
        Ok(())
    }

    pub async fn coupon(&self, code: &str) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        let coupon = self.service.verify_coupon(code).await?;
        self.service.settle().await;

        tracing::info!(
            "Coupon {} verified: -{} ({})",
            coupon.code,
            coupon.discount_amount,
            if coupon.is_discount_capped {
                "capped"
            } else {
                "not capped"
            }
        );
        if let Some(applied) = self.service.coupon() {
            tracing::info!("  Apply status: {:?}", applied.apply_status);
        }
        self.print_totals();
        Ok(())
    }

    pub async fn login(&self) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        let guest = self.service.item_count();
        tracing::info!("Signing in with {guest} guest item(s) on this device");

        let report = self.service.set_auth_state(AuthState::AUTHENTICATED).await?;
        match report {
            Some(report) if !report.skipped => {
                tracing::info!("Merged {} guest line(s) into the server cart", report.merged);
            }
            _ => tracing::info!("Nothing to merge"),
        }
        self.print_cart(&self.service.cart());
        Ok(())
    }

    pub async fn checkout(&self) -> Result<(), CommandError> {
        self.service.hydrate().await?;
        let summary = self.service.prepare_checkout().await?;
        self.print_cart(&summary.cart);
        if let Some(coupon) = &summary.coupon {
            tracing::info!("Coupon: {} ({:?})", coupon.code, coupon.apply_status);
        }
        tracing::info!("Ready for checkout: total {}", summary.totals.total);
        Ok(())
    }

    /// Wait for reconciliation, then print the settled cart.
    async fn finish(&self) {
        self.service.settle().await;
        self.print_cart(&self.service.cart());
    }

    fn print_cart(&self, cart: &Cart) {
        if cart.is_empty() {
            tracing::info!("Cart is empty");
            return;
        }
        tracing::info!("Cart ({} item(s)):", cart.total_quantity());
        for item in cart.items() {
            tracing::info!(
                "  {}  {} x{} @ {} = {}",
                item.id(),
                item.product_variant_id(),
                item.quantity(),
                item.price(),
                item.subtotal()
            );
        }
        self.print_totals();
    }

    fn print_totals(&self) {
        let totals = self.service.totals();
        tracing::info!("  Subtotal: {}", totals.subtotal);
        if !totals.discount.is_zero() {
            tracing::info!("  Discount: -{}", totals.discount);
        }
        tracing::info!("  Total:    {}", totals.total);
    }
}
