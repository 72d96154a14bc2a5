//! Test support: an in-memory cart API.
//!
//! Available to this crate's tests and, with the `test-util` feature, to
//! other crates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cart_sync_core::{Cart, CartItemId, CouponId, Decimal, DiscountType, VariantId};

use crate::gateway::{CartGateway, CouponVerification, GatewayError};

/// How many times each endpoint was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub get_cart: usize,
    pub add_item: usize,
    pub update_item: usize,
    pub remove_item: usize,
    pub clear_cart: usize,
    pub verify_coupon: usize,
    pub apply_coupon: usize,
}

#[derive(Default)]
struct ServerState {
    cart: Cart,
    next_line: u64,
    prices: HashMap<VariantId, Decimal>,
    coupons: HashMap<String, (DiscountType, Decimal)>,
    applied_coupon: Option<String>,
    rejected_variants: HashMap<VariantId, String>,
    fail_fetches: bool,
    fail_item_updates: Option<String>,
    fail_coupon_apply: bool,
    delay: Option<Duration>,
    calls: GatewayCalls,
}

impl ServerState {
    fn next_line_id(&mut self) -> CartItemId {
        self.next_line += 1;
        CartItemId::new(format!("line_{}", self.next_line))
    }
}

/// Simulated server cart with per-variant prices, a coupon table and
/// failure injection.
///
/// Clones share the same server state.
#[derive(Clone, Default)]
pub struct InMemoryCartGateway {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryCartGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a line directly into the server cart, returning its ID.
    ///
    /// Also registers `price` for the variant.
    ///
    /// # Panics
    ///
    /// Panics if `quantity` is zero or `price` is negative.
    #[allow(clippy::expect_used)]
    pub fn seed_item(&self, variant_id: &str, price: i64, quantity: u32) -> CartItemId {
        let mut state = self.state();
        let variant_id = VariantId::new(variant_id);
        let price = Decimal::from(price);
        state.prices.insert(variant_id.clone(), price);
        let id = state.next_line_id();
        state
            .cart
            .add_or_increment(&variant_id, price, quantity, || id)
            .expect("seeded line should be valid")
    }

    /// Register the server price of a variant. Unpriced variants cannot be
    /// added.
    pub fn set_price(&self, variant_id: &str, price: Decimal) {
        self.state().prices.insert(VariantId::new(variant_id), price);
    }

    pub fn add_coupon(&self, code: &str, discount_type: DiscountType, value: Decimal) {
        self.state()
            .coupons
            .insert(code.to_uppercase(), (discount_type, value));
    }

    /// Reject every add of `variant_id` with `reason`.
    pub fn reject_variant(&self, variant_id: &str, reason: &str) {
        self.state()
            .rejected_variants
            .insert(VariantId::new(variant_id), reason.to_string());
    }

    pub fn accept_variant(&self, variant_id: &str) {
        self.state()
            .rejected_variants
            .remove(&VariantId::new(variant_id));
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.state().fail_fetches = fail;
    }

    /// Fail item updates and removals with a server error.
    pub fn fail_item_updates(&self, reason: &str) {
        self.state().fail_item_updates = Some(reason.to_string());
    }

    pub fn restore_item_updates(&self) {
        self.state().fail_item_updates = None;
    }

    pub fn fail_coupon_apply(&self, fail: bool) {
        self.state().fail_coupon_apply = fail;
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn clear_delay(&self) {
        self.state().delay = None;
    }

    #[must_use]
    pub fn calls(&self) -> GatewayCalls {
        self.state().calls
    }

    #[must_use]
    pub fn server_cart(&self) -> Cart {
        self.state().cart.clone()
    }

    #[must_use]
    pub fn applied_coupon(&self) -> Option<String> {
        self.state().applied_coupon.clone()
    }

    async fn pause(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn unavailable(reason: &str) -> GatewayError {
    GatewayError::Status {
        status: 503,
        body: reason.to_string(),
    }
}

#[async_trait]
impl CartGateway for InMemoryCartGateway {
    async fn get_cart(&self) -> Result<Cart, GatewayError> {
        self.state().calls.get_cart += 1;
        self.pause().await;
        let state = self.state();
        if state.fail_fetches {
            return Err(unavailable("cart service unavailable"));
        }
        Ok(state.cart.clone())
    }

    async fn add_item(&self, variant_id: &VariantId, quantity: u32) -> Result<(), GatewayError> {
        self.state().calls.add_item += 1;
        self.pause().await;
        let mut state = self.state();
        if let Some(reason) = state.rejected_variants.get(variant_id) {
            return Err(GatewayError::Rejected(reason.clone()));
        }
        let price = *state
            .prices
            .get(variant_id)
            .ok_or_else(|| GatewayError::Rejected(format!("Product variant {variant_id} not found")))?;
        let id = state.next_line_id();
        state
            .cart
            .add_or_increment(variant_id, price, quantity, || id)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        Ok(())
    }

    async fn update_item(&self, item_id: &CartItemId, quantity: u32) -> Result<(), GatewayError> {
        self.state().calls.update_item += 1;
        self.pause().await;
        let mut state = self.state();
        if let Some(reason) = &state.fail_item_updates {
            return Err(unavailable(reason));
        }
        state
            .cart
            .set_quantity(item_id, quantity)
            .map_err(|_| GatewayError::Rejected("Cart item not found".to_string()))
    }

    async fn remove_item(&self, item_id: &CartItemId) -> Result<(), GatewayError> {
        self.state().calls.remove_item += 1;
        self.pause().await;
        let mut state = self.state();
        if let Some(reason) = &state.fail_item_updates {
            return Err(unavailable(reason));
        }
        state
            .cart
            .remove(item_id)
            .map(|_| ())
            .map_err(|_| GatewayError::Rejected("Cart item not found".to_string()))
    }

    async fn clear_cart(&self) -> Result<(), GatewayError> {
        self.state().calls.clear_cart += 1;
        self.pause().await;
        let mut state = self.state();
        state.cart.clear();
        state.applied_coupon = None;
        Ok(())
    }

    async fn verify_coupon(
        &self,
        code: &str,
        cart_total: Decimal,
    ) -> Result<CouponVerification, GatewayError> {
        self.state().calls.verify_coupon += 1;
        self.pause().await;
        let state = self.state();
        let (discount_type, discount_value) = *state
            .coupons
            .get(code)
            .ok_or_else(|| GatewayError::Rejected("Invalid coupon code".to_string()))?;
        let discount_amount = match discount_type {
            DiscountType::Percentage => {
                (cart_total * discount_value / Decimal::ONE_HUNDRED).round_dp(2)
            }
            DiscountType::FixedAmount => discount_value,
        };
        Ok(CouponVerification {
            id: CouponId::new(format!("cpn_{}", code.to_lowercase())),
            code: code.to_string(),
            discount_type,
            discount_value,
            discount_amount,
            final_amount: cart_total - discount_amount,
        })
    }

    async fn apply_coupon(&self, code: &str) -> Result<(), GatewayError> {
        self.state().calls.apply_coupon += 1;
        self.pause().await;
        let mut state = self.state();
        if state.fail_coupon_apply {
            return Err(unavailable("coupon service unavailable"));
        }
        if !state.coupons.contains_key(code) {
            return Err(GatewayError::Rejected("Invalid coupon code".to_string()));
        }
        state.applied_coupon = Some(code.to_string());
        Ok(())
    }
}
