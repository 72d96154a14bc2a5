//! Coupon verification, background apply and checkout preparation.

use cart_sync_core::{Cart, CartTotals, Coupon, CouponApplyStatus};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{CartService, totals_for};
use crate::error::{CartError, Result, add_breadcrumb};

/// Everything the checkout step needs, taken after background work settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub cart: Cart,
    pub coupon: Option<Coupon>,
    pub totals: CartTotals,
}

/// Canonical form of a coupon code.
fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl CartService {
    /// Verify a coupon code against the current subtotal.
    ///
    /// The verified coupon is stored immediately with its discount capped
    /// locally. While authenticated, the coupon is then applied to the server
    /// cart in the background; the outcome shows up as the coupon's
    /// [`CouponApplyStatus`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty code, an empty cart, or a
    /// code the server rejects.
    #[instrument(skip(self))]
    pub async fn verify_coupon(&self, code: &str) -> Result<Coupon> {
        self.ensure_not_merging()?;
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(CartError::Validation("coupon code is required".to_string()));
        }

        let subtotal = {
            let state = self.state();
            if state.cart.is_empty() {
                return Err(CartError::Validation(
                    "cannot apply a coupon to an empty cart".to_string(),
                ));
            }
            state.cart.subtotal()
        };

        add_breadcrumb("coupon", "Verifying coupon", Some(&[("code", code.as_str())]));
        let verification = self
            .call(self.inner.gateway.verify_coupon(&code, subtotal))
            .await?;

        let coupon = Coupon::verified(
            verification.id,
            verification.code,
            verification.discount_type,
            verification.discount_value,
            verification.discount_amount,
            subtotal,
            self.inner.settings.discount_cap,
        );

        let (coupon, authenticated) = {
            let mut state = self.state();
            if state.cart.is_empty() {
                return Err(CartError::Validation(
                    "cart was emptied while the coupon was verified".to_string(),
                ));
            }
            state.coupon = Some(coupon);
            self.publish(&mut state);
            (state.coupon.clone(), state.auth.authenticated)
        };
        let coupon = coupon.ok_or_else(|| {
            CartError::Validation("coupon was cleared while it was verified".to_string())
        })?;

        info!(
            code = %coupon.code,
            discount = %coupon.discount_amount,
            capped = coupon.is_discount_capped,
            "Coupon verified"
        );

        if authenticated {
            self.spawn_apply(coupon.code.clone());
        }
        Ok(coupon)
    }

    /// Drop the active coupon. Local only.
    pub fn remove_coupon(&self) {
        let mut state = self.state();
        if state.coupon.take().is_some() {
            add_breadcrumb("coupon", "Removed coupon", None);
            self.publish(&mut state);
        }
    }

    /// Settle background work and make sure the coupon reached the server
    /// cart before checkout.
    ///
    /// # Errors
    ///
    /// Returns `MergeInProgress` while a merge holds the cart, or the apply
    /// error if the coupon still cannot be applied.
    #[instrument(skip(self))]
    pub async fn prepare_checkout(&self) -> Result<CheckoutSummary> {
        self.ensure_not_merging()?;
        self.settle().await;

        let pending = {
            let state = self.state();
            state
                .coupon
                .as_ref()
                .filter(|c| state.auth.authenticated && c.apply_status != CouponApplyStatus::Applied)
                .map(|c| c.code.clone())
        };

        if let Some(code) = pending {
            info!(code = %code, "Re-applying coupon before checkout");
            let result = self.call(self.inner.gateway.apply_coupon(&code)).await;
            let status = if result.is_ok() {
                CouponApplyStatus::Applied
            } else {
                CouponApplyStatus::Failed
            };
            self.set_coupon_status(&code, status);
            result?;
        }

        let state = self.state();
        Ok(CheckoutSummary {
            cart: state.cart.clone(),
            coupon: state.coupon.clone(),
            totals: totals_for(&state),
        })
    }

    /// Persist the coupon on the server cart without blocking the caller.
    fn spawn_apply(&self, code: String) {
        let service = self.clone();
        self.spawn_background(async move {
            let status = match service.call(service.inner.gateway.apply_coupon(&code)).await {
                Ok(()) => CouponApplyStatus::Applied,
                Err(e) => {
                    warn!(code = %code, error = %e, "Background coupon apply failed");
                    CouponApplyStatus::Failed
                }
            };
            service.set_coupon_status(&code, status);
        });
    }

    fn set_coupon_status(&self, code: &str, status: CouponApplyStatus) {
        let mut state = self.state();
        let updated = match state.coupon.as_mut() {
            Some(coupon) if coupon.code == code => {
                coupon.apply_status = status;
                true
            }
            _ => false,
        };
        if updated {
            self.publish(&mut state);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use cart_sync_core::{Decimal, DiscountType};

    use super::*;
    use crate::config::SyncSettings;
    use crate::models::AuthState;
    use crate::storage::{LocalCartStore, MemoryStorage};
    use crate::testing::InMemoryCartGateway;

    async fn service_with_cart(gateway: &InMemoryCartGateway, subtotal: i64) -> CartService {
        gateway.seed_item("V1", subtotal, 1);
        let service = CartService::new(
            Arc::new(gateway.clone()),
            LocalCartStore::new(Arc::new(MemoryStorage::new())),
            SyncSettings::default(),
            AuthState::AUTHENTICATED,
        );
        service.hydrate().await.unwrap();
        service
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  save10 "), "SAVE10");
        assert_eq!(normalize_code("   "), "");
    }

    #[tokio::test]
    async fn test_fixed_coupon_is_capped() {
        let gateway = InMemoryCartGateway::new();
        gateway.add_coupon("SAVE1000", DiscountType::FixedAmount, Decimal::from(1000));
        let service = service_with_cart(&gateway, 1000).await;

        let coupon = service.verify_coupon("save1000").await.unwrap();

        assert_eq!(coupon.discount_amount, Decimal::from(900));
        assert_eq!(coupon.final_amount, Decimal::from(100));
        assert!(coupon.is_discount_capped);
        assert_eq!(service.totals().total, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_empty_code_makes_no_call() {
        let gateway = InMemoryCartGateway::new();
        let service = service_with_cart(&gateway, 1000).await;

        let err = service.verify_coupon("  ").await.unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
        assert_eq!(gateway.calls().verify_coupon, 0);
    }

    #[tokio::test]
    async fn test_unknown_code_is_validation_error() {
        let gateway = InMemoryCartGateway::new();
        let service = service_with_cart(&gateway, 1000).await;

        let err = service.verify_coupon("NOPE").await.unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
        assert!(service.coupon().is_none());
    }

    #[tokio::test]
    async fn test_background_apply_marks_coupon_applied() {
        let gateway = InMemoryCartGateway::new();
        gateway.add_coupon("TENOFF", DiscountType::Percentage, Decimal::from(10));
        let service = service_with_cart(&gateway, 1000).await;

        let coupon = service.verify_coupon("TENOFF").await.unwrap();
        assert_eq!(coupon.discount_amount, Decimal::from(100));

        service.settle().await;
        assert_eq!(
            service.coupon().unwrap().apply_status,
            CouponApplyStatus::Applied
        );
        assert_eq!(gateway.applied_coupon().as_deref(), Some("TENOFF"));
    }

    #[tokio::test]
    async fn test_failed_apply_is_not_surfaced_until_checkout() {
        let gateway = InMemoryCartGateway::new();
        gateway.add_coupon("TENOFF", DiscountType::Percentage, Decimal::from(10));
        gateway.fail_coupon_apply(true);
        let service = service_with_cart(&gateway, 1000).await;

        service.verify_coupon("TENOFF").await.unwrap();
        service.settle().await;
        assert_eq!(
            service.coupon().unwrap().apply_status,
            CouponApplyStatus::Failed
        );

        assert!(service.prepare_checkout().await.is_err());

        gateway.fail_coupon_apply(false);
        let summary = service.prepare_checkout().await.unwrap();
        assert_eq!(
            summary.coupon.unwrap().apply_status,
            CouponApplyStatus::Applied
        );
        assert_eq!(summary.totals.total, Decimal::from(900));
    }

    #[tokio::test]
    async fn test_remove_coupon_restores_total() {
        let gateway = InMemoryCartGateway::new();
        gateway.add_coupon("TENOFF", DiscountType::Percentage, Decimal::from(10));
        let service = service_with_cart(&gateway, 1000).await;
        service.verify_coupon("TENOFF").await.unwrap();

        service.remove_coupon();

        assert!(service.coupon().is_none());
        assert_eq!(service.totals().total, Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_percentage_coupon_follows_subtotal() {
        let gateway = InMemoryCartGateway::new();
        gateway.add_coupon("TENOFF", DiscountType::Percentage, Decimal::from(10));
        gateway.seed_item("V2", 500, 1);
        let service = service_with_cart(&gateway, 1000).await;
        service.verify_coupon("TENOFF").await.unwrap();
        service.settle().await;

        let line = service
            .cart()
            .item_for_variant(&"V2".into())
            .unwrap()
            .id()
            .clone();
        service.remove_from_cart(&line).await.unwrap();
        service.settle().await;

        assert_eq!(service.coupon().unwrap().discount_amount, Decimal::from(100));
        assert_eq!(service.totals().total, Decimal::from(900));
    }
}
