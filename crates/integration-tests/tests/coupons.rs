//! Integration tests for coupon verification, capping and checkout.

#![allow(clippy::unwrap_used)]

use cart_sync_core::{CouponApplyStatus, Decimal, DiscountType};
use cart_sync_integration_tests::{cart_service, price};
use cart_sync_storefront::models::AuthState;
use cart_sync_storefront::testing::InMemoryCartGateway;
use cart_sync_storefront::{AddToCart, CartError, CartService};

async fn authenticated_with_subtotal(gateway: &InMemoryCartGateway, subtotal: i64) -> CartService {
    gateway.seed_item("V1", subtotal, 1);
    let (service, _) = cart_service(gateway, AuthState::AUTHENTICATED);
    service.hydrate().await.unwrap();
    service
}

// =============================================================================
// Capping
// =============================================================================

#[tokio::test]
async fn test_fixed_discount_equal_to_subtotal_is_capped() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("FLAT1000", DiscountType::FixedAmount, price(1000));
    let service = authenticated_with_subtotal(&gateway, 1000).await;

    let coupon = service.verify_coupon("FLAT1000").await.unwrap();

    assert_eq!(coupon.discount_amount, price(900));
    assert_eq!(coupon.final_amount, price(100));
    assert!(coupon.is_discount_capped);
    let totals = service.totals();
    assert_eq!(totals.discount, price(900));
    assert_eq!(totals.total, price(100));
}

#[tokio::test]
async fn test_large_percentage_is_capped() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("NINETYFIVE", DiscountType::Percentage, Decimal::from(95));
    let service = authenticated_with_subtotal(&gateway, 1000).await;

    let coupon = service.verify_coupon("ninetyfive").await.unwrap();

    assert_eq!(coupon.discount_amount, price(900));
    assert!(coupon.is_discount_capped);
    assert_eq!(coupon.code, "NINETYFIVE");
}

#[tokio::test]
async fn test_percentage_at_cap_is_not_flagged() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("NINETY", DiscountType::Percentage, Decimal::from(90));
    let service = authenticated_with_subtotal(&gateway, 1000).await;

    let coupon = service.verify_coupon("NINETY").await.unwrap();

    assert_eq!(coupon.discount_amount, price(900));
    assert!(!coupon.is_discount_capped);
}

#[tokio::test]
async fn test_fixed_coupon_recapped_when_cart_shrinks() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("FIFTY", DiscountType::FixedAmount, price(50));
    let id = gateway.seed_item("V1", 100, 2);
    let (service, _) = cart_service(&gateway, AuthState::AUTHENTICATED);
    service.hydrate().await.unwrap();

    let coupon = service.verify_coupon("FIFTY").await.unwrap();
    assert_eq!(coupon.discount_amount, price(50));
    assert!(!coupon.is_discount_capped);

    service.update_cart_item(&id, 1).await.unwrap();
    service.settle().await;

    let coupon = service.coupon().unwrap();
    assert_eq!(coupon.discount_amount, price(50));
    assert_eq!(coupon.final_amount, price(50));

    gateway.set_price("V9", Decimal::new(5, 0));
    service.remove_from_cart(&id).await.unwrap();
    service
        .add_to_cart(AddToCart::new("V9", 10, price(5)))
        .await
        .unwrap();
    service.settle().await;

    let coupon = service.coupon().unwrap();
    assert_eq!(coupon.discount_amount, price(45));
    assert!(coupon.is_discount_capped);
    assert_eq!(service.totals().total, price(5));
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_coupon_on_empty_cart_is_rejected() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10));
    let (service, _) = cart_service(&gateway, AuthState::AUTHENTICATED);
    service.hydrate().await.unwrap();

    let err = service.verify_coupon("SAVE10").await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert_eq!(gateway.calls().verify_coupon, 0);
}

#[tokio::test]
async fn test_invalid_code_leaves_previous_coupon() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10));
    let service = authenticated_with_subtotal(&gateway, 200).await;
    service.verify_coupon("SAVE10").await.unwrap();

    let err = service.verify_coupon("BOGUS").await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert_eq!(service.coupon().unwrap().code, "SAVE10");
}

// =============================================================================
// Apply and checkout
// =============================================================================

#[tokio::test]
async fn test_apply_failure_surfaces_at_checkout() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10));
    gateway.fail_coupon_apply(true);
    let service = authenticated_with_subtotal(&gateway, 1000).await;

    // Verification succeeds even though the apply will fail
    let coupon = service.verify_coupon("SAVE10").await.unwrap();
    assert_eq!(coupon.apply_status, CouponApplyStatus::Pending);
    service.settle().await;
    assert_eq!(
        service.coupon().unwrap().apply_status,
        CouponApplyStatus::Failed
    );
    assert_eq!(service.totals().total, price(900));

    let err = service.prepare_checkout().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(gateway.calls().apply_coupon, 2);

    gateway.fail_coupon_apply(false);
    let summary = service.prepare_checkout().await.unwrap();
    assert_eq!(
        summary.coupon.unwrap().apply_status,
        CouponApplyStatus::Applied
    );
    assert_eq!(summary.totals.total, price(900));
    assert_eq!(gateway.applied_coupon().as_deref(), Some("SAVE10"));
}

#[tokio::test]
async fn test_checkout_skips_apply_when_already_applied() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10));
    let service = authenticated_with_subtotal(&gateway, 500).await;
    service.verify_coupon("SAVE10").await.unwrap();

    let summary = service.prepare_checkout().await.unwrap();

    assert_eq!(gateway.calls().apply_coupon, 1);
    assert_eq!(summary.totals.discount, price(50));
    assert_eq!(summary.cart, gateway.server_cart());
}

#[tokio::test]
async fn test_guest_coupon_applied_after_sign_in() {
    let gateway = InMemoryCartGateway::new();
    gateway.set_price("V1", price(400));
    gateway.add_coupon("WELCOME", DiscountType::FixedAmount, price(40));
    let (service, _) = cart_service(&gateway, AuthState::ANONYMOUS);
    service.hydrate().await.unwrap();
    service
        .add_to_cart(AddToCart::new("V1", 1, price(400)))
        .await
        .unwrap();

    service.verify_coupon("welcome").await.unwrap();
    service.settle().await;
    assert_eq!(gateway.calls().apply_coupon, 0);
    assert_eq!(
        service.coupon().unwrap().apply_status,
        CouponApplyStatus::Pending
    );

    service.set_auth_state(AuthState::AUTHENTICATED).await.unwrap();
    let summary = service.prepare_checkout().await.unwrap();

    assert_eq!(gateway.calls().apply_coupon, 1);
    assert_eq!(gateway.applied_coupon().as_deref(), Some("WELCOME"));
    assert_eq!(summary.totals.total, price(360));
}

#[tokio::test]
async fn test_coupon_cleared_by_clear_and_logout() {
    let gateway = InMemoryCartGateway::new();
    gateway.add_coupon("SAVE10", DiscountType::Percentage, Decimal::from(10));
    let service = authenticated_with_subtotal(&gateway, 1000).await;

    service.verify_coupon("SAVE10").await.unwrap();
    service.clear_cart().await.unwrap();
    service.settle().await;
    assert!(service.coupon().is_none());
    assert_eq!(service.totals().discount, Decimal::ZERO);

    gateway.seed_item("V2", 300, 1);
    service.fetch_cart().await.unwrap();
    service.verify_coupon("SAVE10").await.unwrap();
    service.settle().await;

    service.set_auth_state(AuthState::ANONYMOUS).await.unwrap();
    assert!(service.coupon().is_none());
    assert!(service.snapshot().coupon.is_none());
}
