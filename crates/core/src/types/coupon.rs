//! Coupon and discount types.
//!
//! The server computes a discount when a code is verified; the client then
//! re-applies the cap locally, so the displayed discount never exceeds a fixed
//! share of the cart subtotal regardless of what the server returned.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::CouponId;
use super::status::CouponApplyStatus;

/// How a coupon's `discount_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discount_value` is a percentage of the subtotal.
    Percentage,
    /// `discount_value` is an absolute amount.
    FixedAmount,
}

/// Upper bound on a discount, as a share of the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountCap {
    ratio: Decimal,
}

impl Default for DiscountCap {
    fn default() -> Self {
        Self {
            ratio: Self::DEFAULT_RATIO,
        }
    }
}

impl DiscountCap {
    /// 90% of the subtotal.
    pub const DEFAULT_RATIO: Decimal = Decimal::from_parts(9, 0, 0, false, 1);

    /// Create a cap from a ratio in `(0, 1]`.
    ///
    /// Returns `None` if the ratio is out of range.
    #[must_use]
    pub fn new(ratio: Decimal) -> Option<Self> {
        (ratio > Decimal::ZERO && ratio <= Decimal::ONE).then_some(Self { ratio })
    }

    #[must_use]
    pub const fn ratio(&self) -> Decimal {
        self.ratio
    }

    /// Largest discount allowed against `subtotal`.
    #[must_use]
    pub fn max_discount(&self, subtotal: Decimal) -> Decimal {
        (subtotal * self.ratio).round_dp(2)
    }

    /// Clamp `discount` for `subtotal`, returning the amount and whether it
    /// was capped.
    ///
    /// A fixed amount is flagged as soon as it reaches the cap; a percentage
    /// only when it goes past it.
    #[must_use]
    pub fn apply(
        &self,
        discount_type: DiscountType,
        discount: Decimal,
        subtotal: Decimal,
    ) -> (Decimal, bool) {
        let max = self.max_discount(subtotal);
        let discount = discount.max(Decimal::ZERO);
        let capped = match discount_type {
            DiscountType::FixedAmount => discount >= max,
            DiscountType::Percentage => discount > max,
        };
        if capped { (max, true) } else { (discount, false) }
    }
}

/// A verified coupon as displayed against the current cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: CouponId,
    pub code: String,
    pub discount_type: DiscountType,
    /// Raw value from the coupon definition (percent or amount).
    pub discount_value: Decimal,
    /// Discount after capping.
    pub discount_amount: Decimal,
    /// `subtotal - discount_amount`.
    pub final_amount: Decimal,
    pub is_discount_capped: bool,
    /// Whether the coupon has been persisted on the server cart.
    #[serde(default)]
    pub apply_status: CouponApplyStatus,
}

impl Coupon {
    /// Build the displayed coupon from a server verification.
    ///
    /// `server_discount` is the amount the server computed; it is re-capped
    /// locally against `subtotal`.
    #[must_use]
    pub fn verified(
        id: CouponId,
        code: String,
        discount_type: DiscountType,
        discount_value: Decimal,
        server_discount: Decimal,
        subtotal: Decimal,
        cap: DiscountCap,
    ) -> Self {
        let (discount_amount, is_discount_capped) = cap.apply(discount_type, server_discount, subtotal);
        Self {
            id,
            code,
            discount_type,
            discount_value,
            discount_amount,
            final_amount: subtotal - discount_amount,
            is_discount_capped,
            apply_status: CouponApplyStatus::Pending,
        }
    }

    /// Recompute the discount for a new subtotal.
    pub fn rebase(&mut self, subtotal: Decimal, cap: DiscountCap) {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                (subtotal * self.discount_value / Decimal::ONE_HUNDRED).round_dp(2)
            }
            DiscountType::FixedAmount => self.discount_value,
        };
        let (discount_amount, capped) = cap.apply(self.discount_type, raw, subtotal);
        self.discount_amount = discount_amount;
        self.is_discount_capped = capped;
        self.final_amount = subtotal - discount_amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(value: i64, subtotal: i64) -> Coupon {
        Coupon::verified(
            CouponId::new("c1"),
            "SAVE".to_string(),
            DiscountType::FixedAmount,
            Decimal::from(value),
            Decimal::from(value),
            Decimal::from(subtotal),
            DiscountCap::default(),
        )
    }

    #[test]
    fn test_fixed_amount_equal_to_subtotal_is_capped() {
        let coupon = fixed(1000, 1000);
        assert_eq!(coupon.discount_amount, Decimal::from(900));
        assert_eq!(coupon.final_amount, Decimal::from(100));
        assert!(coupon.is_discount_capped);
    }

    #[test]
    fn test_fixed_amount_below_cap() {
        let coupon = fixed(100, 1000);
        assert_eq!(coupon.discount_amount, Decimal::from(100));
        assert_eq!(coupon.final_amount, Decimal::from(900));
        assert!(!coupon.is_discount_capped);
    }

    #[test]
    fn test_fixed_amount_at_cap_is_flagged() {
        let coupon = fixed(900, 1000);
        assert_eq!(coupon.discount_amount, Decimal::from(900));
        assert!(coupon.is_discount_capped);
    }

    #[test]
    fn test_percentage_at_cap_is_not_flagged() {
        let cap = DiscountCap::default();
        let (amount, capped) = cap.apply(
            DiscountType::Percentage,
            Decimal::from(900),
            Decimal::from(1000),
        );
        assert_eq!(amount, Decimal::from(900));
        assert!(!capped);
    }

    #[test]
    fn test_percentage_over_cap_is_capped() {
        let cap = DiscountCap::default();
        let (amount, capped) = cap.apply(
            DiscountType::Percentage,
            Decimal::from(1000),
            Decimal::from(1000),
        );
        assert_eq!(amount, Decimal::from(900));
        assert!(capped);
    }

    #[test]
    fn test_rebase_percentage() {
        let mut coupon = Coupon::verified(
            CouponId::new("c2"),
            "TENOFF".to_string(),
            DiscountType::Percentage,
            Decimal::from(10),
            Decimal::from(100),
            Decimal::from(1000),
            DiscountCap::default(),
        );
        coupon.rebase(Decimal::from(500), DiscountCap::default());
        assert_eq!(coupon.discount_amount, Decimal::from(50));
        assert_eq!(coupon.final_amount, Decimal::from(450));
    }

    #[test]
    fn test_rebase_fixed_recaps_on_smaller_subtotal() {
        let mut coupon = fixed(300, 1000);
        assert!(!coupon.is_discount_capped);
        coupon.rebase(Decimal::from(300), DiscountCap::default());
        assert_eq!(coupon.discount_amount, Decimal::from(270));
        assert!(coupon.is_discount_capped);
    }

    #[test]
    fn test_cap_ratio_bounds() {
        assert!(DiscountCap::new(Decimal::ZERO).is_none());
        assert!(DiscountCap::new(Decimal::from(2)).is_none());
        assert!(DiscountCap::new(Decimal::ONE).is_some());
        assert_eq!(DiscountCap::default().ratio(), Decimal::new(9, 1));
    }

    #[test]
    fn test_discount_type_wire_names() {
        let json = serde_json::to_string(&DiscountType::FixedAmount).expect("serialize");
        assert_eq!(json, "\"FIXED_AMOUNT\"");
    }
}
