//! Cart and cart line types.
//!
//! Aggregates (`subtotal`, `item_count`, `total_quantity`) are stored next to
//! the lines so that a serialized cart is self-describing, but they are only
//! ever written by [`Cart`]'s own mutation methods. A cart that arrives from
//! the outside (disk, wire) can be checked with [`Cart::verify`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{CartItemId, VariantId};

/// Errors from constructing or mutating cart lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartMutationError {
    /// Quantity must be at least one.
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    /// Unit price cannot be negative.
    #[error("price cannot be negative: {0}")]
    NegativePrice(Decimal),
    /// No line with the given ID.
    #[error("cart item not found: {0}")]
    ItemNotFound(CartItemId),
}

/// A cart whose recorded aggregates disagree with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("line {id} subtotal {recorded} does not match price x quantity {computed}")]
    LineSubtotal {
        id: CartItemId,
        recorded: Decimal,
        computed: Decimal,
    },
    #[error("line {id} has zero quantity")]
    ZeroQuantity { id: CartItemId },
    #[error("cart subtotal {recorded} does not match line sum {computed}")]
    Subtotal { recorded: Decimal, computed: Decimal },
    #[error("cart total quantity {recorded} does not match line sum {computed}")]
    TotalQuantity { recorded: u32, computed: u32 },
    #[error("cart item count {recorded} does not match line count {computed}")]
    ItemCount { recorded: usize, computed: usize },
}

/// A single cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    id: CartItemId,
    product_variant_id: VariantId,
    price: Decimal,
    quantity: u32,
    subtotal: Decimal,
}

impl CartItem {
    /// Create a cart line.
    ///
    /// # Errors
    ///
    /// Returns an error if `quantity` is zero or `price` is negative.
    pub fn new(
        id: CartItemId,
        product_variant_id: VariantId,
        price: Decimal,
        quantity: u32,
    ) -> Result<Self, CartMutationError> {
        if quantity == 0 {
            return Err(CartMutationError::ZeroQuantity);
        }
        if price.is_sign_negative() && !price.is_zero() {
            return Err(CartMutationError::NegativePrice(price));
        }
        Ok(Self {
            id,
            product_variant_id,
            price,
            quantity,
            subtotal: price * Decimal::from(quantity),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &CartItemId {
        &self.id
    }

    #[must_use]
    pub const fn product_variant_id(&self) -> &VariantId {
        &self.product_variant_id
    }

    /// Unit price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Line subtotal (`price × quantity`).
    #[must_use]
    pub const fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.subtotal = self.price * Decimal::from(quantity);
    }
}

/// An ordered collection of cart lines with cached aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    items: Vec<CartItem>,
    subtotal: Decimal,
    item_count: usize,
    total_quantity: u32,
}

impl Default for Cart {
    fn default() -> Self {
        Self::empty()
    }
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            item_count: 0,
            total_quantity: 0,
        }
    }

    /// Build a cart from lines, computing aggregates.
    #[must_use]
    pub fn from_items(items: Vec<CartItem>) -> Self {
        let mut cart = Self {
            items,
            ..Self::empty()
        };
        cart.recompute();
        cart
    }

    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    #[must_use]
    pub const fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    /// Number of distinct lines.
    #[must_use]
    pub const fn item_count(&self) -> usize {
        self.item_count
    }

    /// Sum of line quantities.
    #[must_use]
    pub const fn total_quantity(&self) -> u32 {
        self.total_quantity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a line by ID.
    #[must_use]
    pub fn item(&self, id: &CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Look up a line by product variant.
    #[must_use]
    pub fn item_for_variant(&self, variant_id: &VariantId) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|item| &item.product_variant_id == variant_id)
    }

    /// Add `quantity` of a variant, incrementing the existing line for that
    /// variant or appending a new one with an ID from `new_id`.
    ///
    /// Returns the ID of the affected line.
    ///
    /// # Errors
    ///
    /// Returns an error if `quantity` is zero or `price` is negative.
    pub fn add_or_increment(
        &mut self,
        variant_id: &VariantId,
        price: Decimal,
        quantity: u32,
        new_id: impl FnOnce() -> CartItemId,
    ) -> Result<CartItemId, CartMutationError> {
        if quantity == 0 {
            return Err(CartMutationError::ZeroQuantity);
        }

        let id = if let Some(existing) = self
            .items
            .iter_mut()
            .find(|item| &item.product_variant_id == variant_id)
        {
            let merged = existing.quantity.saturating_add(quantity);
            existing.set_quantity(merged);
            existing.id.clone()
        } else {
            let item = CartItem::new(new_id(), variant_id.clone(), price, quantity)?;
            let id = item.id.clone();
            self.items.push(item);
            id
        };

        self.recompute();
        Ok(id)
    }

    /// Set the quantity of a line. A quantity of zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns an error if no line has the given ID.
    pub fn set_quantity(
        &mut self,
        id: &CartItemId,
        quantity: u32,
    ) -> Result<(), CartMutationError> {
        if quantity == 0 {
            return self.remove(id).map(|_| ());
        }

        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| CartMutationError::ItemNotFound(id.clone()))?;
        item.set_quantity(quantity);
        self.recompute();
        Ok(())
    }

    /// Remove a line, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if no line has the given ID.
    pub fn remove(&mut self, id: &CartItemId) -> Result<CartItem, CartMutationError> {
        let index = self
            .items
            .iter()
            .position(|item| &item.id == id)
            .ok_or_else(|| CartMutationError::ItemNotFound(id.clone()))?;
        let removed = self.items.remove(index);
        self.recompute();
        Ok(removed)
    }

    /// Keep only the lines matching the predicate.
    pub fn retain(&mut self, keep: impl FnMut(&CartItem) -> bool) {
        self.items.retain(keep);
        self.recompute();
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Check that the recorded aggregates match the lines.
    ///
    /// # Errors
    ///
    /// Returns the first mismatch found.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let mut subtotal = Decimal::ZERO;
        let mut total_quantity: u32 = 0;

        for item in &self.items {
            if item.quantity == 0 {
                return Err(InvariantViolation::ZeroQuantity {
                    id: item.id.clone(),
                });
            }
            let computed = item.price * Decimal::from(item.quantity);
            if computed != item.subtotal {
                return Err(InvariantViolation::LineSubtotal {
                    id: item.id.clone(),
                    recorded: item.subtotal,
                    computed,
                });
            }
            subtotal += item.subtotal;
            total_quantity = total_quantity.saturating_add(item.quantity);
        }

        if subtotal != self.subtotal {
            return Err(InvariantViolation::Subtotal {
                recorded: self.subtotal,
                computed: subtotal,
            });
        }
        if total_quantity != self.total_quantity {
            return Err(InvariantViolation::TotalQuantity {
                recorded: self.total_quantity,
                computed: total_quantity,
            });
        }
        if self.items.len() != self.item_count {
            return Err(InvariantViolation::ItemCount {
                recorded: self.item_count,
                computed: self.items.len(),
            });
        }
        Ok(())
    }

    fn recompute(&mut self) {
        self.subtotal = self.items.iter().map(CartItem::subtotal).sum();
        self.total_quantity = self
            .items
            .iter()
            .fold(0u32, |acc, item| acc.saturating_add(item.quantity));
        self.item_count = self.items.len();
    }
}

/// Derived order totals shown next to the cart.
///
/// Shipping and tax are computed at checkout and are always zero here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl CartTotals {
    /// Totals for a subtotal and an already-capped discount.
    #[must_use]
    pub fn new(subtotal: Decimal, discount: Decimal) -> Self {
        let shipping = Decimal::ZERO;
        let tax = Decimal::ZERO;
        Self {
            subtotal,
            discount,
            shipping,
            tax,
            total: subtotal - discount + shipping + tax,
        }
    }
}
