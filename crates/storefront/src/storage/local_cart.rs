//! Guest cart persisted in device-local storage.

use std::sync::Arc;

use cart_sync_core::{Cart, CartItemId, Decimal, VariantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::CartStorage;
use crate::error::CartError;
use crate::models::storage_keys;

/// Stored form: the cart record plus the time it was written.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCart {
    #[serde(flatten)]
    cart: Cart,
    saved_at: DateTime<Utc>,
}

/// The guest cart.
///
/// Exposes the same verbs as the remote cart API so the cart service can
/// treat both backends alike. Every line created here gets a
/// [`CartItemId::GUEST_PREFIX`] ID.
#[derive(Clone)]
pub struct LocalCartStore {
    storage: Arc<dyn CartStorage>,
}

impl std::fmt::Debug for LocalCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCartStore").finish_non_exhaustive()
    }
}

impl LocalCartStore {
    #[must_use]
    pub fn new(storage: Arc<dyn CartStorage>) -> Self {
        Self { storage }
    }

    /// Load the guest cart. A missing record is an empty cart.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails, the record is unreadable, or its
    /// aggregates disagree with its lines.
    pub fn get(&self) -> Result<Cart, CartError> {
        let Some(raw) = self.storage.read(storage_keys::GUEST_CART)? else {
            return Ok(Cart::empty());
        };
        let stored: StoredCart =
            serde_json::from_str(&raw).map_err(crate::storage::StorageError::from)?;
        stored.cart.verify()?;
        Ok(stored.cart)
    }

    /// When the guest cart was last written.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the record is unreadable.
    pub fn saved_at(&self) -> Result<Option<DateTime<Utc>>, CartError> {
        let Some(raw) = self.storage.read(storage_keys::GUEST_CART)? else {
            return Ok(None);
        };
        let stored: StoredCart =
            serde_json::from_str(&raw).map_err(crate::storage::StorageError::from)?;
        Ok(Some(stored.saved_at))
    }

    /// Add `quantity` of a variant, incrementing its line if present.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero quantity or negative price, or
    /// a storage error.
    #[instrument(skip(self), fields(variant_id = %variant_id))]
    pub fn add(
        &self,
        variant_id: &VariantId,
        unit_price: Decimal,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        let mut cart = self.get()?;
        let id = cart.add_or_increment(variant_id, unit_price, quantity, CartItemId::new_guest)?;
        debug!(item_id = %id, "Added to guest cart");
        self.save(cart)
    }

    /// Set a line's quantity. Zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the line does not exist, or a storage
    /// error.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub fn update_item(&self, item_id: &CartItemId, quantity: u32) -> Result<Cart, CartError> {
        let mut cart = self.get()?;
        cart.set_quantity(item_id, quantity)?;
        self.save(cart)
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the line does not exist, or a storage
    /// error.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub fn remove(&self, item_id: &CartItemId) -> Result<Cart, CartError> {
        let mut cart = self.get()?;
        cart.remove(item_id)?;
        self.save(cart)
    }

    /// Remove every line whose ID is in `item_ids`. Unknown IDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn remove_items(&self, item_ids: &[CartItemId]) -> Result<Cart, CartError> {
        let mut cart = self.get()?;
        cart.retain(|item| !item_ids.contains(item.id()));
        self.save(cart)
    }

    /// Delete the guest cart.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear(&self) -> Result<(), CartError> {
        self.storage.remove(storage_keys::GUEST_CART)?;
        Ok(())
    }

    /// Total quantity in the guest cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart cannot be loaded.
    pub fn item_count(&self) -> Result<u32, CartError> {
        Ok(self.get()?.total_quantity())
    }

    fn save(&self, cart: Cart) -> Result<Cart, CartError> {
        if cart.is_empty() {
            self.clear()?;
            return Ok(cart);
        }
        let stored = StoredCart {
            cart,
            saved_at: Utc::now(),
        };
        let raw = serde_json::to_string(&stored).map_err(crate::storage::StorageError::from)?;
        self.storage.write(storage_keys::GUEST_CART, &raw)?;
        Ok(stored.cart)
    }
}
