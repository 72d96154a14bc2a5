//! Cart service.
//!
//! Owns the cart snapshot shown to the shopper and routes every operation to
//! the right backend: the guest cart on this device while anonymous, the
//! cart API once authenticated. Authenticated quantity edits and removals are
//! optimistic; adds and clears wait for the server.
//!
//! Authoritative sequences (remote call followed by a re-fetch, the guest
//! cart merge) hold the service's operation lock, so they run one at a time
//! in the order they were issued.

mod coupon;
mod merge;
mod snapshot;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cart_sync_core::{Cart, CartItemId, CartTotals, Coupon, Decimal, MergePhase, VariantId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncSettings;
use crate::error::{CartError, Result, add_breadcrumb};
use crate::gateway::{CartGateway, GatewayError};
use crate::models::{AuthState, AuthTransition};
use crate::storage::LocalCartStore;

pub use coupon::CheckoutSummary;
pub use merge::{MergeCoordinator, MergeReport};
pub use snapshot::{CartSnapshot, CartVersion};

use snapshot::VersionClock;

// =============================================================================
// Requests
// =============================================================================

/// Input for [`CartService::add_to_cart`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddToCart {
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Price used for the guest cart line. The server prices its own lines.
    pub unit_price: Decimal,
}

impl AddToCart {
    #[must_use]
    pub fn new(variant_id: impl Into<VariantId>, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            variant_id: variant_id.into(),
            quantity,
            unit_price,
        }
    }
}

// =============================================================================
// State
// =============================================================================

struct CartState {
    /// Last settled authentication state.
    auth: AuthState,
    initialized: bool,
    cart: Cart,
    coupon: Option<Coupon>,
    loading_items: BTreeSet<CartItemId>,
    clock: VersionClock,
    /// Present for the lifetime of an authenticated session.
    merge: Option<Arc<MergeCoordinator>>,
}

struct CartServiceInner {
    gateway: Arc<dyn CartGateway>,
    local: LocalCartStore,
    settings: SyncSettings,
    state: Mutex<CartState>,
    snapshot: watch::Sender<CartSnapshot>,
    op_lock: tokio::sync::Mutex<()>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// The cart state container.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartService {
    inner: Arc<CartServiceInner>,
}

impl std::fmt::Debug for CartService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("CartService")
            .field("auth", &state.auth)
            .field("items", &state.cart.item_count())
            .field("coupon", &state.coupon.as_ref().map(|c| c.code.as_str()))
            .finish_non_exhaustive()
    }
}

impl CartService {
    /// Create a cart service for a session in `auth` state.
    ///
    /// Nothing is loaded until [`hydrate`](Self::hydrate) runs.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CartGateway>,
        local: LocalCartStore,
        settings: SyncSettings,
        auth: AuthState,
    ) -> Self {
        let authenticated = auth.authenticated && !auth.loading;
        let auth = if auth.loading { AuthState::ANONYMOUS } else { auth };
        let (snapshot, _) = watch::channel(CartSnapshot::initial(authenticated));
        let merge = authenticated.then(|| Arc::new(MergeCoordinator::new()));

        Self {
            inner: Arc::new(CartServiceInner {
                gateway,
                local,
                settings,
                state: Mutex::new(CartState {
                    auth,
                    initialized: false,
                    cart: Cart::empty(),
                    coupon: None,
                    loading_items: BTreeSet::new(),
                    clock: VersionClock::default(),
                    merge,
                }),
                snapshot,
                op_lock: tokio::sync::Mutex::new(()),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Receive every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn cart(&self) -> Cart {
        self.state().cart.clone()
    }

    #[must_use]
    pub fn coupon(&self) -> Option<Coupon> {
        self.state().coupon.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state().auth.authenticated
    }

    /// Subtotal, capped discount and total of the current cart.
    #[must_use]
    pub fn totals(&self) -> CartTotals {
        totals_for(&self.state())
    }

    /// Total quantity shown on the cart badge.
    ///
    /// Zero until hydrated. While anonymous this reads the guest cart.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        let (initialized, authenticated, quantity) = {
            let state = self.state();
            (
                state.initialized,
                state.auth.authenticated,
                state.cart.total_quantity(),
            )
        };
        if !initialized {
            return 0;
        }
        if authenticated {
            return quantity;
        }
        self.inner.local.item_count().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read guest cart item count");
            0
        })
    }

    /// Whether a server call for `item_id` is in flight.
    #[must_use]
    pub fn is_item_loading(&self, item_id: &CartItemId) -> bool {
        self.state().loading_items.contains(item_id)
    }

    #[must_use]
    pub fn loading_items(&self) -> Vec<CartItemId> {
        self.state().loading_items.iter().cloned().collect()
    }

    /// Phase of the current session's guest cart merge.
    #[must_use]
    pub fn merge_phase(&self) -> MergePhase {
        self.state()
            .merge
            .as_ref()
            .map_or(MergePhase::Idle, |m| m.phase())
    }

    /// Watch the current session's merge phase.
    ///
    /// `None` while anonymous. A new session gets a new coordinator, so
    /// subscribe again after each login.
    #[must_use]
    pub fn subscribe_merge_phase(&self) -> Option<watch::Receiver<MergePhase>> {
        self.state().merge.as_ref().map(|m| m.subscribe())
    }

    /// Wait until every background reconciliation and coupon apply started
    /// so far has finished.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.inner.background));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background cart task did not complete");
                }
            }
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the cart for the current session.
    ///
    /// Anonymous sessions read the guest cart. Authenticated sessions fetch
    /// the server cart, first merging any guest lines left on this device.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart cannot be loaded.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<Cart> {
        let coordinator = {
            let state = self.state();
            state.auth.authenticated.then(|| state.merge.clone()).flatten()
        };

        let cart = match coordinator {
            Some(coordinator) => {
                let report = self.merge_with(&coordinator).await?;
                if report.skipped {
                    self.fetch_cart().await?
                } else {
                    self.cart()
                }
            }
            None => self.fetch_cart().await?,
        };

        self.state().initialized = true;
        Ok(cart)
    }

    /// Load the authoritative cart.
    ///
    /// While anonymous this re-reads the guest cart. While authenticated it
    /// fetches the server cart; a failed fetch resets the snapshot to an
    /// empty cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> Result<Cart> {
        if !self.is_authenticated() {
            let cart = self.inner.local.get()?;
            let mut state = self.state();
            state.initialized = true;
            self.replace_cart(&mut state, cart.clone())?;
            return Ok(cart);
        }

        let _guard = self.inner.op_lock.lock().await;
        self.fetch_locked().await
    }

    /// Fetch the server cart. Caller holds the operation lock.
    async fn fetch_locked(&self) -> Result<Cart> {
        let ticket = {
            let state = self.state();
            if !state.auth.authenticated {
                return Ok(state.cart.clone());
            }
            state.clock.ticket()
        };

        let result = self.call(self.inner.gateway.get_cart()).await;

        let mut state = self.state();
        let accepted = state.clock.accepts(ticket) && state.auth.authenticated;
        match result {
            Ok(cart) if accepted => {
                state.initialized = true;
                self.replace_cart(&mut state, cart.clone())?;
                Ok(cart)
            }
            Ok(_) => {
                debug!(
                    pending_edits = state.clock.has_pending_edits(),
                    "Discarding cart fetch that predates an unconfirmed edit"
                );
                Ok(state.cart.clone())
            }
            Err(e) => {
                warn!(error = %e, "Cart fetch failed");
                if accepted {
                    self.replace_cart(&mut state, Cart::empty())?;
                }
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a variant to the cart.
    ///
    /// Authenticated adds are not optimistic: the server assigns the line,
    /// so the cart is re-fetched once the add succeeds.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero quantity, `MergeInProgress`
    /// while a merge holds the cart, or the backend's error.
    #[instrument(skip(self), fields(variant_id = %request.variant_id, quantity = request.quantity))]
    pub async fn add_to_cart(&self, request: AddToCart) -> Result<Cart> {
        self.ensure_not_merging()?;
        if request.quantity == 0 {
            return Err(CartError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }
        add_breadcrumb(
            "cart",
            "Added to cart",
            Some(&[("variant_id", request.variant_id.as_str())]),
        );

        if !self.is_authenticated() {
            let cart =
                self.inner
                    .local
                    .add(&request.variant_id, request.unit_price, request.quantity)?;
            let mut state = self.state();
            state.clock.begin_edit();
            self.replace_cart(&mut state, cart.clone())?;
            return Ok(cart);
        }

        let _guard = self.inner.op_lock.lock().await;
        self.call(
            self.inner
                .gateway
                .add_item(&request.variant_id, request.quantity),
        )
        .await?;
        info!(variant_id = %request.variant_id, "Added to server cart");
        self.fetch_locked().await
    }

    /// Set a line's quantity. Zero removes the line.
    ///
    /// Authenticated updates apply to the snapshot immediately, then the
    /// server is told; a failure rolls the snapshot back unless a newer edit
    /// has landed since.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the line is unknown, `MergeInProgress`
    /// while a merge holds the cart, or the backend's error.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn update_cart_item(&self, item_id: &CartItemId, quantity: u32) -> Result<Cart> {
        self.ensure_not_merging()?;
        if quantity == 0 {
            return self.remove_from_cart(item_id).await;
        }
        add_breadcrumb(
            "cart",
            "Updated cart item",
            Some(&[("item_id", item_id.as_str())]),
        );

        if !self.is_authenticated() {
            let cart = self.inner.local.update_item(item_id, quantity)?;
            let mut state = self.state();
            state.clock.begin_edit();
            self.replace_cart(&mut state, cart.clone())?;
            return Ok(cart);
        }

        self.optimistic(
            item_id,
            |cart| cart.set_quantity(item_id, quantity),
            self.inner.gateway.update_item(item_id, quantity),
        )
        .await
    }

    /// Remove a line.
    ///
    /// Optimistic while authenticated, like [`update_cart_item`](Self::update_cart_item).
    ///
    /// # Errors
    ///
    /// Returns a validation error if the line is unknown, `MergeInProgress`
    /// while a merge holds the cart, or the backend's error.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_from_cart(&self, item_id: &CartItemId) -> Result<Cart> {
        self.ensure_not_merging()?;
        add_breadcrumb(
            "cart",
            "Removed from cart",
            Some(&[("item_id", item_id.as_str())]),
        );

        if !self.is_authenticated() {
            let cart = self.inner.local.remove(item_id)?;
            let mut state = self.state();
            state.clock.begin_edit();
            self.replace_cart(&mut state, cart.clone())?;
            return Ok(cart);
        }

        self.optimistic(
            item_id,
            |cart| cart.remove(item_id).map(|_| ()),
            self.inner.gateway.remove_item(item_id),
        )
        .await
    }

    /// Empty the cart. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `MergeInProgress` while a merge holds the cart, or the
    /// backend's error.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<()> {
        self.ensure_not_merging()?;
        add_breadcrumb("cart", "Cleared cart", None);

        if !self.is_authenticated() {
            self.inner.local.clear()?;
            let mut state = self.state();
            state.clock.begin_edit();
            state.coupon = None;
            self.replace_cart(&mut state, Cart::empty())?;
            return Ok(());
        }

        {
            let _guard = self.inner.op_lock.lock().await;
            self.call(self.inner.gateway.clear_cart()).await?;
            let mut state = self.state();
            state.clock.begin_edit();
            state.coupon = None;
            state.loading_items.clear();
            self.replace_cart(&mut state, Cart::empty())?;
        }
        info!("Cleared server cart");
        self.spawn_reconcile();
        Ok(())
    }

    /// Apply an edit to the snapshot, then confirm it with the server.
    async fn optimistic<E, F>(&self, item_id: &CartItemId, edit: E, remote: F) -> Result<Cart>
    where
        E: FnOnce(&mut Cart) -> std::result::Result<(), cart_sync_core::CartMutationError>,
        F: Future<Output = std::result::Result<(), GatewayError>>,
    {
        let (previous, edit_version, optimistic) = {
            let mut state = self.state();
            if state.cart.item(item_id).is_none() {
                return Err(CartError::Validation(format!(
                    "cart item {item_id} not found"
                )));
            }
            let previous = state.cart.clone();
            let mut cart = previous.clone();
            edit(&mut cart)?;
            cart.verify()?;
            let edit_version = state.clock.begin_pending_edit();
            state.loading_items.insert(item_id.clone());
            state.cart = cart.clone();
            self.publish(&mut state);
            (previous, edit_version, cart)
        };
        let pending = PendingEdit {
            service: self,
            item_id,
            armed: true,
        };

        let result = {
            let _guard = self.inner.op_lock.lock().await;
            self.call(remote).await
        };

        {
            let mut state = self.state();
            pending.finish(&mut state);
            if let Err(e) = &result {
                if state.clock.is_latest_edit(edit_version) {
                    warn!(item_id = %item_id, error = %e, "Server rejected cart edit; rolling back");
                    self.replace_cart(&mut state, previous)?;
                } else {
                    warn!(item_id = %item_id, error = %e, "Server rejected cart edit");
                    self.publish(&mut state);
                }
            } else {
                self.publish(&mut state);
            }
        }

        self.spawn_reconcile();
        result.map(|()| optimistic).map_err(CartError::from)
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Observe a new value of the authentication signal.
    ///
    /// Loading values are ignored. A login merges the guest cart into the
    /// server cart (at most once per session); a logout returns the snapshot
    /// to the guest cart. A repeated authenticated value retries a merge that
    /// failed earlier in the session.
    ///
    /// Returns the merge report when the value was authenticated.
    ///
    /// # Errors
    ///
    /// Returns the merge's error, or an error loading the cart for the new
    /// session.
    #[instrument(skip(self))]
    pub async fn set_auth_state(&self, next: AuthState) -> Result<Option<MergeReport>> {
        if next.loading {
            debug!("Ignoring auth state while identity is loading");
            return Ok(None);
        }

        let (transition, coordinator) = {
            let mut state = self.state();
            let transition = state.auth.transition_to(next);
            state.auth = next;
            match transition {
                AuthTransition::LoggedIn => {
                    state.merge = Some(Arc::new(MergeCoordinator::new()));
                }
                AuthTransition::LoggedOut => {
                    state.merge = None;
                }
                AuthTransition::None => {}
            }
            (transition, state.merge.clone())
        };

        match transition {
            AuthTransition::LoggedIn => {
                info!("Shopper signed in");
                add_breadcrumb("auth", "Signed in", None);
                match coordinator {
                    Some(coordinator) => self.merge_with(&coordinator).await.map(Some),
                    None => Ok(None),
                }
            }
            AuthTransition::LoggedOut => {
                info!("Shopper signed out");
                add_breadcrumb("auth", "Signed out", None);
                self.restore_guest_cart();
                Ok(None)
            }
            AuthTransition::None => match coordinator {
                Some(coordinator) if next.authenticated => {
                    self.merge_with(&coordinator).await.map(Some)
                }
                _ => Ok(None),
            },
        }
    }

    /// Follow an authentication signal until its sender is dropped.
    pub fn watch_auth(&self, mut auth: watch::Receiver<AuthState>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                let next = *auth.borrow_and_update();
                if let Err(e) = service.set_auth_state(next).await {
                    warn!(error = %e, "Cart sync after auth change failed");
                }
                if auth.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Retry a failed guest cart merge for the current session.
    ///
    /// # Errors
    ///
    /// Returns a validation error while anonymous, or the merge's error.
    pub async fn retry_merge(&self) -> Result<MergeReport> {
        let coordinator = self.state().merge.clone();
        match coordinator {
            Some(coordinator) => self.merge_with(&coordinator).await,
            None => Err(CartError::Validation(
                "sign in to merge the guest cart".to_string(),
            )),
        }
    }

    fn restore_guest_cart(&self) {
        let cart = self.inner.local.get().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read guest cart after sign-out");
            Cart::empty()
        });
        let mut state = self.state();
        state.clock.begin_edit();
        state.coupon = None;
        state.loading_items.clear();
        if let Err(e) = self.replace_cart(&mut state, cart) {
            warn!(error = %e, "Guest cart failed verification after sign-out");
            state.cart = Cart::empty();
            self.publish(&mut state);
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn state(&self) -> MutexGuard<'_, CartState> {
        lock(&self.inner.state)
    }

    fn ensure_not_merging(&self) -> Result<()> {
        if self.merge_phase().is_blocking() {
            return Err(CartError::MergeInProgress);
        }
        Ok(())
    }

    /// Run a cart API call under the configured timeout.
    async fn call<T>(
        &self,
        request: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> std::result::Result<T, GatewayError> {
        let timeout = self.inner.settings.request_timeout;
        tokio::time::timeout(timeout, request)
            .await
            .unwrap_or(Err(GatewayError::Timeout(timeout)))
    }

    /// Install `cart` as the snapshot cart and publish.
    fn replace_cart(&self, state: &mut CartState, cart: Cart) -> Result<()> {
        cart.verify()?;
        state.cart = cart;
        self.publish(state);
        Ok(())
    }

    /// Re-derive the coupon for the current cart and publish a snapshot.
    fn publish(&self, state: &mut CartState) {
        if let Some(coupon) = state.coupon.as_mut()
            && coupon.discount_amount + coupon.final_amount != state.cart.subtotal()
        {
            coupon.rebase(state.cart.subtotal(), self.inner.settings.discount_cap);
        }

        let snapshot = CartSnapshot {
            version: state.clock.next_revision(),
            authenticated: state.auth.authenticated,
            cart: state.cart.clone(),
            coupon: state.coupon.clone(),
            totals: totals_for(state),
            loading_items: state.loading_items.clone(),
        };
        self.inner.snapshot.send_replace(snapshot);
    }

    fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = lock(&self.inner.background);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Queue an authoritative re-fetch behind any in-flight operations.
    fn spawn_reconcile(&self) {
        let service = self.clone();
        self.spawn_background(async move {
            let _guard = service.inner.op_lock.lock().await;
            if let Err(e) = service.fetch_locked().await {
                warn!(error = %e, "Background cart reconciliation failed");
            }
        });
    }
}

/// An optimistic edit whose remote call has not resolved.
///
/// Clears the pending mark and the loading flag even when the caller stops
/// polling the edit before the server answers.
struct PendingEdit<'a> {
    service: &'a CartService,
    item_id: &'a CartItemId,
    armed: bool,
}

impl PendingEdit<'_> {
    fn finish(mut self, state: &mut CartState) {
        self.armed = false;
        state.clock.finish_pending_edit();
        state.loading_items.remove(self.item_id);
    }
}

impl Drop for PendingEdit<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.service.state();
            state.clock.finish_pending_edit();
            state.loading_items.remove(self.item_id);
            self.service.publish(&mut state);
        }
        // The remote call may or may not have reached the server
        if tokio::runtime::Handle::try_current().is_ok() {
            self.service.spawn_reconcile();
        }
    }
}

fn totals_for(state: &CartState) -> CartTotals {
    let discount = state
        .coupon
        .as_ref()
        .map_or(Decimal::ZERO, |c| c.discount_amount);
    CartTotals::new(state.cart.subtotal(), discount)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::storage_keys;
    use crate::storage::{CartStorage, MemoryStorage};
    use crate::testing::InMemoryCartGateway;

    fn service(gateway: &InMemoryCartGateway, auth: AuthState) -> CartService {
        CartService::new(
            Arc::new(gateway.clone()),
            LocalCartStore::new(Arc::new(MemoryStorage::new())),
            SyncSettings::default(),
            auth,
        )
    }

    fn add(variant: &str, quantity: u32, price: i64) -> AddToCart {
        AddToCart::new(variant, quantity, Decimal::from(price))
    }

    #[tokio::test]
    async fn test_anonymous_add_uses_guest_cart() {
        let gateway = InMemoryCartGateway::new();
        let service = service(&gateway, AuthState::ANONYMOUS);
        service.hydrate().await.unwrap();

        let cart = service.add_to_cart(add("V1", 2, 500)).await.unwrap();

        assert_eq!(cart.total_quantity(), 2);
        assert!(cart.items()[0].id().is_guest());
        assert_eq!(service.item_count(), 2);
        assert_eq!(gateway.calls().add_item, 0);
    }

    #[tokio::test]
    async fn test_item_count_is_zero_before_hydrate() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V1", 500, 3);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        assert_eq!(service.item_count(), 0);

        service.hydrate().await.unwrap();
        assert_eq!(service.item_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_quantity_add_is_rejected() {
        let gateway = InMemoryCartGateway::new();
        let service = service(&gateway, AuthState::AUTHENTICATED);

        let err = service.add_to_cart(add("V1", 0, 500)).await.unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
        assert_eq!(gateway.calls().add_item, 0);
    }

    #[tokio::test]
    async fn test_authenticated_add_refetches() {
        let gateway = InMemoryCartGateway::new();
        gateway.set_price("V1", Decimal::from(500));
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        let cart = service.add_to_cart(add("V1", 2, 1)).await.unwrap();

        assert_eq!(cart.subtotal(), Decimal::from(1000));
        assert_eq!(service.snapshot().cart, cart);
        assert_eq!(gateway.calls().add_item, 1);
    }

    #[tokio::test]
    async fn test_optimistic_update_applies_before_server_answers() {
        let gateway = InMemoryCartGateway::new();
        let id = gateway.seed_item("V1", 500, 1);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        gateway.set_delay(Duration::from_millis(50));
        let mut snapshots = service.subscribe();
        let task = {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move { service.update_cart_item(&id, 4).await })
        };

        snapshots.changed().await.unwrap();
        let optimistic = snapshots.borrow_and_update().clone();
        assert_eq!(optimistic.cart.total_quantity(), 4);
        assert!(optimistic.loading_items.contains(&id));

        task.await.unwrap().unwrap();
        service.settle().await;
        assert!(!service.is_item_loading(&id));
        assert_eq!(service.cart().total_quantity(), 4);
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let gateway = InMemoryCartGateway::new();
        let id = gateway.seed_item("V1", 500, 1);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        gateway.fail_item_updates("connection reset");
        let err = service.update_cart_item(&id, 5).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(service.cart().item(&id).unwrap().quantity(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_item_is_validation_error() {
        let gateway = InMemoryCartGateway::new();
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        let err = service
            .update_cart_item(&CartItemId::new("missing"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
        assert_eq!(gateway.calls().update_item, 0);
    }

    #[tokio::test]
    async fn test_update_to_zero_removes_line() {
        let gateway = InMemoryCartGateway::new();
        let id = gateway.seed_item("V1", 500, 2);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        let cart = service.update_cart_item(&id, 0).await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(gateway.calls().remove_item, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_resets_to_empty() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V1", 500, 2);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        gateway.fail_fetches(true);
        assert!(service.fetch_cart().await.is_err());
        assert!(service.cart().is_empty());
        assert_eq!(service.totals().total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V1", 500, 2);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();

        service.clear_cart().await.unwrap();
        service.clear_cart().await.unwrap();
        service.settle().await;
        assert!(service.cart().is_empty());
        assert_eq!(service.item_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let gateway = InMemoryCartGateway::new();
        gateway.set_delay(Duration::from_millis(200));
        let service = CartService::new(
            Arc::new(gateway.clone()),
            LocalCartStore::new(Arc::new(MemoryStorage::new())),
            SyncSettings {
                request_timeout: Duration::from_millis(20),
                ..SyncSettings::default()
            },
            AuthState::AUTHENTICATED,
        );

        let err = service.fetch_cart().await.unwrap_err();
        assert!(matches!(
            err,
            CartError::Transport(GatewayError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_loading_auth_state_is_ignored() {
        let gateway = InMemoryCartGateway::new();
        let service = service(&gateway, AuthState::ANONYMOUS);

        assert!(service.set_auth_state(AuthState::LOADING).await.unwrap().is_none());
        assert!(!service.is_authenticated());
        assert_eq!(service.merge_phase(), MergePhase::Idle);
    }

    #[tokio::test]
    async fn test_logout_restores_guest_cart() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V9", 100, 1);
        let service = service(&gateway, AuthState::AUTHENTICATED);
        service.hydrate().await.unwrap();
        assert_eq!(service.cart().total_quantity(), 1);

        service.set_auth_state(AuthState::ANONYMOUS).await.unwrap();

        assert!(service.cart().is_empty());
        assert!(service.subscribe_merge_phase().is_none());
        assert!(!service.snapshot().authenticated);
    }

    #[tokio::test]
    async fn test_logout_with_unreadable_guest_cart_publishes_empty_cart() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V9", 100, 2);
        let storage = MemoryStorage::new();
        let service = CartService::new(
            Arc::new(gateway.clone()),
            LocalCartStore::new(Arc::new(storage.clone())),
            SyncSettings::default(),
            AuthState::AUTHENTICATED,
        );
        service.hydrate().await.unwrap();
        let before = service.snapshot().version;

        storage.write(storage_keys::GUEST_CART, "{not json").unwrap();
        service.set_auth_state(AuthState::ANONYMOUS).await.unwrap();

        let snapshot = service.snapshot();
        assert!(snapshot.version > before);
        assert!(!snapshot.authenticated);
        assert!(snapshot.cart.is_empty());
        assert_eq!(snapshot.totals.total, Decimal::ZERO);
    }
}
