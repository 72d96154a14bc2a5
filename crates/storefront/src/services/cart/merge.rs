//! Guest cart merge on sign-in.
//!
//! When an anonymous shopper signs in, every line in the guest cart is added
//! to their server cart, then the guest cart is cleared. The coordinator is
//! created per authenticated session and guarantees the merge runs at most
//! once per session, however many times the sign-in is observed.

use cart_sync_core::{Cart, CartItemId, MergePhase};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::CartService;
use crate::error::{CartError, MergeError, MergeFailure, Result, add_breadcrumb};

/// Outcome of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Guest lines added to the server cart.
    pub merged: usize,
    /// The merge had already run, or was running, for this session.
    pub skipped: bool,
}

impl MergeReport {
    const fn skipped() -> Self {
        Self {
            merged: 0,
            skipped: true,
        }
    }
}

/// Session-scoped merge guard and phase publisher.
#[derive(Debug)]
pub struct MergeCoordinator {
    phase: watch::Sender<MergePhase>,
}

impl Default for MergeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (phase, _) = watch::channel(MergePhase::Idle);
        Self { phase }
    }

    #[must_use]
    pub fn phase(&self) -> MergePhase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MergePhase> {
        self.phase.subscribe()
    }

    /// Claim the merge for this session.
    ///
    /// Succeeds from `Idle`. A `Failed` merge first returns to `Idle` so it
    /// can be retried. Returns `false` while a merge runs or after one
    /// completed.
    pub fn try_begin(&self) -> bool {
        self.reset_failed();
        self.phase.send_if_modified(|phase| {
            if *phase == MergePhase::Idle {
                *phase = MergePhase::Detecting;
                true
            } else {
                false
            }
        })
    }

    /// `Failed -> Idle`. Any other phase is left alone.
    fn reset_failed(&self) -> bool {
        let reset = self.phase.send_if_modified(|phase| {
            if *phase == MergePhase::Failed {
                *phase = MergePhase::Idle;
                true
            } else {
                false
            }
        });
        if reset {
            debug!(phase = %MergePhase::Idle, "Merge phase");
        }
        reset
    }

    fn advance(&self, phase: MergePhase) {
        debug!(phase = %phase, "Merge phase");
        self.phase.send_replace(phase);
    }
}

impl CartService {
    /// Run the merge unless this session already claimed it.
    pub(super) async fn merge_with(&self, coordinator: &MergeCoordinator) -> Result<MergeReport> {
        if !coordinator.try_begin() {
            debug!(phase = %coordinator.phase(), "Guest cart merge already claimed");
            return Ok(MergeReport::skipped());
        }

        let _guard = self.inner.op_lock.lock().await;
        match self.run_merge(coordinator).await {
            Ok(report) => {
                coordinator.advance(MergePhase::Done);
                Ok(report)
            }
            Err(e) => {
                coordinator.advance(MergePhase::Failed);
                Err(e)
            }
        }
    }

    /// Detect, migrate and reconcile. Caller holds the operation lock.
    #[instrument(skip_all)]
    async fn run_merge(&self, coordinator: &MergeCoordinator) -> Result<MergeReport> {
        let guest = self.inner.local.get()?;

        // Baseline. Also what the shopper sees if there is nothing to merge.
        self.fetch_locked().await?;
        if guest.is_empty() {
            debug!("No guest cart to merge");
            return Ok(MergeReport {
                merged: 0,
                skipped: false,
            });
        }

        info!(lines = guest.item_count(), "Merging guest cart");
        add_breadcrumb("cart", "Merging guest cart", None);
        coordinator.advance(MergePhase::Merging);
        let (merged, failures) = self.migrate_lines(&guest).await;

        coordinator.advance(MergePhase::Reconciling);
        if failures.is_empty() {
            self.inner.local.clear()?;
        } else {
            self.inner.local.remove_items(&merged)?;
        }
        self.fetch_locked().await?;

        if failures.is_empty() {
            info!(merged = merged.len(), "Guest cart merged");
            return Ok(MergeReport {
                merged: merged.len(),
                skipped: false,
            });
        }

        let error = MergeError {
            failures,
            merged: merged.len(),
        };
        error!(error = %error, "Guest cart merge incomplete");
        Err(CartError::Merge(error))
    }

    /// Add each guest line to the server cart, one at a time.
    async fn migrate_lines(
        &self,
        guest: &Cart,
    ) -> (Vec<CartItemId>, Vec<MergeFailure>) {
        let mut merged = Vec::new();
        let mut failures = Vec::new();

        for item in guest.items() {
            let result = self
                .call(
                    self.inner
                        .gateway
                        .add_item(item.product_variant_id(), item.quantity()),
                )
                .await;
            match result {
                Ok(()) => merged.push(item.id().clone()),
                Err(e) => {
                    warn!(
                        variant_id = %item.product_variant_id(),
                        quantity = item.quantity(),
                        error = %e,
                        "Failed to merge guest cart line"
                    );
                    failures.push(MergeFailure {
                        item_id: item.id().clone(),
                        variant_id: item.product_variant_id().clone(),
                        quantity: item.quantity(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (merged, failures)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use cart_sync_core::Decimal;

    use super::*;
    use crate::config::SyncSettings;
    use crate::models::AuthState;
    use crate::services::cart::AddToCart;
    use crate::storage::{LocalCartStore, MemoryStorage};
    use crate::testing::InMemoryCartGateway;

    fn guest_service(gateway: &InMemoryCartGateway) -> (CartService, LocalCartStore) {
        let local = LocalCartStore::new(Arc::new(MemoryStorage::new()));
        let service = CartService::new(
            Arc::new(gateway.clone()),
            local.clone(),
            SyncSettings::default(),
            AuthState::ANONYMOUS,
        );
        (service, local)
    }

    #[test]
    fn test_coordinator_claims_once() {
        let coordinator = MergeCoordinator::new();
        assert!(coordinator.try_begin());
        assert!(!coordinator.try_begin());
        assert_eq!(coordinator.phase(), MergePhase::Detecting);
    }

    #[test]
    fn test_coordinator_allows_retry_after_failure() {
        let coordinator = MergeCoordinator::new();
        assert!(coordinator.try_begin());
        coordinator.advance(MergePhase::Failed);
        let mut phases = coordinator.subscribe();
        phases.borrow_and_update();

        assert!(coordinator.try_begin());
        assert!(phases.has_changed().unwrap());
        assert_eq!(coordinator.phase(), MergePhase::Detecting);
        assert!(!coordinator.try_begin());
    }

    #[test]
    fn test_failed_merge_resets_to_idle() {
        let coordinator = MergeCoordinator::new();
        assert!(!coordinator.reset_failed());
        assert!(coordinator.try_begin());
        coordinator.advance(MergePhase::Failed);

        assert!(coordinator.reset_failed());
        assert_eq!(coordinator.phase(), MergePhase::Idle);
        assert!(!coordinator.reset_failed());

        coordinator.advance(MergePhase::Done);
        assert!(!coordinator.reset_failed());
        assert_eq!(coordinator.phase(), MergePhase::Done);
    }

    #[test]
    fn test_coordinator_stays_done() {
        let coordinator = MergeCoordinator::new();
        assert!(coordinator.try_begin());
        coordinator.advance(MergePhase::Done);
        assert!(!coordinator.try_begin());
        assert_eq!(coordinator.phase(), MergePhase::Done);
    }

    #[tokio::test]
    async fn test_login_merges_guest_lines() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V2", 300, 1);
        gateway.set_price("V1", Decimal::from(500));
        let (service, local) = guest_service(&gateway);
        service.hydrate().await.unwrap();
        service
            .add_to_cart(AddToCart::new("V1", 2, Decimal::from(500)))
            .await
            .unwrap();

        let report = service
            .set_auth_state(AuthState::AUTHENTICATED)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.merged, 1);
        assert!(!report.skipped);
        assert_eq!(service.merge_phase(), MergePhase::Done);
        assert_eq!(service.cart().subtotal(), Decimal::from(1300));
        assert!(local.get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_guest_cart_goes_straight_to_done() {
        let gateway = InMemoryCartGateway::new();
        gateway.seed_item("V2", 300, 1);
        let (service, _) = guest_service(&gateway);

        let report = service
            .set_auth_state(AuthState::AUTHENTICATED)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.merged, 0);
        assert_eq!(service.merge_phase(), MergePhase::Done);
        assert_eq!(service.cart().total_quantity(), 1);
        assert_eq!(gateway.calls().add_item, 0);
    }

    #[tokio::test]
    async fn test_repeated_sign_in_does_not_merge_twice() {
        let gateway = InMemoryCartGateway::new();
        gateway.set_price("V1", Decimal::from(500));
        let (service, _) = guest_service(&gateway);
        service
            .add_to_cart(AddToCart::new("V1", 1, Decimal::from(500)))
            .await
            .unwrap();

        service.set_auth_state(AuthState::AUTHENTICATED).await.unwrap();
        let again = service
            .set_auth_state(AuthState::AUTHENTICATED)
            .await
            .unwrap()
            .unwrap();

        assert!(again.skipped);
        assert_eq!(gateway.calls().add_item, 1);
    }

    #[tokio::test]
    async fn test_baseline_failure_keeps_guest_cart() {
        let gateway = InMemoryCartGateway::new();
        let (service, local) = guest_service(&gateway);
        service
            .add_to_cart(AddToCart::new("V1", 1, Decimal::from(500)))
            .await
            .unwrap();

        gateway.fail_fetches(true);
        let err = service
            .set_auth_state(AuthState::AUTHENTICATED)
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(service.merge_phase(), MergePhase::Failed);
        assert_eq!(local.get().unwrap().total_quantity(), 1);
        assert_eq!(gateway.calls().add_item, 0);
    }

    #[tokio::test]
    async fn test_mutations_rejected_while_merging() {
        let gateway = InMemoryCartGateway::new();
        gateway.set_price("V1", Decimal::from(500));
        gateway.set_delay(std::time::Duration::from_millis(50));
        let (service, _) = guest_service(&gateway);
        service
            .add_to_cart(AddToCart::new("V1", 1, Decimal::from(500)))
            .await
            .unwrap();

        let merging = {
            let service = service.clone();
            tokio::spawn(async move { service.set_auth_state(AuthState::AUTHENTICATED).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = service.clear_cart().await.unwrap_err();
        assert!(matches!(err, CartError::MergeInProgress));
        merging.await.unwrap().unwrap();
    }
}
