//! Versioned cart snapshots.
//!
//! Optimistic edits and authoritative fetches race: a fetch issued before an
//! edit can complete after it. Every optimistic edit advances the edit clock;
//! a fetch takes a ticket when it is issued and its result is applied only if
//! no edit happened since and no optimistic edit is still waiting on the
//! server. A fetch queued behind the operation lock can take its ticket after
//! an edit was applied but before the edit's remote call runs, so the ticket
//! alone is not enough. Every edit schedules its own reconciliation once its
//! remote call resolves, so a discarded fetch is never the last word.

use std::collections::BTreeSet;

use cart_sync_core::{Cart, CartItemId, CartTotals, Coupon};
use serde::Serialize;

/// Monotonic revision of the published snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct CartVersion(u64);

impl CartVersion {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Edit clock position observed when a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Tracks optimistic edits and published revisions.
#[derive(Debug, Default)]
pub struct VersionClock {
    edits: u64,
    /// Optimistic edits whose remote call has not resolved.
    pending: u64,
    revision: u64,
}

impl VersionClock {
    /// Record an optimistic (or otherwise local) edit, returning its number.
    pub const fn begin_edit(&mut self) -> u64 {
        self.edits += 1;
        self.edits
    }

    /// Record an optimistic edit that still has to reach the server.
    pub const fn begin_pending_edit(&mut self) -> u64 {
        self.pending += 1;
        self.begin_edit()
    }

    /// The remote call of a pending edit resolved, successfully or not.
    pub const fn finish_pending_edit(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    pub const fn has_pending_edits(&self) -> bool {
        self.pending > 0
    }

    /// Ticket for a fetch issued now.
    pub const fn ticket(&self) -> FetchTicket {
        FetchTicket(self.edits)
    }

    /// Whether a fetch issued with `ticket` may replace the snapshot.
    pub const fn accepts(&self, ticket: FetchTicket) -> bool {
        self.pending == 0 && ticket.0 >= self.edits
    }

    /// Whether `edit` is the most recent edit.
    pub const fn is_latest_edit(&self, edit: u64) -> bool {
        edit == self.edits
    }

    pub const fn next_revision(&mut self) -> CartVersion {
        self.revision += 1;
        CartVersion(self.revision)
    }
}

/// What observers see after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub version: CartVersion,
    pub authenticated: bool,
    pub cart: Cart,
    pub coupon: Option<Coupon>,
    pub totals: CartTotals,
    /// Lines with a server call in flight.
    pub loading_items: BTreeSet<CartItemId>,
}

impl CartSnapshot {
    pub(crate) fn initial(authenticated: bool) -> Self {
        Self {
            version: CartVersion::default(),
            authenticated,
            cart: Cart::empty(),
            coupon: None,
            totals: CartTotals::new(Cart::empty().subtotal(), cart_sync_core::Decimal::ZERO),
            loading_items: BTreeSet::new(),
        }
    }
}
