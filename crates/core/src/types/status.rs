//! Status enums for cart synchronization.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the guest-cart merge that runs once per login.
///
/// ```text
/// idle -> detecting -> merging -> reconciling -> done
///             \            \
///              `-> failed <-'
///
/// failed -> idle -> detecting   (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    #[default]
    Idle,
    /// Fetching the server cart baseline.
    Detecting,
    /// Pushing guest lines to the server cart.
    Merging,
    /// Clearing the guest cart and refreshing the snapshot.
    Reconciling,
    Done,
    Failed,
}

impl MergePhase {
    /// Textual phase indicator.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Merging => "merging",
            Self::Reconciling => "reconciling",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether cart interaction should be blocked during this phase.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Detecting | Self::Merging | Self::Reconciling)
    }

    /// Whether the phase is terminal for the current attempt.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a verified coupon has been persisted on the server cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CouponApplyStatus {
    /// Verified and displayed; the background apply has not finished.
    #[default]
    Pending,
    Applied,
    /// The background apply failed; checkout must re-apply.
    Failed,
}
