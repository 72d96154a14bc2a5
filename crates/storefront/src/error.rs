//! Unified error handling with Sentry breadcrumbs.
//!
//! Provides a unified `CartError` type for every cart operation. Nothing here
//! is fatal: each variant is recoverable by retrying the user action.

use cart_sync_core::{CartItemId, CartMutationError, InvariantViolation, VariantId};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::storage::StorageError;

/// Error type for cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The cart API could not be reached or did not answer in time.
    #[error("Transport error: {0}")]
    Transport(GatewayError),

    /// The request was invalid or rejected by the server.
    #[error("Validation error: {0}")]
    Validation(String),

    /// One or more guest lines failed to migrate to the server cart.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Cart aggregates disagree with its lines.
    #[error("Cart state invariant violated: {0}")]
    StateInvariantViolation(#[from] InvariantViolation),

    /// Device-local storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A guest-cart merge holds the cart.
    #[error("Cart merge in progress")]
    MergeInProgress,
}

impl CartError {
    /// Whether the failure came from the network layer.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether retrying the same action unchanged may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Merge(_) | Self::Storage(_) | Self::MergeInProgress
        )
    }
}

impl From<GatewayError> for CartError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::Rejected(message) => Self::Validation(message),
            other => Self::Transport(other),
        }
    }
}

impl From<CartMutationError> for CartError {
    fn from(error: CartMutationError) -> Self {
        Self::Validation(error.to_string())
    }
}

/// A guest line that could not be added to the server cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFailure {
    pub item_id: CartItemId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub reason: String,
}

/// Aggregate result of a merge in which some lines failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} guest cart line(s) failed to merge ({} merged): {}", .failures.len(), .merged, format_failures(.failures))]
pub struct MergeError {
    /// Lines that stayed in the guest cart.
    pub failures: Vec<MergeFailure>,
    /// Number of lines that reached the server cart.
    pub merged: usize,
}

fn format_failures(failures: &[MergeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} x{} ({})", f.variant_id, f.quantity, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

/// Add a breadcrumb for cart actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// actions leading up to an error. Without an initialized Sentry client this
/// is a no-op.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added to cart", Some(&[("variant_id", "V1")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
