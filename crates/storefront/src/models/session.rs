//! Session-related types.
//!
//! The authentication signal is owned by whoever manages the shopper's
//! credentials; the cart engine only observes it.

use serde::{Deserialize, Serialize};

/// Snapshot of the externally owned authentication signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AuthState {
    /// Whether the session carries an authenticated identity.
    pub authenticated: bool,
    /// Whether the identity is still being resolved.
    pub loading: bool,
}

impl AuthState {
    /// A settled anonymous session.
    pub const ANONYMOUS: Self = Self {
        authenticated: false,
        loading: false,
    };

    /// A settled authenticated session.
    pub const AUTHENTICATED: Self = Self {
        authenticated: true,
        loading: false,
    };

    /// Identity resolution in progress.
    pub const LOADING: Self = Self {
        authenticated: false,
        loading: true,
    };

    /// Classify the move from `self` to `next`.
    ///
    /// Loading states never produce a transition; the change is observed
    /// once loading settles.
    #[must_use]
    pub const fn transition_to(self, next: Self) -> AuthTransition {
        if next.loading {
            return AuthTransition::None;
        }
        match (self.authenticated, next.authenticated) {
            (false, true) => AuthTransition::LoggedIn,
            (true, false) => AuthTransition::LoggedOut,
            _ => AuthTransition::None,
        }
    }
}

/// Edge observed on the authentication signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTransition {
    None,
    LoggedIn,
    LoggedOut,
}

/// Storage keys for device-local cart data.
pub mod keys {
    /// Key for the guest cart snapshot.
    pub const GUEST_CART: &str = "guest_cart";
}
