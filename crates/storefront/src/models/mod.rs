//! Session models shared by the cart engine.

pub mod session;

pub use session::{AuthState, AuthTransition, keys as storage_keys};
