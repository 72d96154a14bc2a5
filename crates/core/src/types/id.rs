//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. Cart IDs are opaque
//! strings: the server assigns its own, and guest carts mint prefixed ones.

use uuid::Uuid;

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>`, `From<&str>` and `Display` implementations
///
/// # Example
///
/// ```rust
/// # use cart_sync_core::define_id;
/// define_id!(LineId);
/// define_id!(SkuId);
///
/// let line = LineId::new("line-1");
/// let sku = SkuId::new("line-1");
///
/// // These are different types, so this won't compile:
/// // let _: LineId = sku;
/// assert_eq!(line.as_str(), sku.as_str());
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID and return the underlying string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(CartItemId);
define_id!(VariantId);
define_id!(CouponId);

impl CartItemId {
    /// Prefix reserved for lines created in a guest (device-local) cart.
    ///
    /// Server-issued line IDs never start with this prefix, so the origin of
    /// a line can be told apart without a lookup.
    pub const GUEST_PREFIX: &'static str = "guest_";

    /// Mint a fresh guest line ID.
    #[must_use]
    pub fn new_guest() -> Self {
        Self(format!("{}{}", Self::GUEST_PREFIX, Uuid::new_v4().simple()))
    }

    /// Whether this line was created in a guest cart.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.0.starts_with(Self::GUEST_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_ids_are_prefixed_and_unique() {
        let a = CartItemId::new_guest();
        let b = CartItemId::new_guest();
        assert!(a.is_guest());
        assert!(b.is_guest());
        assert_ne!(a, b);
    }

    #[test]
    fn test_server_ids_are_not_guest() {
        assert!(!CartItemId::new("42").is_guest());
        assert!(!CartItemId::new("line_guest_1").is_guest());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = VariantId::new("V1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"V1\"");
        let back: VariantId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
