//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types.
//!
//! The order service hands out identifiers as either JSON strings or JSON
//! numbers, so every ID is normalized to its string form.

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<&str>`, `From<String>` and `Display` implementations
///
/// # Example
///
/// ```rust
/// # use bioapp_core::define_id;
/// define_id!(SkuId);
/// define_id!(BatchId);
///
/// let sku = SkuId::new("p1");
/// let batch = BatchId::new("p1");
///
/// // These are different types, so this won't compile:
/// // let _: SkuId = batch;
/// assert_eq!(sku.as_str(), batch.as_str());
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
            /// Create a new ID from anything string-like.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID and return the inner string.
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

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Define standard entity IDs
define_id!(ProductId);
define_id!(OrderId);
define_id!(PaymentIntentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_conversion() {
        let id = ProductId::new("p1");
        assert_eq!(id.to_string(), "p1");
        assert_eq!(id.as_str(), "p1");
        assert_eq!(String::from(id), "p1");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = OrderId::from("ord_42");
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"ord_42\"");
    }
}
