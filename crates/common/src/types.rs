use serde::{Deserialize, Serialize};

/// Error returned when a path or query segment is not a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    pub kind: &'static str,
    pub input: String,
}

impl std::fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {} id: {:?}", self.kind, self.input)
    }
}

impl std::error::Error for ParseIdError {}

/// Declares a database-backed integer identifier.
///
/// Each identifier wraps an `i64` so that an order id can never be passed
/// where a variant id is expected.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database key.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw database key.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .map(Self)
                    .ok_or_else(|| ParseIdError {
                        kind: $kind,
                        input: s.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Identifier of a placed order.
    OrderId,
    "order"
);
define_id!(
    /// Identifier of a purchasable product variant (SKU).
    VariantId,
    "variant"
);
define_id!(
    /// Identifier of a registered user.
    UserId,
    "user"
);
define_id!(
    /// Identifier of a coupon.
    CouponId,
    "coupon"
);
define_id!(
    /// Identifier of a payment attempt in the ledger.
    PaymentId,
    "payment"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_from_positive_integers() {
        let id: OrderId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn ids_reject_garbage_and_non_positive_values() {
        assert!("abc".parse::<VariantId>().is_err());
        assert!("0".parse::<VariantId>().is_err());
        assert!("-3".parse::<VariantId>().is_err());

        let err = "x1".parse::<UserId>().unwrap_err();
        assert_eq!(err.kind, "user");
        assert_eq!(err.to_string(), "invalid user id: \"x1\"");
    }

    #[test]
    fn ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&VariantId::new(10)).unwrap();
        assert_eq!(json, "10");
        let back: VariantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VariantId::new(10));
    }
}
