//! NewType wrappers for strong typing throughout the service.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a raw API secret where its hash is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_string!(
    /// Directory-assigned identifier of an identity.
    ///
    /// Every record an identity uploads is stamped with this value in its
    /// `owner` field, and every query it issues is scoped to it.
    TenantId
);

newtype_string!(
    /// Lowercase hex SHA-256 of an API secret.
    ///
    /// This is the value the directory indexes identities by; raw secrets
    /// presented by clients are hashed once and looked up through it.
    SecretHash
);

newtype_string!(
    /// Lowercase hex SHA-1 of an API secret.
    ///
    /// Older uploaders (xDrip+ and friends) send this digest in place of the
    /// secret itself.
    LegacyDigest
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_creation() {
        let id = TenantId::new("3f0c");
        assert_eq!(id.as_str(), "3f0c");
        assert_eq!(id.to_string(), "3f0c");
    }

    #[test]
    fn test_from_conversions() {
        let hash: SecretHash = "abc".into();
        assert_eq!(hash.as_str(), "abc");

        let digest: LegacyDigest = String::from("def").into();
        assert_eq!(digest.into_inner(), "def");
    }

    #[test]
    fn test_serde_transparent() {
        let id = TenantId::new("user-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user-1\"");

        let parsed: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_type_equality() {
        assert_eq!(SecretHash::new("a"), SecretHash::new("a"));
        assert_ne!(SecretHash::new("a"), SecretHash::new("b"));
    }
}
