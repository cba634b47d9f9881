//! Secret hashing.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{LegacyDigest, SecretHash};

/// SHA-256 of a raw secret, the key identities are indexed by.
pub fn hash_secret(secret: &str) -> SecretHash {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    SecretHash::new(format!("{:x}", hasher.finalize()))
}

/// SHA-1 of a raw secret, as sent by legacy uploaders.
pub fn legacy_digest(secret: &str) -> LegacyDigest {
    let mut hasher = Sha1::new();
    hasher.update(secret.as_bytes());
    LegacyDigest::new(format!("{:x}", hasher.finalize()))
}

/// Generate a fresh 64 hex character API secret.
pub fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
