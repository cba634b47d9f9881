//! Resolved caller identity.

use serde::{Deserialize, Serialize};

use crate::db::schema::IdentityRecord;
use crate::types::{SecretHash, TenantId};

/// An identity known to the directory.
///
/// Produced by credential resolution and attached to the request; its id is
/// the tenant scope for every record the request reads or writes. It is
/// immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: TenantId,
    email: Option<String>,
    secret_hash: SecretHash,
    active: bool,
}

impl Identity {
    pub fn new(
        id: TenantId,
        email: Option<String>,
        secret_hash: SecretHash,
        active: bool,
    ) -> Self {
        Self {
            id,
            email,
            secret_hash,
            active,
        }
    }

    /// Get the tenant id.
    pub fn id(&self) -> &TenantId {
        &self.id
    }

    /// Get the email if available.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn secret_hash(&self) -> &SecretHash {
        &self.secret_hash
    }

    /// Whether this identity may authenticate.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Get a display-friendly name for this identity.
    pub fn display(&self) -> String {
        match &self.email {
            Some(email) => email.clone(),
            None => self.id.to_string(),
        }
    }
}

impl From<IdentityRecord> for Identity {
    fn from(record: IdentityRecord) -> Self {
        Self {
            id: TenantId::new(record.user_id),
            email: record.email,
            secret_hash: SecretHash::new(record.secret_hash),
            active: record.is_active,
        }
    }
}
