//! Identity directory.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::context::Identity;
use crate::auth::secret::{generate_secret, hash_secret, legacy_digest};
use crate::db::Db;
use crate::db::schema::{IdentityCreate, IdentityRecord};
use crate::types::{LegacyDigest, SecretHash, TenantId};

/// Boxed future returned by directory lookups.
pub type DirectoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DirectoryError>> + Send + 'a>>;

/// The directory could not be consulted.
#[derive(Debug, Clone)]
pub struct DirectoryError(String);

impl DirectoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Directory unavailable: {}", self.0)
    }
}

impl std::error::Error for DirectoryError {}

impl From<anyhow::Error> for DirectoryError {
    fn from(e: anyhow::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<surrealdb::Error> for DirectoryError {
    fn from(e: surrealdb::Error) -> Self {
        Self(e.to_string())
    }
}

/// An active identity together with its raw secret.
#[derive(Debug, Clone)]
pub struct ActiveIdentity {
    pub identity: Identity,
    pub secret: String,
}

/// Read access to identities.
///
/// Every method is a fresh read; implementations must not cache results
/// across calls.
pub trait UserDirectory: Send + Sync {
    /// Active identity whose secret hashes to `hash`.
    fn find_by_secret_hash<'a>(
        &'a self,
        hash: &'a SecretHash,
    ) -> DirectoryFuture<'a, Option<Identity>>;

    /// Active identity with the given id.
    fn find_by_id<'a>(&'a self, id: &'a TenantId) -> DirectoryFuture<'a, Option<Identity>>;

    /// All active identities with their raw secrets, in a stable order.
    fn list_active(&self) -> DirectoryFuture<'_, Vec<ActiveIdentity>>;

    /// Active identity whose secret has the given SHA-1 digest.
    ///
    /// The default scans [`UserDirectory::list_active`] and returns the
    /// first match, which is O(n) in the number of active identities.
    fn find_by_legacy_digest<'a>(
        &'a self,
        digest: &'a LegacyDigest,
    ) -> DirectoryFuture<'a, Option<Identity>> {
        Box::pin(async move {
            let candidates = self.list_active().await?;
            debug!("Scanning {} identities for legacy digest", candidates.len());

            Ok(candidates
                .into_iter()
                .find(|c| {
                    legacy_digest(&c.secret)
                        .as_str()
                        .eq_ignore_ascii_case(digest.as_str())
                })
                .map(|c| c.identity))
        })
    }
}

/// Identity storage backed by SurrealDB.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    /// Create a new user store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Provision a new identity. A secret is generated when none is given.
    ///
    /// Returns the identity and its raw secret.
    pub async fn create_identity(
        &self,
        email: Option<&str>,
        secret: Option<&str>,
    ) -> Result<(Identity, String)> {
        let secret = secret.map(str::to_string).unwrap_or_else(generate_secret);
        let create = IdentityCreate {
            user_id: Uuid::new_v4().to_string(),
            email: email.map(str::to_string),
            secret_hash: hash_secret(&secret).into_inner(),
            api_secret: secret.clone(),
        };

        let query = r#"
            CREATE user CONTENT {
                user_id: $user_id,
                email: $email,
                api_secret: $api_secret,
                secret_hash: $secret_hash,
                is_active: true,
                created_at: time::now()
            } RETURN user_id, email, api_secret, secret_hash, is_active, created_at
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", create.user_id))
            .bind(("email", create.email))
            .bind(("api_secret", create.api_secret))
            .bind(("secret_hash", create.secret_hash))
            .await?;

        let created: Option<IdentityRecord> = res.take(0)?;
        let record = created.ok_or_else(|| anyhow::anyhow!("failed to create identity"))?;

        info!("Created identity {}", record.user_id);
        Ok((Identity::from(record), secret))
    }

    /// Identity with the given email, active or not.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let query = r#"
            SELECT user_id, email, api_secret, secret_hash, is_active, created_at
            FROM user
            WHERE email = $email
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("email", email.to_string()))
            .await?;

        let users: Vec<IdentityRecord> = res.take(0)?;
        Ok(users.into_iter().next().map(Identity::from))
    }

    /// Deactivate an identity. It can no longer authenticate.
    pub async fn deactivate(&self, id: &TenantId) -> Result<()> {
        self.set_active(id, false).await
    }

    /// Reactivate a deactivated identity.
    pub async fn reactivate(&self, id: &TenantId) -> Result<()> {
        self.set_active(id, true).await
    }

    /// Replace an identity's secret with a freshly generated one, or with
    /// `secret` when given. The old secret and its SHA-1 stop resolving.
    ///
    /// Returns the new raw secret, or `None` when no identity has that id.
    pub async fn regenerate_secret(
        &self,
        id: &TenantId,
        secret: Option<&str>,
    ) -> Result<Option<String>> {
        let secret = secret.map(str::to_string).unwrap_or_else(generate_secret);

        let query = r#"
            UPDATE user SET
                api_secret = $api_secret,
                secret_hash = $secret_hash,
                updated_at = time::now()
            WHERE user_id = $user_id
            RETURN user_id, email, api_secret, secret_hash, is_active, created_at
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", id.as_str().to_string()))
            .bind(("api_secret", secret.clone()))
            .bind(("secret_hash", hash_secret(&secret).into_inner()))
            .await?;

        let updated: Vec<IdentityRecord> = res.take(0)?;
        if updated.is_empty() {
            return Ok(None);
        }

        info!("Regenerated secret for identity {}", id);
        Ok(Some(secret))
    }

    async fn set_active(&self, id: &TenantId, active: bool) -> Result<()> {
        let query = r#"
            UPDATE user SET
                is_active = $active,
                updated_at = time::now()
            WHERE user_id = $user_id
        "#;

        self.db
            .query(query)
            .bind(("user_id", id.as_str().to_string()))
            .bind(("active", active))
            .await?
            .check()?;

        Ok(())
    }

    async fn select_one(&self, field: &'static str, value: String) -> Result<Option<Identity>> {
        let query = format!(
            "SELECT user_id, email, api_secret, secret_hash, is_active, created_at \
             FROM user WHERE {} = $value AND is_active = true LIMIT 1",
            field
        );

        let mut res = self.db.query(query).bind(("value", value)).await?;
        let users: Vec<IdentityRecord> = res.take(0)?;
        Ok(users.into_iter().next().map(Identity::from))
    }
}

impl UserDirectory for UserStore {
    fn find_by_secret_hash<'a>(
        &'a self,
        hash: &'a SecretHash,
    ) -> DirectoryFuture<'a, Option<Identity>> {
        Box::pin(async move {
            Ok(self
                .select_one("secret_hash", hash.as_str().to_string())
                .await?)
        })
    }

    fn find_by_id<'a>(&'a self, id: &'a TenantId) -> DirectoryFuture<'a, Option<Identity>> {
        Box::pin(async move { Ok(self.select_one("user_id", id.as_str().to_string()).await?) })
    }

    fn list_active(&self) -> DirectoryFuture<'_, Vec<ActiveIdentity>> {
        Box::pin(async move {
            let query = r#"
                SELECT user_id, email, api_secret, secret_hash, is_active, created_at
                FROM user
                WHERE is_active = true
                ORDER BY created_at ASC, user_id ASC
            "#;

            let mut res = self.db.query(query).await?;
            let users: Vec<IdentityRecord> = res.take(0)?;

            Ok(users
                .into_iter()
                .map(|record| ActiveIdentity {
                    secret: record.api_secret.clone(),
                    identity: Identity::from(record),
                })
                .collect())
        })
    }
}
