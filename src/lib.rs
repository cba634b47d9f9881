// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod query;
pub mod types;

// Re-export key types and functions
pub use api::{AppState, SharedState, create_router};
pub use auth::{CredentialResolver, Identity, ResolutionOutcome, TokenService, UserStore};
pub use config::{AppConfig, AuthConfig, load_config};
pub use db::{DatabaseConfig, Db, RecordStore, create_connection, ensure_schema};
pub use query::{CompiledQuery, DeletionScope, compile, compile_deletion};
pub use types::TenantId;

use anyhow::Result;
use std::sync::Arc;

/// Open the configured database and make sure its tables exist.
pub async fn connect(config: DatabaseConfig) -> Result<Db> {
    let db = create_connection(config).await?;
    ensure_schema(&db).await?;
    Ok(db)
}

/// Build the shared handler state from configuration.
pub fn create_state(db: Db, config: &AppConfig) -> SharedState {
    let tokens = Arc::new(TokenService::from_config(&config.auth));
    AppState::new(db, tokens, config.app_name.clone())
}
