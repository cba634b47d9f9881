use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "nightscout".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "cgm".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        // Identities. The raw secret is kept alongside its hash because
        // legacy clients authenticate with a SHA-1 of it.
        "DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS user_user_id ON TABLE user COLUMNS user_id UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_secret_hash ON TABLE user COLUMNS secret_hash UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_email ON TABLE user COLUMNS email;",
        // CGM entries
        "DEFINE TABLE IF NOT EXISTS entry SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS entry_owner_date ON TABLE entry COLUMNS owner, date;
         DEFINE INDEX IF NOT EXISTS entry_owner_type ON TABLE entry COLUMNS owner, type;",
        // Careportal treatments
        "DEFINE TABLE IF NOT EXISTS treatment SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS treatment_owner_created ON TABLE treatment COLUMNS owner, created_at;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
