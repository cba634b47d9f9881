use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use nightscout_api::{
    AppConfig, CredentialResolver, ResolutionOutcome, TenantId, TokenService, UserStore,
    auth::{RequestAttributes, UserDirectory, legacy_digest},
    compile, connect, create_router, create_state, load_config,
    query::requested_count,
};

#[derive(Parser)]
#[command(name = "nightscout-api")]
#[command(about = "Nightscout-compatible CGM data API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Server {
        /// Bind address, e.g. 0.0.0.0:3000 (overrides BIND_ADDRESS)
        #[arg(long)]
        bind: Option<String>,
        /// Database url (overrides SURREALDB_URL)
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Initialize the database
    Init {
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Provision a new identity and print its credentials
    CreateUser {
        #[arg(long)]
        email: Option<String>,
        /// Use this API secret instead of generating one
        #[arg(long, env = "NIGHTSCOUT_NEW_SECRET")]
        secret: Option<String>,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Stop an identity from authenticating
    DeactivateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Allow a deactivated identity to authenticate again
    ReactivateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Replace an identity's API secret; the old secret stops working
    RegenerateSecret {
        #[arg(long)]
        email: String,
        /// Use this API secret instead of generating one
        #[arg(long, env = "NIGHTSCOUT_NEW_SECRET")]
        secret: Option<String>,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// List active identities
    ListUsers {
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Check which identity a secret, SHA-1 digest or token resolves to
    TestCredential {
        value: String,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Issue a signed access token for an identity
    IssueToken {
        #[arg(long)]
        email: String,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Show how a raw query string compiles, without touching storage
    CompileQuery {
        /// Raw query string, e.g. 'find[sgv][$gte]=120&count=5'
        query: String,
        #[arg(long, default_value = "cli-tenant")]
        tenant: String,
        /// Result count; read from the query string when omitted
        #[arg(long)]
        count: Option<u32>,
        #[arg(long, default_value = "date")]
        timestamp_field: String,
    },
}

fn with_db_url(mut config: AppConfig, db_url: Option<String>) -> AppConfig {
    if let Some(url) = db_url {
        config.database.url = url;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("nightscout_api=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { bind, db_url } => {
            let mut config = with_db_url(load_config()?, db_url);
            if let Some(bind) = bind {
                config.bind = bind;
            }
            info!("Using database url for API server: {}", config.database.url);

            let db = connect(config.database.clone()).await?;
            let app = create_router(create_state(db, &config));

            let listener = tokio::net::TcpListener::bind(&config.bind).await?;
            info!("{} listening on http://{}", config.app_name, config.bind);
            if let Some(base_url) = &config.base_url {
                info!("Public base url: {}", base_url);
            }

            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            let config = with_db_url(load_config()?, db_url);
            info!("Using database url for initialization: {}", config.database.url);

            info!("Initializing database...");
            connect(config.database).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateUser {
            email,
            secret,
            db_url,
        } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);

            let (identity, secret) = users
                .create_identity(email.as_deref(), secret.as_deref())
                .await?;

            println!("Identity created successfully!");
            println!();
            println!("  Id:          {}", identity.id());
            println!("  Email:       {}", identity.email().unwrap_or("-"));
            println!("  API secret:  {}", secret);
            println!("  SHA-1:       {}", legacy_digest(&secret));
            println!();
            println!("Use with: -H 'api-secret: {}'", secret);
        }
        Commands::DeactivateUser { email, db_url } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);

            match users.find_by_email(&email).await? {
                Some(identity) => {
                    users.deactivate(identity.id()).await?;
                    println!("Identity '{}' has been deactivated.", identity.display());
                }
                None => println!("No identity found with email '{}'.", email),
            }
        }
        Commands::ReactivateUser { email, db_url } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);

            match users.find_by_email(&email).await? {
                Some(identity) => {
                    users.reactivate(identity.id()).await?;
                    println!("Identity '{}' has been reactivated.", identity.display());
                }
                None => println!("No identity found with email '{}'.", email),
            }
        }
        Commands::RegenerateSecret {
            email,
            secret,
            db_url,
        } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);

            let Some(identity) = users.find_by_email(&email).await? else {
                println!("No identity found with email '{}'.", email);
                return Ok(());
            };

            match users.regenerate_secret(identity.id(), secret.as_deref()).await? {
                Some(secret) => {
                    println!("API secret regenerated for '{}'.", identity.display());
                    println!();
                    println!("  API secret:  {}", secret);
                    println!("  SHA-1:       {}", legacy_digest(&secret));
                    println!();
                    println!("The previous secret and its SHA-1 no longer authenticate.");
                }
                None => println!("Identity '{}' disappeared before rotation.", identity.display()),
            }
        }
        Commands::ListUsers { db_url } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);

            let active = users.list_active().await?;
            if active.is_empty() {
                println!("No active identities found.");
                return Ok(());
            }

            println!("{:<38} {:<30}", "ID", "EMAIL");
            println!("{}", "-".repeat(68));
            for entry in active {
                println!(
                    "{:<38} {:<30}",
                    entry.identity.id(),
                    entry.identity.email().unwrap_or("-")
                );
            }
        }
        Commands::TestCredential { value, db_url } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);
            let resolver = CredentialResolver::new(
                Arc::new(users),
                Arc::new(TokenService::from_config(&config.auth)),
            );

            let attributes = RequestAttributes {
                api_secret: Some(value.clone()),
                token: Some(value),
                ..Default::default()
            };

            match resolver.resolve(&attributes).await {
                ResolutionOutcome::Authenticated(identity) => {
                    println!("Resolves to '{}'.", identity.display())
                }
                ResolutionOutcome::Failed(reason) => println!("Does not resolve: {}.", reason),
            }
        }
        Commands::IssueToken { email, db_url } => {
            let config = with_db_url(load_config()?, db_url);
            let users = UserStore::new(connect(config.database).await?);

            let Some(identity) = users.find_by_email(&email).await? else {
                println!("No identity found with email '{}'.", email);
                return Ok(());
            };
            if !identity.is_active() {
                println!("Identity '{}' is deactivated.", identity.display());
                return Ok(());
            }

            let tokens = TokenService::from_config(&config.auth);
            let token = tokens.issue(&identity)?;
            println!("{}", token);
        }
        Commands::CompileQuery {
            query,
            tenant,
            count,
            timestamp_field,
        } => {
            let compiled = compile(
                &query,
                &TenantId::new(tenant),
                count.or_else(|| requested_count(&query)),
                &timestamp_field,
            );
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
    }

    Ok(())
}
