use serde::Deserialize;
use std::{env, fs, path::PathBuf};

use crate::db::DatabaseConfig;

pub const DEFAULT_BIND: &str = "0.0.0.0:3000";
pub const DEFAULT_APP_NAME: &str = "Nightscout API Backend";
pub const DEFAULT_TOKEN_TTL: &str = "7d";

/// Signed-token settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret used to sign and verify tokens
    pub jwt_secret: String,
    /// Token lifetime in seconds
    pub token_ttl_seconds: u64,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, token_ttl_seconds: u64) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl_seconds,
        }
    }

    /// Build from `JWT_SECRET` / `JWT_EXPIRES_IN`.
    ///
    /// Without a configured secret a random one is generated, which means
    /// issued tokens stop verifying once the process restarts.
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("JWT_SECRET not set, generating an ephemeral signing secret");
                crate::auth::generate_secret()
            }
        };
        let ttl = env::var("JWT_EXPIRES_IN").unwrap_or_else(|_| DEFAULT_TOKEN_TTL.to_string());

        Ok(Self {
            jwt_secret,
            token_ttl_seconds: parse_duration_secs(&ttl)?,
        })
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: String,
    pub app_name: String,
    pub base_url: Option<String>,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Build from environment variables only.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind: env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            app_name: env::var("APP_NAME").unwrap_or_else(|_| DEFAULT_APP_NAME.to_string()),
            base_url: env::var("BASE_URL").ok(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::from_env()?,
        })
    }

    /// Overlay values from a JSON config file.
    pub fn apply_file(mut self, file: FileConfig) -> anyhow::Result<Self> {
        let file = expand_file(file);

        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(name) = file.app_name {
            self.app_name = name;
        }
        if file.base_url.is_some() {
            self.base_url = file.base_url;
        }
        if let Some(db) = file.database {
            if let Some(url) = db.url {
                self.database.url = url;
            }
            if let Some(ns) = db.namespace {
                self.database.namespace = ns;
            }
            if let Some(name) = db.database {
                self.database.database = name;
            }
            if db.username.is_some() {
                self.database.username = db.username;
            }
            if db.password.is_some() {
                self.database.password = db.password;
            }
        }
        if let Some(secret) = file.jwt_secret {
            self.auth.jwt_secret = secret;
        }
        if let Some(ttl) = file.jwt_expires_in {
            self.auth.token_ttl_seconds = parse_duration_secs(&ttl)?;
        }

        Ok(self)
    }
}

/// On-disk configuration; every field is optional and overrides the
/// environment-derived default.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default, rename = "appName")]
    pub app_name: Option<String>,
    #[serde(default, rename = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub database: Option<FileDatabaseConfig>,
    #[serde(default, rename = "jwtSecret")]
    pub jwt_secret: Option<String>,
    #[serde(default, rename = "jwtExpiresIn")]
    pub jwt_expires_in: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileDatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Locate the optional JSON config file.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("NIGHTSCOUT_CONFIG") {
        return Some(PathBuf::from(p));
    }

    let candidate = PathBuf::from("nightscout.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

pub fn read_config_file(path: &PathBuf) -> anyhow::Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Could not read config {}: {}", path.display(), e))?;
    let cfg: FileConfig = serde_json::from_str(&raw)?;
    Ok(cfg)
}

/// Environment defaults, overlaid with the config file when one exists.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let config = AppConfig::from_env()?;

    match resolve_config_path() {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            config.apply_file(read_config_file(&path)?)
        }
        None => Ok(config),
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_opt(value: Option<String>) -> Option<String> {
    value.map(|v| expand_env_vars(&v))
}

fn expand_file(cfg: FileConfig) -> FileConfig {
    FileConfig {
        bind: expand_opt(cfg.bind),
        app_name: expand_opt(cfg.app_name),
        base_url: expand_opt(cfg.base_url),
        database: cfg.database.map(|db| FileDatabaseConfig {
            url: expand_opt(db.url),
            namespace: expand_opt(db.namespace),
            database: expand_opt(db.database),
            username: expand_opt(db.username),
            password: expand_opt(db.password),
        }),
        jwt_secret: expand_opt(cfg.jwt_secret),
        jwt_expires_in: expand_opt(cfg.jwt_expires_in),
    }
}

/// Parse a duration such as `7d`, `1w`, `2days` or `90min` into seconds.
/// A bare integer is taken as seconds.
pub fn parse_duration_secs(input: &str) -> anyhow::Result<u64> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(secs);
    }

    humantime::parse_duration(input)
        .map(|duration| duration.as_secs())
        .map_err(|e| anyhow::anyhow!("invalid duration `{}`: {}", input, e))
}
