//! Credential resolution for HTTP requests.

use std::fmt;
use std::sync::Arc;

use http::HeaderMap;
use http::header::AUTHORIZATION;
use tracing::{debug, error};

use crate::auth::context::Identity;
use crate::auth::directory::UserDirectory;
use crate::auth::strategies::{CredentialStrategy, standard_chain};
use crate::auth::token::TokenService;

pub const API_SECRET_HEADER: &str = "api-secret";
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";
pub const TOKEN_QUERY_PARAM: &str = "token";

/// The credential-bearing parts of a request, as plain strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAttributes {
    /// `api-secret` header
    pub api_secret: Option<String>,
    /// `token` query parameter
    pub token: Option<String>,
    /// Raw `Authorization` header
    pub authorization: Option<String>,
    /// Raw `x-forwarded-host` header
    pub forwarded_host: Option<String>,
}

impl RequestAttributes {
    /// Collect attributes from request headers and the raw query string.
    pub fn from_parts(headers: &HeaderMap, query: Option<&str>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let token = query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == TOKEN_QUERY_PARAM)
                .map(|(_, value)| value.into_owned())
        });

        Self {
            api_secret: header(API_SECRET_HEADER),
            token,
            authorization: headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            forwarded_host: header(FORWARDED_HOST_HEADER),
        }
    }

    /// Whether the request carries anything that looks like a credential.
    ///
    /// A forwarded host only counts when it embeds a `secret@`, since
    /// reverse proxies set it on every request.
    pub fn has_credential(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

        present(&self.api_secret)
            || present(&self.token)
            || present(&self.authorization)
            || self.forwarded_host.as_deref().is_some_and(|h| h.contains('@'))
    }
}

/// Why resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Nothing credential-like was presented
    NoCredentialPresented,
    /// Every strategy was tried and none matched
    AllStrategiesExhausted,
    /// The directory could not be consulted
    InternalError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentialPresented => write!(f, "No credential presented"),
            Self::AllStrategiesExhausted => write!(f, "No credential matched an active identity"),
            Self::InternalError => write!(f, "Authentication internal error"),
        }
    }
}

impl std::error::Error for FailureReason {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Authenticated(Identity),
    Failed(FailureReason),
}

/// Runs the credential strategies in order and returns the first identity
/// any of them produces.
pub struct CredentialResolver {
    directory: Arc<dyn UserDirectory>,
    strategies: Vec<Box<dyn CredentialStrategy>>,
}

impl CredentialResolver {
    /// Resolver with the standard chain.
    pub fn new(directory: Arc<dyn UserDirectory>, tokens: Arc<TokenService>) -> Self {
        Self::with_strategies(directory, standard_chain(tokens))
    }

    /// Resolver with a custom chain.
    pub fn with_strategies(
        directory: Arc<dyn UserDirectory>,
        strategies: Vec<Box<dyn CredentialStrategy>>,
    ) -> Self {
        Self {
            directory,
            strategies,
        }
    }

    pub fn strategies(&self) -> &[Box<dyn CredentialStrategy>] {
        &self.strategies
    }

    /// Resolve the caller. A request with no credential at all fails with
    /// [`FailureReason::NoCredentialPresented`].
    pub async fn resolve(&self, attributes: &RequestAttributes) -> ResolutionOutcome {
        if !attributes.has_credential() {
            debug!("Authentication failed: no credential presented");
            return ResolutionOutcome::Failed(FailureReason::NoCredentialPresented);
        }

        for strategy in &self.strategies {
            match strategy
                .try_resolve(attributes, self.directory.as_ref())
                .await
            {
                Ok(Some(identity)) if identity.is_active() => {
                    debug!(
                        "Authenticated {} via {} on {}",
                        identity.id(),
                        strategy.name(),
                        strategy.channel()
                    );
                    return ResolutionOutcome::Authenticated(identity);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        "Authentication internal error in {} on {}: {}",
                        strategy.name(),
                        strategy.channel(),
                        e
                    );
                    return ResolutionOutcome::Failed(FailureReason::InternalError);
                }
            }
        }

        debug!("Authentication failed: all strategies exhausted");
        ResolutionOutcome::Failed(FailureReason::AllStrategiesExhausted)
    }

    /// Resolve for endpoints where authentication is optional.
    ///
    /// No credential at all yields `Ok(None)`. Once any credential is
    /// present the full chain decides, and a bad credential is an error.
    pub async fn resolve_optional(
        &self,
        attributes: &RequestAttributes,
    ) -> Result<Option<Identity>, FailureReason> {
        if !attributes.has_credential() {
            return Ok(None);
        }

        match self.resolve(attributes).await {
            ResolutionOutcome::Authenticated(identity) => Ok(Some(identity)),
            ResolutionOutcome::Failed(reason) => Err(reason),
        }
    }
}
