//! Credential strategies.
//!
//! A strategy pulls one credential out of the request attributes and tries
//! to turn it into an identity. "Not mine" and "did not match" are both
//! `Ok(None)`; only a directory fault is an error.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::debug;

use crate::auth::context::Identity;
use crate::auth::directory::{DirectoryFuture, UserDirectory};
use crate::auth::resolver::RequestAttributes;
use crate::auth::secret::hash_secret;
use crate::auth::token::TokenService;
use crate::types::LegacyDigest;

/// Where in the request a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialChannel {
    HeaderSecret,
    QueryToken,
    BearerToken,
    BasicAuthUsername,
    BasicAuthPassword,
    ForwardedHostEmbedded,
}

impl CredentialChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeaderSecret => "header-secret",
            Self::QueryToken => "query-token",
            Self::BearerToken => "bearer-token",
            Self::BasicAuthUsername => "basic-auth-username",
            Self::BasicAuthPassword => "basic-auth-password",
            Self::ForwardedHostEmbedded => "forwarded-host-embedded",
        }
    }
}

impl fmt::Display for CredentialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw credential and the channel it arrived on.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: String,
    pub channel: CredentialChannel,
}

// Secrets never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

impl Credential {
    /// Extract the credential carried on `channel`, if any.
    pub fn extract(channel: CredentialChannel, attributes: &RequestAttributes) -> Option<Self> {
        let secret = match channel {
            CredentialChannel::HeaderSecret => attributes.api_secret.clone(),
            CredentialChannel::QueryToken => attributes.token.clone(),
            CredentialChannel::BearerToken => attributes
                .authorization
                .as_deref()
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string()),
            CredentialChannel::BasicAuthUsername => {
                basic_credentials(attributes).map(|(user, _)| user)
            }
            CredentialChannel::BasicAuthPassword => {
                basic_credentials(attributes).and_then(|(_, pass)| pass)
            }
            CredentialChannel::ForwardedHostEmbedded => attributes
                .forwarded_host
                .as_deref()
                .and_then(embedded_secret),
        }?;

        if secret.is_empty() {
            return None;
        }

        Some(Self { secret, channel })
    }
}

/// Clients are inconsistent about padding Basic credentials.
const BASIC_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode `Authorization: Basic <base64(user[:pass])>`. Without a colon the
/// whole value is the username.
fn basic_credentials(attributes: &RequestAttributes) -> Option<(String, Option<String>)> {
    let encoded = attributes.authorization.as_deref()?.strip_prefix("Basic ")?;
    let decoded = BASIC_ENGINE.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    match decoded.split_once(':') {
        Some((user, pass)) => Some((user.to_string(), Some(pass.to_string()))),
        None => Some((decoded, None)),
    }
}

/// The `secret` of a `secret@host` forwarded host.
fn embedded_secret(host: &str) -> Option<String> {
    let mut parts = host.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(secret), Some(_host), None) => Some(secret.to_string()),
        _ => None,
    }
}

fn looks_like_sha1(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// One step of the resolution chain.
pub trait CredentialStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The channel this strategy reads.
    fn channel(&self) -> CredentialChannel;

    /// Try to resolve an identity from the request.
    fn try_resolve<'a>(
        &'a self,
        attributes: &'a RequestAttributes,
        directory: &'a dyn UserDirectory,
    ) -> DirectoryFuture<'a, Option<Identity>>;
}

/// Hash the credential with SHA-256 and look it up directly.
pub struct DirectSecretStrategy {
    channel: CredentialChannel,
}

impl DirectSecretStrategy {
    pub fn new(channel: CredentialChannel) -> Self {
        Self { channel }
    }
}

impl CredentialStrategy for DirectSecretStrategy {
    fn name(&self) -> &'static str {
        "direct-secret"
    }

    fn channel(&self) -> CredentialChannel {
        self.channel
    }

    fn try_resolve<'a>(
        &'a self,
        attributes: &'a RequestAttributes,
        directory: &'a dyn UserDirectory,
    ) -> DirectoryFuture<'a, Option<Identity>> {
        Box::pin(async move {
            let Some(credential) = Credential::extract(self.channel, attributes) else {
                return Ok(None);
            };

            let hash = hash_secret(&credential.secret);
            directory.find_by_secret_hash(&hash).await
        })
    }
}

/// Treat the credential as a SHA-1 digest of some identity's secret.
pub struct LegacyDigestStrategy {
    channel: CredentialChannel,
}

impl LegacyDigestStrategy {
    pub fn new(channel: CredentialChannel) -> Self {
        Self { channel }
    }
}

impl CredentialStrategy for LegacyDigestStrategy {
    fn name(&self) -> &'static str {
        "legacy-digest"
    }

    fn channel(&self) -> CredentialChannel {
        self.channel
    }

    fn try_resolve<'a>(
        &'a self,
        attributes: &'a RequestAttributes,
        directory: &'a dyn UserDirectory,
    ) -> DirectoryFuture<'a, Option<Identity>> {
        Box::pin(async move {
            let Some(credential) = Credential::extract(self.channel, attributes) else {
                return Ok(None);
            };

            // No SHA-1 hex digest can match anything else
            if !looks_like_sha1(&credential.secret) {
                return Ok(None);
            }

            let digest = LegacyDigest::new(credential.secret);
            directory.find_by_legacy_digest(&digest).await
        })
    }
}

/// Verify the credential as a signed token and load the identity it names.
pub struct SignedTokenStrategy {
    channel: CredentialChannel,
    tokens: Arc<TokenService>,
}

impl SignedTokenStrategy {
    pub fn new(channel: CredentialChannel, tokens: Arc<TokenService>) -> Self {
        Self { channel, tokens }
    }
}

impl CredentialStrategy for SignedTokenStrategy {
    fn name(&self) -> &'static str {
        "signed-token"
    }

    fn channel(&self) -> CredentialChannel {
        self.channel
    }

    fn try_resolve<'a>(
        &'a self,
        attributes: &'a RequestAttributes,
        directory: &'a dyn UserDirectory,
    ) -> DirectoryFuture<'a, Option<Identity>> {
        Box::pin(async move {
            let Some(credential) = Credential::extract(self.channel, attributes) else {
                return Ok(None);
            };

            let claims = match self.tokens.verify(&credential.secret) {
                Ok(claims) => claims,
                Err(e) => {
                    debug!("Token on {} rejected: {}", self.channel, e);
                    return Ok(None);
                }
            };

            directory.find_by_id(&claims.tenant_id()).await
        })
    }
}

/// The standard resolution order.
pub fn standard_chain(tokens: Arc<TokenService>) -> Vec<Box<dyn CredentialStrategy>> {
    use CredentialChannel::*;

    vec![
        Box::new(DirectSecretStrategy::new(HeaderSecret)),
        Box::new(LegacyDigestStrategy::new(HeaderSecret)),
        Box::new(SignedTokenStrategy::new(QueryToken, tokens.clone())),
        Box::new(DirectSecretStrategy::new(QueryToken)),
        Box::new(LegacyDigestStrategy::new(QueryToken)),
        Box::new(SignedTokenStrategy::new(BearerToken, tokens)),
        Box::new(DirectSecretStrategy::new(BasicAuthUsername)),
        Box::new(LegacyDigestStrategy::new(BasicAuthUsername)),
        Box::new(DirectSecretStrategy::new(BasicAuthPassword)),
        Box::new(LegacyDigestStrategy::new(BasicAuthPassword)),
        Box::new(DirectSecretStrategy::new(ForwardedHostEmbedded)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

    fn attrs() -> RequestAttributes {
        RequestAttributes::default()
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
    }

    #[test]
    fn test_extract_header_and_query() {
        let a = RequestAttributes {
            api_secret: Some("s1".to_string()),
            token: Some("t1".to_string()),
            ..attrs()
        };

        let header = Credential::extract(CredentialChannel::HeaderSecret, &a).unwrap();
        assert_eq!(header.secret, "s1");
        let query = Credential::extract(CredentialChannel::QueryToken, &a).unwrap();
        assert_eq!(query.secret, "t1");
        assert!(Credential::extract(CredentialChannel::BearerToken, &a).is_none());
    }

    #[test]
    fn test_extract_bearer() {
        let a = RequestAttributes {
            authorization: Some("Bearer abc.def.ghi".to_string()),
            ..attrs()
        };
        let credential = Credential::extract(CredentialChannel::BearerToken, &a).unwrap();
        assert_eq!(credential.secret, "abc.def.ghi");
        assert!(Credential::extract(CredentialChannel::BasicAuthUsername, &a).is_none());
    }

    #[test]
    fn test_extract_basic() {
        let a = RequestAttributes {
            authorization: Some(basic("alice", "pa:ss")),
            ..attrs()
        };
        assert_eq!(
            Credential::extract(CredentialChannel::BasicAuthUsername, &a)
                .unwrap()
                .secret,
            "alice"
        );
        assert_eq!(
            Credential::extract(CredentialChannel::BasicAuthPassword, &a)
                .unwrap()
                .secret,
            "pa:ss"
        );

        let empty_user = RequestAttributes {
            authorization: Some(basic("", "secret")),
            ..attrs()
        };
        assert!(Credential::extract(CredentialChannel::BasicAuthUsername, &empty_user).is_none());
        assert!(Credential::extract(CredentialChannel::BasicAuthPassword, &empty_user).is_some());

        let garbage = RequestAttributes {
            authorization: Some("Basic !!!not-base64".to_string()),
            ..attrs()
        };
        assert!(Credential::extract(CredentialChannel::BasicAuthUsername, &garbage).is_none());
    }

    #[test]
    fn test_extract_basic_without_colon() {
        let a = RequestAttributes {
            authorization: Some(format!("Basic {}", STANDARD.encode("mysecret"))),
            ..attrs()
        };
        assert_eq!(
            Credential::extract(CredentialChannel::BasicAuthUsername, &a)
                .unwrap()
                .secret,
            "mysecret"
        );
        assert!(Credential::extract(CredentialChannel::BasicAuthPassword, &a).is_none());
    }

    #[test]
    fn test_extract_basic_unpadded() {
        let encoded = STANDARD_NO_PAD.encode("secret:pass");
        assert_eq!(encoded, "c2VjcmV0OnBhc3M");

        let a = RequestAttributes {
            authorization: Some(format!("Basic {}", encoded)),
            ..attrs()
        };
        assert_eq!(
            Credential::extract(CredentialChannel::BasicAuthUsername, &a)
                .unwrap()
                .secret,
            "secret"
        );
        assert_eq!(
            Credential::extract(CredentialChannel::BasicAuthPassword, &a)
                .unwrap()
                .secret,
            "pass"
        );
    }

    #[test]
    fn test_extract_forwarded_host() {
        let a = RequestAttributes {
            forwarded_host: Some("mysecret@cgm.example.com".to_string()),
            ..attrs()
        };
        assert_eq!(
            Credential::extract(CredentialChannel::ForwardedHostEmbedded, &a)
                .unwrap()
                .secret,
            "mysecret"
        );

        for host in ["cgm.example.com", "a@b@c", "@cgm.example.com"] {
            let a = RequestAttributes {
                forwarded_host: Some(host.to_string()),
                ..attrs()
            };
            assert!(Credential::extract(CredentialChannel::ForwardedHostEmbedded, &a).is_none());
        }
    }

    #[test]
    fn test_credential_debug_redacts() {
        let credential = Credential {
            secret: "top-secret".to_string(),
            channel: CredentialChannel::HeaderSecret,
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("HeaderSecret"));
    }

    #[test]
    fn test_looks_like_sha1() {
        assert!(looks_like_sha1("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert!(looks_like_sha1("A9993E364706816ABA3E25717850C26C9CD0D89D"));
        assert!(!looks_like_sha1("abc"));
        assert!(!looks_like_sha1("z9993e364706816aba3e25717850c26c9cd0d89d"));
    }

    #[test]
    fn test_standard_chain_order() {
        let chain = standard_chain(Arc::new(TokenService::new("s", 60)));
        let steps: Vec<(&str, CredentialChannel)> =
            chain.iter().map(|s| (s.name(), s.channel())).collect();

        use CredentialChannel::*;
        assert_eq!(
            steps,
            vec![
                ("direct-secret", HeaderSecret),
                ("legacy-digest", HeaderSecret),
                ("signed-token", QueryToken),
                ("direct-secret", QueryToken),
                ("legacy-digest", QueryToken),
                ("signed-token", BearerToken),
                ("direct-secret", BasicAuthUsername),
                ("legacy-digest", BasicAuthUsername),
                ("direct-secret", BasicAuthPassword),
                ("legacy-digest", BasicAuthPassword),
                ("direct-secret", ForwardedHostEmbedded),
            ]
        );
    }
}
