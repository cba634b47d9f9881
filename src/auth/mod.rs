//! Authentication.
//!
//! Every protected request is resolved to an [`Identity`] before any record
//! is touched. Clients present credentials on several channels:
//!
//! - **`api-secret` header**: raw secret, or the SHA-1 digest legacy uploaders send
//! - **`token` query parameter**: signed token, raw secret or legacy digest
//! - **`Authorization: Bearer`**: signed token
//! - **`Authorization: Basic`**: username and password each tried as a secret
//! - **`x-forwarded-host`**: `secret@host`, raw secret only
//!
//! [`CredentialResolver`] tries one [`CredentialStrategy`] per channel and
//! kind, in a fixed order, and the first match wins.

mod context;
mod directory;
mod resolver;
mod secret;
mod strategies;
mod token;

pub use context::Identity;
pub use directory::{ActiveIdentity, DirectoryError, DirectoryFuture, UserDirectory, UserStore};
pub use resolver::{
    API_SECRET_HEADER, CredentialResolver, FORWARDED_HOST_HEADER, FailureReason,
    RequestAttributes, ResolutionOutcome, TOKEN_QUERY_PARAM,
};
pub use secret::{generate_secret, hash_secret, legacy_digest};
pub use strategies::{
    Credential, CredentialChannel, CredentialStrategy, DirectSecretStrategy,
    LegacyDigestStrategy, SignedTokenStrategy, standard_chain,
};
pub use token::{TokenClaims, TokenError, TokenService};
