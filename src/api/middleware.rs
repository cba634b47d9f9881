//! Authentication layers.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::{ApiError, SharedState};
use crate::auth::{FailureReason, Identity, RequestAttributes, ResolutionOutcome};

/// Identity of an optionally-authenticated caller.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub Option<Identity>);

fn attributes(request: &Request) -> RequestAttributes {
    RequestAttributes::from_parts(request.headers(), request.uri().query())
}

fn failure(reason: FailureReason, path: &str) -> ApiError {
    match reason {
        FailureReason::InternalError => ApiError::AuthenticationInternal,
        reason => {
            warn!("Authentication failed for {}: {}", path, reason);
            ApiError::Unauthorized
        }
    }
}

/// Reject the request unless a credential resolves to an active identity.
/// On success the [`Identity`] is added to the request extensions.
pub async fn require_identity(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let attributes = attributes(&request);

    match state.resolver.resolve(&attributes).await {
        ResolutionOutcome::Authenticated(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        ResolutionOutcome::Failed(reason) => Err(failure(reason, request.uri().path())),
    }
}

/// Resolve the caller if they presented a credential; anonymous callers
/// pass through with `CallerIdentity(None)`.
pub async fn optional_identity(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let attributes = attributes(&request);

    let caller = state
        .resolver
        .resolve_optional(&attributes)
        .await
        .map_err(|reason| failure(reason, request.uri().path()))?;

    request.extensions_mut().insert(CallerIdentity(caller));
    Ok(next.run(request).await)
}
