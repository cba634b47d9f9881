// REST API exposing the Nightscout-compatible surface

mod entries;
mod error;
mod middleware;
mod status;
mod treatments;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{CredentialResolver, TokenService, UserStore};
use crate::db::{Db, RecordStore};

pub use entries::{ENTRY_TIMESTAMP_FIELD, EntryUpload};
pub use error::ApiError;
pub use middleware::CallerIdentity;
pub use treatments::{TREATMENT_TIMESTAMP_FIELD, TreatmentUpload};

/// Shared handler state.
pub struct AppState {
    pub resolver: Arc<CredentialResolver>,
    pub records: RecordStore,
    /// Shown as the custom title in `/status`
    pub app_name: String,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// State backed by a single database for both identities and records.
    pub fn new(db: Db, tokens: Arc<TokenService>, app_name: impl Into<String>) -> SharedState {
        let directory = Arc::new(UserStore::new(db.clone()));
        Arc::new(Self {
            resolver: Arc::new(CredentialResolver::new(directory, tokens)),
            records: RecordStore::new(db),
            app_name: app_name.into(),
        })
    }
}

/// Uploads accept a single object or an array of them.
pub(crate) fn into_batch(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        other => vec![other],
    }
}

pub fn create_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route(
            "/entries",
            get(entries::list_entries)
                .post(entries::create_entries)
                .delete(entries::delete_entries),
        )
        .route(
            "/entries.json",
            get(entries::list_entries)
                .post(entries::create_entries)
                .delete(entries::delete_entries),
        )
        .route("/entries/{selector}", get(entries::entries_by_selector))
        .route(
            "/treatments",
            get(treatments::list_treatments)
                .post(treatments::create_treatments)
                .delete(treatments::delete_treatments),
        )
        .route(
            "/treatments.json",
            get(treatments::list_treatments)
                .post(treatments::create_treatments)
                .delete(treatments::delete_treatments),
        )
        .route("/treatments/{id}", delete(treatments::delete_treatment))
        .route(
            "/devicestatus",
            get(status::device_status).post(status::device_status),
        )
        .route(
            "/devicestatus.json",
            get(status::device_status).post(status::device_status),
        )
        .route("/profile", get(status::get_profile))
        .route("/profile.json", get(status::get_profile))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_identity,
        ));

    let public = Router::new()
        .route("/status", get(status::get_status))
        .route("/status.json", get(status::get_status))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::optional_identity,
        ));

    Router::new()
        .route("/health", get(status::health_check))
        .nest("/api/v1", protected.merge(public))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ActiveIdentity, DirectoryError, DirectoryFuture, UserDirectory, legacy_digest};
    use crate::types::{SecretHash, TenantId};
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use serde_json::json;
    use tower::ServiceExt;

    const ALICE_SECRET: &str = "alice-secret-0001";
    const BOB_SECRET: &str = "bob-secret-0002";

    async fn setup_test_app() -> (Router, Arc<TokenService>) {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            namespace: "test".to_string(),
            database: "test".to_string(),
            username: None,
            password: None,
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();

        let users = UserStore::new(db.clone());
        users
            .create_identity(Some("alice@example.com"), Some(ALICE_SECRET))
            .await
            .unwrap();
        users
            .create_identity(Some("bob@example.com"), Some(BOB_SECRET))
            .await
            .unwrap();

        let tokens = Arc::new(TokenService::new("router-test-signing-key", 3600));
        let state = AppState::new(db, tokens.clone(), "Test Site");
        (create_router(state), tokens)
    }

    fn get_with_secret(uri: &str, secret: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("api-secret", secret)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_into_batch() {
        assert_eq!(into_batch(json!([1, 2])).len(), 2);
        assert_eq!(into_batch(json!({ "sgv": 1 })), vec![json!({ "sgv": 1 })]);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _) = setup_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_credential_is_unauthorized() {
        let (app, _) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/entries")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "Unauthorized",
                "message": "Valid API secret or token required"
            })
        );
    }

    #[tokio::test]
    async fn test_credential_channels() {
        let (app, tokens) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(get_with_secret("/api/v1/entries.json", ALICE_SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));

        let digest = legacy_digest(ALICE_SECRET);
        let response = app
            .clone()
            .oneshot(get_with_secret("/api/v1/entries", digest.as_str()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/profile?token={}", BOB_SECRET))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["units"], "mg/dl");

        let token = tokens
            .sign(&crate::auth::TokenClaims {
                user_id: "unknown-user".to_string(),
                email: None,
                iat: chrono::Utc::now().timestamp(),
                exp: chrono::Utc::now().timestamp() + 60,
            })
            .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/entries")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_bearer_is_unauthorized() {
        let (app, _) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/treatments")
                    .header(header::AUTHORIZATION, "Bearer not.a.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_authorization_is_optional() {
        let (app, _) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["authorized"], Value::Null);
        assert_eq!(body["settings"]["customTitle"], "Test Site");

        let response = app
            .clone()
            .oneshot(get_with_secret("/api/v1/status", ALICE_SECRET))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(
            body["authorized"],
            json!({ "read": true, "write": true, "admin": false })
        );

        let response = app
            .oneshot(get_with_secret("/api/v1/status", "wrong-secret"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_entries_are_tenant_scoped() {
        let (app, _) = setup_test_app().await;

        let upload = json!([
            { "type": "sgv", "sgv": 120, "direction": "Flat" },
            { "type": "sgv", "sgv": 5000 }
        ]);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/entries")
                    .header("api-secret", ALICE_SECRET)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(upload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rejected = body_json(response).await;
        assert_eq!(rejected.as_array().unwrap().len(), 1);
        assert_eq!(rejected[0]["entry"]["sgv"], 5000);

        let response = app
            .clone()
            .oneshot(get_with_secret(
                "/api/v1/entries?find%5Bsgv%5D%5B%24gte%5D=100",
                ALICE_SECRET,
            ))
            .await
            .unwrap();
        let entries = body_json(response).await;
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["sgv"], 120);
        assert!(entries[0].get("owner").is_none());

        let response = app
            .oneshot(get_with_secret("/api/v1/entries", BOB_SECRET))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!([]));
    }

    struct UnreachableDirectory;

    impl UserDirectory for UnreachableDirectory {
        fn find_by_secret_hash<'a>(
            &'a self,
            _hash: &'a SecretHash,
        ) -> DirectoryFuture<'a, Option<crate::auth::Identity>> {
            Box::pin(async { Err(DirectoryError::new("connection refused")) })
        }

        fn find_by_id<'a>(
            &'a self,
            _id: &'a TenantId,
        ) -> DirectoryFuture<'a, Option<crate::auth::Identity>> {
            Box::pin(async { Err(DirectoryError::new("connection refused")) })
        }

        fn list_active(&self) -> DirectoryFuture<'_, Vec<ActiveIdentity>> {
            Box::pin(async { Err(DirectoryError::new("connection refused")) })
        }
    }

    #[tokio::test]
    async fn test_directory_fault_is_internal_error() {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            namespace: "test".to_string(),
            database: "test".to_string(),
            username: None,
            password: None,
        };
        let db = create_connection(config).await.unwrap();
        let state = Arc::new(AppState {
            resolver: Arc::new(CredentialResolver::new(
                Arc::new(UnreachableDirectory),
                Arc::new(TokenService::new("router-test-signing-key", 3600)),
            )),
            records: RecordStore::new(db),
            app_name: "Test Site".to_string(),
        });
        let app = create_router(state);

        for uri in ["/api/v1/entries", "/api/v1/status"] {
            let response = app
                .clone()
                .oneshot(get_with_secret(uri, ALICE_SECRET))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(
                body_json(response).await,
                json!({
                    "error": "Internal Server Error",
                    "message": "Authentication failed"
                })
            );
        }
    }

    #[tokio::test]
    async fn test_delete_unknown_treatment_is_not_found() {
        let (app, _) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/treatments/7b1a9a2e-0000-4000-8000-000000000000")
                    .header("api-secret", ALICE_SECRET)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Treatment not found");
    }
}
