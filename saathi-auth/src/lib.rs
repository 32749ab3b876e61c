//! Token issuance and verification, plus the HTTP API for registration,
//! login, locations, SOS alerts and QR tags.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod otp;
pub mod response;
pub mod token;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use saathi_store::Store;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use config::ApiConfig;
pub use error::ApiError;
pub use token::{issue_token, verify_token, Claims, TokenError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: ApiConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Run a blocking store call off the async workers.
    pub async fn db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Store) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ApiError::Store(e.into()))?
            .map_err(ApiError::Store)
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::{auth, location, public, qr, sos};

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/health", get(public::health))
        .route("/member-details/:id", get(public::member_details))
        .route("/api/auth/register-user", post(auth::register_user))
        .route("/api/auth/register-member", post(auth::register_member))
        .route("/api/auth/login-user", post(auth::login_user))
        .route("/api/auth/login-member", post(auth::login_member))
        .route("/api/auth/verify-otp", post(auth::verify_otp))
        .route("/api/location/update", post(location::update))
        .route("/api/location/latest", get(location::latest))
        .route("/api/location/group", get(location::group))
        .route("/api/sos/send-alert", post(sos::send_alert))
        .route("/api/sos/get-alerts", post(sos::get_alerts))
        .route("/api/qr", get(qr::list))
        .route("/api/qr/generate", post(qr::generate))
        .route("/api/qr/bulk-generate", post(qr::bulk_generate))
        .route("/api/qr/bind", post(qr::bind))
        .route("/api/qr/scan/:qr_id", get(qr::scan))
        .route("/api/qr/search", get(qr::search))
        .route("/api/qr/unbind/:qr_id", delete(qr::unbind))
        .route("/api/qr/stats", get(qr::stats))
        .route("/api/qr/generate-sheet", post(qr::generate_sheet))
        .route("/api/qr/image/:qr_id", get(qr::image))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the API on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
