//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! a body size limit, and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use relay_core::config::RelayConfig;
use relay_core::error::RelayError;

use crate::handlers;
use crate::state::AppState;

/// Largest accepted request body. Messages are capped far below this.
const MAX_BODY_BYTES: usize = 64 * 1024;

fn cors_layer(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

/// Create the axum Router with all routes and middleware.
///
/// # Arguments
/// * `state` - The shared application state.
///
/// # Returns
/// A fully configured axum Router ready to serve requests.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.general.port);

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/users", post(handlers::create_user))
        .route("/users/{user_id}", delete(handlers::delete_user))
        .route(
            "/users/{user_id}/permissions",
            patch(handlers::update_permissions),
        )
        .route("/conversations", post(handlers::create_conversation))
        .route("/conversations/{user_id}", get(handlers::list_conversations))
        .route(
            "/conversations/{user_id}/{conversation_id}",
            get(handlers::get_conversation).delete(handlers::delete_conversation),
        )
        .route(
            "/messages",
            post(handlers::post_message).put(handlers::post_message),
        );

    let page_routes = Router::new().route(
        "/chat",
        get(handlers::chat_page).post(handlers::chat_submit),
    );

    api_routes
        .merge(page_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// Start the HTTP server on the configured address.
pub async fn start_server(config: &RelayConfig, state: AppState) -> Result<(), RelayError> {
    let addr = format!("{}:{}", config.general.bind_address, config.general.port);

    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router).await?;

    Ok(())
}
