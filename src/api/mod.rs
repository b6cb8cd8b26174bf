//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::ledger::Ledger;

pub use routes::create_router;

/// Build the application router
pub fn build_app(ledger: Arc<Ledger>) -> Router {
    // ServiceBuilder applies top-down: correlation -> logging -> handler
    let api_routes = create_router().layer(
        ServiceBuilder::new()
            .layer(axum_middleware::from_fn(middleware::correlation_middleware))
            .layer(axum_middleware::from_fn(middleware::logging_middleware)),
    );

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
