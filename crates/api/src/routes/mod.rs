//! API routes

pub mod domains;
pub mod health;
pub mod public;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{routing::host_routing_middleware, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Tenant domain management - under /api/v1
    let api_routes = Router::new()
        .route(
            "/domains",
            get(domains::list_domains).post(domains::create_domain),
        )
        .route(
            "/domains/:id",
            get(domains::get_domain).delete(domains::delete_domain),
        )
        .route("/domains/:id/verify", post(domains::verify_domain))
        .route("/domains/:id/primary", post(domains::set_primary))
        .route("/domains/:id/resubmit", post(domains::resubmit_domain))
        // Certificate issuance callback, requires X-Internal-Token
        .route(
            "/internal/domains/:id/ssl-active",
            post(domains::mark_ssl_active),
        );

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_routes)
        .fallback(public::public_page)
        .layer(middleware::from_fn_with_state(
            state.resolver.clone(),
            host_routing_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
