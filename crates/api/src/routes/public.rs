//! Public booking pages reached through host routing

use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{
    error::ApiError,
    routing::{routing_decision, RoutingAction},
};

#[derive(Debug, Serialize)]
pub struct PublicPageResponse {
    pub tenant: Option<PublicTenant>,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PublicTenant {
    pub slug: String,
    pub business_name: String,
    pub hostname: String,
}

/// Fallback for everything the API router does not match.
///
/// Renders the tenant context the host resolver attached, or the platform
/// context when the request came in on a platform host.
pub async fn public_page(request: Request) -> Response {
    let path = request.uri().path().to_string();

    let Some(decision) = routing_decision(&request) else {
        return ApiError::NotFound.into_response();
    };
    if decision.action == RoutingAction::NoMatch {
        return ApiError::NotFound.into_response();
    }

    let tenant = decision.tenant.as_ref().map(|m| PublicTenant {
        slug: m.tenant.slug.clone(),
        business_name: m.tenant.business_name.clone(),
        hostname: m.hostname.clone(),
    });

    (StatusCode::OK, Json(PublicPageResponse { tenant, path })).into_response()
}
