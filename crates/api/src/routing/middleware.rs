//! HTTP adapter for host-based routing
//!
//! Executes a [`RoutingDecision`] at the web boundary: issues the redirect, or
//! passes the request on with the decision attached as a request extension.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};

use super::{HostResolver, RedirectKind, RequestTarget, RoutingDecision};

/// Path prefixes served by the platform regardless of the host
const EXCLUDED_PREFIXES: &[&str] = &["/static/", "/media/", "/admin/"];

/// Whether host routing is skipped for this path
pub fn is_excluded_path(path: &str) -> bool {
    path == "/health"
        || path.starts_with("/health/")
        || EXCLUDED_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Middleware resolving the Host header to a tenant
pub async fn host_routing_middleware(
    State(resolver): State<HostResolver>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if is_excluded_path(request.uri().path()) {
        return next.run(request).await;
    }

    let host = request_host(&request);
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let is_tls = arrived_over_tls(&request);

    let decision = resolver.resolve(&RequestTarget {
        host: &host,
        path_and_query: &path_and_query,
        is_tls,
    });

    if let Some((location, kind)) = decision.action.redirect() {
        tracing::debug!(host = %host, location = %location, "Redirecting tenant request");
        return redirect(location, kind);
    }

    request.extensions_mut().insert(decision);
    next.run(request).await
}

fn request_host(request: &Request<Body>) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default()
}

fn arrived_over_tls(request: &Request<Body>) -> bool {
    if request.uri().scheme_str() == Some("https") {
        return true;
    }
    forwarded_proto(request.headers()).is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// First protocol in `X-Forwarded-Proto` (set by the TLS-terminating proxy)
fn forwarded_proto(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim())
}

fn redirect(location: &str, kind: RedirectKind) -> Response<Body> {
    let status = match kind {
        RedirectKind::Permanent => StatusCode::PERMANENT_REDIRECT,
        RedirectKind::Temporary => StatusCode::FOUND,
    };
    match HeaderValue::from_str(location) {
        Ok(value) => (status, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::warn!(location = %location, "Redirect target is not a valid header value");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// Decision attached by [`host_routing_middleware`], if routing ran for this request
pub fn routing_decision<B>(request: &Request<B>) -> Option<&RoutingDecision> {
    request.extensions().get::<RoutingDecision>()
}
