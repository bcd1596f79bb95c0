//! Middleware Components
//!
//! CORS, request tracking and shared-secret checks for referee and admin routes.

use super::errors::ApiError;
use crate::app::App;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, ExposeHeaders};
use tracing::warn;
use uuid::Uuid;

/// Request ID header key
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared secret header for referee and admin callers
pub const API_KEY_HEADER: &str = "x-api-key";

/// Permissive CORS for browser-based duel clients
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(ExposeHeaders::list([HeaderName::from_static(REQUEST_ID_HEADER)]))
}

/// Middleware to add request ID to all requests
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Keep the caller's id if it sent one
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request ID wrapper for extracting in handlers
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn request_id_of(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

fn key_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    match expected {
        // No key configured: the route is open
        None => true,
        Some(expected) => headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|provided| provided == expected)
            .unwrap_or(false),
    }
}

async fn require_key(expected: Option<&str>, scope: &str, request: Request, next: Next) -> Response {
    if key_matches(request.headers(), expected) {
        return next.run(request).await;
    }
    let request_id = request_id_of(&request);
    warn!(%request_id, scope, path = %request.uri().path(), "Rejected request with bad API key");
    ApiError::unauthorized(&request_id, format!("A valid {} API key is required", scope))
        .into_response()
}

/// Guard for routes only referee bots may call
pub async fn referee_auth(State(app): State<Arc<App>>, request: Request, next: Next) -> Response {
    require_key(app.config.api.referee_api_key.as_deref(), "referee", request, next).await
}

/// Guard for `/api/admin/*`
pub async fn admin_auth(State(app): State<Arc<App>>, request: Request, next: Next) -> Response {
    require_key(app.config.api.admin_api_key.as_deref(), "admin", request, next).await
}
