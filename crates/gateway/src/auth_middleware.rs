use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, server::AppState, state::GatewayState};

/// Header carrying the admin password.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Check a presented admin token: missing is 401, wrong is 403.
pub fn check_admin_token(state: &GatewayState, token: Option<&str>) -> Result<(), ApiError> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Err(ApiError::unauthorized("Missing authentication token"));
    };
    match &state.admin_password {
        Some(password) if password.verify(token) => Ok(()),
        _ => Err(ApiError::forbidden("Invalid admin password")),
    }
}

pub fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
}

/// Middleware that protects the admin routes.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match check_admin_token(&state.gateway, header_token(request.headers())) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
