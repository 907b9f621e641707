use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::{JwtManager, Role};
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub subject: String,
    pub role: Role,
}

/// Verifies the bearer token and stores the caller in request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    // Check if auth is disabled (development mode)
    if state.config.is_auth_disabled() {
        tracing::debug!("Auth disabled - treating caller as admin");
        request.extensions_mut().insert(AuthUser {
            subject: "dev".to_string(),
            role: Role::Admin,
        });
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    let jwt_manager = JwtManager::new(&state.config.jwt_secret, state.config.jwt_expiry_seconds);
    let claims = jwt_manager
        .verify_token(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser {
        subject: claims.sub,
        role: claims.role,
    });

    Ok(next.run(request).await)
}

/// Runs after `auth_middleware`; lets only admins through.
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.role == Role::Admin => Ok(next.run(request).await),
        Some(user) => {
            tracing::warn!("Admin route refused for {} ({})", user.subject, user.role);
            Err(StatusCode::FORBIDDEN)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
