use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::usecase::error::UsecaseError;
use crate::{usecase::jwt::TokenType, AppState};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, UsecaseError> {
    let Some(token) = bearer_token(request.headers()) else {
        tracing::warn!("missing or invalid authorization header");
        return Err(UsecaseError::Unauthorized(
            "Missing or invalid Authorization header".to_string(),
        ));
    };

    let claims = state.jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!(?e, "invalid token");
        UsecaseError::Unauthorized(format!("Invalid token: {}", e))
    })?;

    // Ensure it's an access token, not a refresh token
    if claims.token_type != TokenType::Access {
        tracing::warn!("attempted to use non-access token for authentication");
        return Err(UsecaseError::Unauthorized("Invalid token type".to_string()));
    }

    let user_id = Uuid::parse_str(&claims.sub).map_err(|e| {
        tracing::warn!(?e, "failed to parse user_id from token");
        UsecaseError::Unauthorized("Invalid user ID in token".to_string())
    })?;

    let authenticated_user = AuthenticatedUser {
        user_id,
        email: claims.email,
        role: claims.role,
    };

    tracing::debug!(?authenticated_user, "user authenticated successfully");
    request.extensions_mut().insert(authenticated_user);

    Ok(next.run(request).await)
}
