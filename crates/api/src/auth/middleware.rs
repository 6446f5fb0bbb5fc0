//! Identity middleware for Axum

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    /// Receipt address for gateway checkouts
    pub email: Option<String>,
}

/// Caller on routes that also serve anonymous users
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer(pub Option<AuthUser>);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid authentication format")]
    InvalidAuthFormat,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let message = match self {
            AuthError::MissingAuth => "Authentication required",
            AuthError::InvalidAuthFormat => "Invalid authentication format",
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

fn extract_user(headers: &HeaderMap) -> Result<AuthUser, AuthError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .ok_or(AuthError::MissingAuth)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthFormat)?;
    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| AuthError::InvalidAuthFormat)?;

    let email = headers
        .get(USER_EMAIL_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(AuthUser { user_id, email })
}

/// Middleware that rejects requests without a caller identity
pub async fn require_auth(mut request: Request, next: Next) -> Response {
    match extract_user(request.headers()) {
        Ok(auth_user) => {
            tracing::debug!(
                path = %request.uri().path(),
                user_id = %auth_user.user_id,
                "require_auth: caller identified"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %request.uri().path(), error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that identifies the caller when possible and never rejects
pub async fn optional_auth(mut request: Request, next: Next) -> Response {
    let viewer = Viewer(extract_user(request.headers()).ok());
    request.extensions_mut().insert(viewer);
    next.run(request).await
}
