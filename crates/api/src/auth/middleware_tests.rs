//! Unit tests for identity middleware
//!
//! Tests cover:
//! - Required identity (present, missing, malformed)
//! - Optional identity for anonymous routes

#[cfg(test)]
mod tests {
    use super::super::middleware::*;
    use axum::{
        body::Body,
        extract::Extension,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    fn protected() -> Router {
        Router::new()
            .route(
                "/me",
                get(|Extension(user): Extension<AuthUser>| async move { user.user_id.to_string() }),
            )
            .route_layer(middleware::from_fn(require_auth))
    }

    fn open() -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(viewer): Extension<Viewer>| async move {
                    viewer
                        .0
                        .map(|u| u.user_id.to_string())
                        .unwrap_or_else(|| "anonymous".to_string())
                }),
            )
            .route_layer(middleware::from_fn(optional_auth))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_require_auth_accepts_user_header() {
        let user_id = Uuid::new_v4();
        let response = protected()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(USER_ID_HEADER, user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, user_id.to_string());
    }

    #[tokio::test]
    async fn test_require_auth_rejects_missing_or_malformed() {
        for header in [None, Some("not-a-uuid")] {
            let mut builder = Request::builder().uri("/me");
            if let Some(value) = header {
                builder = builder.header(USER_ID_HEADER, value);
            }
            let response = protected()
                .oneshot(builder.body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_optional_auth_allows_anonymous() {
        let response = open()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");

        let user_id = Uuid::new_v4();
        let response = open()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(USER_ID_HEADER, user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_text(response).await, user_id.to_string());
    }
}
