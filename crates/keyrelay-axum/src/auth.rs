//! Bearer-token auth middleware for the admin API.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::error::HttpError;
use crate::state::AppState;

/// Wrap the API routes in a bearer check.
///
/// The full `Bearer <token>` string is precomputed so the per-request check
/// is a single comparison.
pub(crate) fn bearer_guard(router: Router<AppState>, token: &str) -> Router<AppState> {
    let expected: Arc<str> = Arc::from(format!("Bearer {token}"));
    router.route_layer(middleware::from_fn(move |req: Request, next: Next| {
        let expected = Arc::clone(&expected);
        async move { validate_bearer(expected, req, next).await }
    }))
}

async fn validate_bearer(expected: Arc<str>, req: Request, next: Next) -> Response {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match auth {
        Some(header) if header == expected.as_ref() => next.run(req).await,
        _ => {
            tracing::warn!(
                path = %req.uri().path(),
                "unauthorized admin request"
            );
            let mut response = HttpError::Unauthorized.into_response();
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
            response
        }
    }
}
