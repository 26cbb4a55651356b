use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Paths reachable without a key.
const PUBLIC_PATHS: [&str; 1] = ["/health"];

/// Rejects requests whose `X-API-Key` differs from the configured key.
///
/// Runs ahead of routing, so the body of a rejected request is never read.
pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if key == &*state.api_key => next.run(req).await,
        _ => {
            tracing::debug!(path = req.uri().path(), "rejected request with invalid api key");
            ApiError::InvalidApiKey.into_response()
        }
    }
}
