//! Maps ingress failures to HTTP responses.

use crate::config::ConfigError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use deployq::{DqError, FieldViolation, ValidationError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid API Key")]
    InvalidApiKey,
    #[error("Invalid deploy request")]
    Validation(#[from] ValidationError),
    #[error("Too many requests from this IP, please try again later.")]
    RateLimited { retry_after_secs: u64 },
    #[error("Not Found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] DqError),
}

/// Error body: always a message, plus the field list for validation failures.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldViolation>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidApiKey => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Store(DqError::GroupFull { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(err) => {
                tracing::error!("queue store ERROR: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            ApiError::Store(DqError::GroupFull { .. }) => self.to_string(),
            ApiError::Store(_) => "Failed to add deployment".to_string(),
            other => other.to_string(),
        };
        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let errors = match self {
            ApiError::Validation(err) => err.violations,
            _ => Vec::new(),
        };

        let mut response = (status, Json(ApiErrorResponse { message, errors })).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Startup and serve failures of the binary.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Config: {0}")]
    Config(#[from] ConfigError),
    #[error("Store: {0}")]
    Store(#[from] DqError),
    #[error("Serve: {0}")]
    Io(#[from] std::io::Error),
}
