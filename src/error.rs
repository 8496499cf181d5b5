use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::ErrorBody;

/// SettingsError
///
/// A failed feature-flag lookup. The access engine recovers from every variant by
/// treating the affected flags as disabled.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("settings row missing in {0}")]
    NotConfigured(&'static str),

    #[error("settings backend unavailable: {0}")]
    Unavailable(String),
}

/// SessionError
///
/// Reasons a request ends up without a usable session. None of them reach the client:
/// the session provider downgrades the request to anonymous.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no session token")]
    Missing,

    #[error("invalid session token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// ApiError
///
/// Errors surfaced by the JSON endpoints under `/api`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing x-forwarded-uri header or uri query parameter")]
    MissingForwardedUri,

    #[error("invalid forwarded uri: {0}")]
    InvalidForwardedUri(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingForwardedUri | ApiError::InvalidForwardedUri(_) => {
                StatusCode::BAD_REQUEST
            }
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
