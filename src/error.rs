//! Error taxonomy for the gateway.
//!
//! Mirrors the kinds enumerated in the design: each variant carries enough
//! to render the JSON body and status code a caller sees, and maps onto
//! axum's `IntoResponse` so handlers can simply return `Result<_, GatewayError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Client exceeded its token-bucket budget.
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },

    /// Circuit breaker is OPEN; the upstream call was never attempted.
    #[error("circuit open")]
    CircuitOpen,

    /// Connect failure, DNS failure, TLS failure, read/write error, or timeout.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The shared state store could not be read or written.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A malformed inbound request (e.g. an unparsable URL).
    #[error("client error: {0}")]
    ClientError(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many requests, please try again later.")
            }
            GatewayError::CircuitOpen => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable due to circuit open.")
            }
            GatewayError::UpstreamUnreachable(_) => {
                (StatusCode::BAD_GATEWAY, "Upstream request failed.")
            }
            GatewayError::StoreUnavailable(_) => (StatusCode::BAD_GATEWAY, "Upstream request failed."),
            GatewayError::ClientError(_) => (StatusCode::BAD_REQUEST, "Invalid request."),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let GatewayError::RateLimited { retry_after_seconds } = self {
            response
                .headers_mut()
                .insert("Retry-After", retry_after_seconds.to_string().parse().unwrap());
        }

        response
    }
}
