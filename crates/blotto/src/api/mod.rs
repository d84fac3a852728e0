pub mod routes;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde::Serialize;
use serde_json::json;

use crate::crypto;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Errors surfaced to API clients.
///
/// Regular endpoints answer with a JSON `{error}` body; LNURL endpoints
/// use the protocol's `{status: "ERROR", reason}` shape.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
    Lnurl(StatusCode, String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn lnurl_bad_request(err: impl std::fmt::Display) -> Self {
        ApiError::Lnurl(StatusCode::BAD_REQUEST, err.to_string())
    }

    pub fn lnurl_internal(err: impl std::fmt::Display) -> Self {
        ApiError::Lnurl(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::Internal(error) => {
                error!("request failed: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: String::from("internal server error"),
                    }),
                )
                    .into_response()
            }
            ApiError::Lnurl(status, reason) => {
                if status.is_server_error() {
                    error!("lnurl request failed: {}", reason);
                }
                (status, Json(json!({ "status": "ERROR", "reason": reason }))).into_response()
            }
        }
    }
}

/// The caller's ed25519 identity taken from `Authorization: Bearer <hex>`.
pub struct AuthPubkey(pub String);

impl<S> FromRequestParts<S> for AuthPubkey
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::bad_request("invalid authorization public key"))?;

        let public_key = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::bad_request("invalid authorization public key"))?;

        crypto::validate_public_key(public_key)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        Ok(AuthPubkey(public_key.to_string()))
    }
}

/// Reconstructs the request origin from the proxy-forwarded scheme and the
/// host header, so callbacks stay correct behind reverse proxies and onion
/// addresses.
pub fn request_origin(headers: &HeaderMap) -> Result<String, ApiError> {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing host header"))?;

    Ok(format!("{}://{}", scheme, host))
}
