//! API error types with HTTP response mapping.
//!
//! Every error body has the shape `{"error": {"code": ..., "message": ...}}`.
//! Codes are stable; messages for server-side failures are generic so that
//! internal details stay in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::{FulfillmentError, GenerationError};
use order_store::OrderStoreError;
use serde::Serialize;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or mismatched credentials.
    Unauthorized(&'static str),
    /// Webhook signature could not be verified.
    InvalidSignature(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Resource not found.
    NotFound(&'static str, String),
    /// Signed link is invalid or expired.
    Forbidden,
    /// Fulfillment pipeline error.
    Fulfillment(FulfillmentError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(code) => {
                (StatusCode::UNAUTHORIZED, code, "Missing or invalid credentials".to_string())
            }
            ApiError::InvalidSignature(msg) => (StatusCode::BAD_REQUEST, "invalid_signature", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(code, msg) => (StatusCode::NOT_FOUND, code, msg),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "invalid_link",
                "Link is invalid or has expired".to_string(),
            ),
            ApiError::Fulfillment(err) => fulfillment_error_parts(err),
        }
    }
}

fn fulfillment_error_parts(err: FulfillmentError) -> (StatusCode, &'static str, String) {
    match &err {
        FulfillmentError::Authenticity(_) => (
            StatusCode::UNAUTHORIZED,
            "invalid_upload_token",
            "Upload token is invalid or has expired".to_string(),
        ),
        FulfillmentError::Malformed(_) => (StatusCode::BAD_REQUEST, "malformed_request", err.to_string()),
        FulfillmentError::UnresolvedOrder(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "unresolved_order", err.to_string())
        }
        FulfillmentError::OrderNotFound(_) | FulfillmentError::Store(OrderStoreError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "order_not_found", err.to_string())
        }
        FulfillmentError::Store(store_err) if store_err.is_conflict() => {
            (StatusCode::CONFLICT, "order_exists", err.to_string())
        }
        FulfillmentError::ArtifactMissing(_) => {
            (StatusCode::NOT_FOUND, "artifact_missing", err.to_string())
        }
        FulfillmentError::ObjectNotFound(_) => (
            StatusCode::NOT_FOUND,
            "object_not_found",
            "Object not found".to_string(),
        ),
        FulfillmentError::NotReady { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "order_not_ready", err.to_string())
        }
        FulfillmentError::ClaimHeld(_) => (StatusCode::CONFLICT, "fulfillment_in_progress", err.to_string()),
        FulfillmentError::TooLarge { .. } => {
            (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", err.to_string())
        }
        FulfillmentError::UnsupportedMediaType(_) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            err.to_string(),
        ),
        FulfillmentError::Generation(generation) => generation_parts(generation),
        FulfillmentError::Dispatch(_) => {
            tracing::error!(error = %err, "notification dispatch failed");
            (
                StatusCode::BAD_GATEWAY,
                "dispatch_failed",
                "Notification could not be delivered".to_string(),
            )
        }
        FulfillmentError::Timeout { stage } => {
            tracing::error!(stage, "operation timed out");
            (StatusCode::BAD_GATEWAY, "timeout", format!("{stage} timed out"))
        }
        FulfillmentError::Store(_) | FulfillmentError::Storage(_) => {
            tracing::error!(error = %err, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal error; retry later".to_string(),
            )
        }
    }
}

fn generation_parts(err: &GenerationError) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, kind = err.kind(), "artifact generation failed");
    if err.is_transient() {
        (
            StatusCode::BAD_GATEWAY,
            "generation_failed",
            format!("Artifact generation failed ({}); retry later", err.kind()),
        )
    } else {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            "generation_failed",
            format!("Artifact generation failed ({})", err.kind()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<OrderStoreError> for ApiError {
    fn from(err: OrderStoreError) -> Self {
        ApiError::Fulfillment(FulfillmentError::Store(err))
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use order_store::FulfillmentState;

    use super::*;

    fn status_and_code(err: ApiError) -> (StatusCode, &'static str) {
        let (status, code, _) = err.parts();
        (status, code)
    }

    #[test]
    fn test_fulfillment_error_mapping() {
        let id = OrderId::parse("o1").unwrap();
        let cases = [
            (FulfillmentError::OrderNotFound(id.clone()), StatusCode::NOT_FOUND, "order_not_found"),
            (FulfillmentError::ArtifactMissing(id.clone()), StatusCode::NOT_FOUND, "artifact_missing"),
            (FulfillmentError::ClaimHeld(id.clone()), StatusCode::CONFLICT, "fulfillment_in_progress"),
            (
                FulfillmentError::NotReady {
                    order_id: id.clone(),
                    state: FulfillmentState::AwaitingArtwork,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "order_not_ready",
            ),
            (
                FulfillmentError::TooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
            ),
            (
                FulfillmentError::UnsupportedMediaType("image/gif".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
            ),
            (FulfillmentError::Dispatch("down".into()), StatusCode::BAD_GATEWAY, "dispatch_failed"),
            (
                FulfillmentError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
            (
                FulfillmentError::Generation(GenerationError::Decode("bad".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
                "generation_failed",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(status_and_code(ApiError::from(err)), (status, code));
        }
    }

    #[test]
    fn test_store_conflict_maps_to_409() {
        let err = OrderStoreError::DuplicateOrder(OrderId::parse("o1").unwrap());
        assert_eq!(
            status_and_code(ApiError::from(err)),
            (StatusCode::CONFLICT, "order_exists")
        );
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let (_, _, message) = ApiError::from(FulfillmentError::Storage(
            "/var/lib/secret/path".into(),
        ))
        .parts();
        assert!(!message.contains("/var/lib"));
    }
}
