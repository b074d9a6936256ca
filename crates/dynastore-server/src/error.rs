//! Mapping of core errors onto the wire-level error envelope:
//! `{"__type":"com.amazon.coral.service#<Kind>","message":"..."}` with
//! HTTP 400 for client errors and 500 for internal ones.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use dynastore_core::{CancellationReason, Error as CoreError};
use serde_json::json;

pub const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// A wire-ready error: kind string, human message, HTTP status, and the
/// per-item reasons carried by canceled transactions.
#[derive(Debug)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
    pub status: StatusCode,
    pub cancellation_reasons: Option<Vec<CancellationReason>>,
}

impl ApiError {
    pub fn new(kind: &str, message: impl Into<String>, status: StatusCode) -> Self {
        ApiError {
            kind: kind.to_string(),
            message: message.into(),
            status,
            cancellation_reasons: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new("ValidationException", message, StatusCode::BAD_REQUEST)
    }

    pub fn unsupported_operation(operation: &str) -> Self {
        ApiError::new(
            "UnsupportedOperationException",
            format!("Operation {operation} is not supported by the emulator."),
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn missing_target() -> Self {
        ApiError::new(
            "MissingTargetException",
            "X-Amz-Target header is missing",
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn method_not_allowed() -> Self {
        ApiError::new(
            "MethodNotAllowed",
            "Method not allowed",
            StatusCode::METHOD_NOT_ALLOWED,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(
            "InternalServerError",
            message,
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Validation(message) => ApiError::validation(message),
            CoreError::ResourceNotFound(message) => ApiError::new(
                "ResourceNotFoundException",
                message,
                StatusCode::BAD_REQUEST,
            ),
            CoreError::ResourceInUse(message) => {
                ApiError::new("ResourceInUseException", message, StatusCode::BAD_REQUEST)
            }
            CoreError::ConditionCheckFailed => ApiError::new(
                "ConditionCheckFailedException",
                "The conditional request failed.",
                StatusCode::BAD_REQUEST,
            ),
            CoreError::TransactionCanceled { reasons } => {
                let codes: Vec<&str> = reasons.iter().map(|r| r.code()).collect();
                let mut api = ApiError::new(
                    "TransactionCanceledException",
                    format!(
                        "Transaction cancelled, please refer cancellation reasons for specific reasons [{}]",
                        codes.join(", ")
                    ),
                    StatusCode::BAD_REQUEST,
                );
                api.cancellation_reasons = Some(reasons);
                api
            }
            CoreError::Storage(error) => ApiError::internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "__type": format!("com.amazon.coral.service#{}", self.kind),
            "message": self.message,
        });
        if let Some(reasons) = &self.cancellation_reasons {
            let reasons: Vec<serde_json::Value> = reasons
                .iter()
                .map(|reason| match reason {
                    CancellationReason::None => json!({"Code": "None"}),
                    CancellationReason::ConditionalCheckFailed => json!({
                        "Code": "ConditionalCheckFailed",
                        "Message": "The conditional request failed"
                    }),
                })
                .collect();
            body["CancellationReasons"] = serde_json::Value::Array(reasons);
        }
        (
            self.status,
            [(header::CONTENT_TYPE, AMZ_JSON_CONTENT_TYPE)],
            body.to_string(),
        )
            .into_response()
    }
}
