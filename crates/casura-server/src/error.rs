// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP mapping of engine errors.
//!
//! Every rejected request gets a structured `{type, message}` JSON body;
//! the status code and exception type derive from the engine error code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use casura_core::error::EngineError;
use serde::Serialize;

/// The structured error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Exception type name, e.g. `InvalidRequestException`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Human-readable message with entity id and attempted operation.
    pub message: String,
}

/// Wrapper turning [`EngineError`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0 {
            EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "InvalidRequestException"),
            EngineError::Validation { .. } | EngineError::IllegalTransition { .. } => {
                (StatusCode::BAD_REQUEST, "InvalidRequestException")
            }
            EngineError::Authorization { .. } => {
                (StatusCode::FORBIDDEN, "AuthorizationException")
            }
            EngineError::Concurrency { .. } => {
                (StatusCode::CONFLICT, "ConcurrentModificationException")
            }
            EngineError::Database { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ServerException")
            }
            // `EngineError` is non_exhaustive; anything new is a server bug
            // until mapped explicitly.
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "ServerException"),
        };
        let body = ErrorBody {
            kind,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404_invalid_request() {
        let response =
            ApiError(EngineError::not_found("historic decision instance", "x")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_concurrency_maps_to_409() {
        let response = ApiError(EngineError::Concurrency {
            entity_id: "e".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_error_body_uses_type_field() {
        let body = ErrorBody {
            kind: "InvalidRequestException",
            message: "m".to_string(),
        };
        let encoded = serde_json::to_value(&body).unwrap();
        assert_eq!(encoded["type"], "InvalidRequestException");
        assert_eq!(encoded["message"], "m");
    }
}
