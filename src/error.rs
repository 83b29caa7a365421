// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::fiat::EngineError;
use crate::storage::StorageError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::new(err.status_code(), err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::not_found(what),
            StorageError::Conflict(_) => {
                Self::conflict("Record was modified concurrently; retry the operation")
            }
            other => {
                tracing::error!(error = %other, "Storage operation failed");
                Self::internal("Storage operation failed")
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(what) => Self::not_found(what),
            EngineError::Conflict(_) => {
                Self::conflict("Request was modified concurrently; retry the operation")
            }
            EngineError::ReserveUnavailable => {
                Self::service_unavailable("Reserve wallet is not bootstrapped")
            }
            EngineError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.message, "bad");

        let unp = ApiError::unprocessable("oops");
        assert_eq!(unp.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unp.message, "oops");

        let fb = ApiError::forbidden("no");
        assert_eq!(fb.status, StatusCode::FORBIDDEN);

        let cf = ApiError::conflict("busy");
        assert_eq!(cf.status, StatusCode::CONFLICT);

        let su = ApiError::service_unavailable("later");
        assert_eq!(su.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }

    #[test]
    fn storage_conflict_maps_to_409() {
        let err: ApiError = StorageError::Conflict("fiat request".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn engine_errors_map_to_http_statuses() {
        let nf: ApiError = EngineError::NotFound("req-1".to_string()).into();
        assert_eq!(nf.status, StatusCode::NOT_FOUND);

        let conflict: ApiError = EngineError::Conflict("req-1".to_string()).into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let reserve: ApiError = EngineError::ReserveUnavailable.into();
        assert_eq!(reserve.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn auth_error_maps_to_its_status() {
        let err: ApiError = AuthError::InsufficientPermissions.into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}
