//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cb_common::CityBusError;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// Standard API error body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: ErrorBody {
                error: "validation_error".to_string(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: "not_found".to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<CityBusError> for ApiError {
    fn from(err: CityBusError) -> Self {
        match err {
            CityBusError::Validation { message } => ApiError::unprocessable(message),
            err @ CityBusError::NotFound { .. } => ApiError::not_found(err.to_string()),
            other => {
                error!(error = %other, "internal error serving API request");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: ErrorBody {
                        error: "internal_error".to_string(),
                        message: "internal server error".to_string(),
                    },
                }
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
