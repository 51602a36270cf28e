use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app::error::FeedError;
use crate::infra::store::StoreError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn from_store(err: StoreError) -> AppError {
    match err {
        StoreError::PermissionDenied(message) => AppError::forbidden(message),
        StoreError::NotFound(what) => AppError::not_found(format!("{} not found", what)),
        StoreError::InvalidPath(message) => AppError::bad_request(message),
        StoreError::Unavailable(message) => AppError::unavailable(message),
        StoreError::Serialization(_) | StoreError::Backend(_) => {
            AppError::internal("store request failed")
        }
    }
}

impl From<FeedError> for AppError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Unauthenticated => AppError::unauthorized(err.to_string()),
            FeedError::NotAuthor => AppError::forbidden(err.to_string()),
            FeedError::NotFound(_) => AppError::not_found(err.to_string()),
            FeedError::Invalid(_) => AppError::bad_request(err.to_string()),
            FeedError::Busy => AppError::conflict(err.to_string()),
            FeedError::WriteRejected(inner) | FeedError::Channel(inner) => {
                tracing::error!(error = %inner, "store rejected request");
                from_store(inner)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_errors_map_to_statuses() {
        assert_eq!(AppError::from(FeedError::Unauthenticated).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(FeedError::NotAuthor).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(FeedError::Busy).status(), StatusCode::CONFLICT);
        let denied = FeedError::WriteRejected(StoreError::PermissionDenied("x".into()));
        assert_eq!(AppError::from(denied).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(FeedError::Channel(StoreError::Unavailable("down".into()))).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
