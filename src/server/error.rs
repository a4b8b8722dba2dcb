use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::engine::SearchError;
use crate::store::IndexError;

pub type Result<T> = std::result::Result<T, AppError>;

/// 请求参数错误
#[derive(Error, Debug)]
#[error("{0}")]
pub struct BadRequest(pub String);

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.is::<BadRequest>() {
            return StatusCode::BAD_REQUEST;
        }
        if let Some(e) = self.0.downcast_ref::<SearchError>() {
            return match e {
                SearchError::Embed(_) | SearchError::DimensionMismatch { .. } => {
                    StatusCode::BAD_REQUEST
                }
                SearchError::EmptyIndex => StatusCode::SERVICE_UNAVAILABLE,
            };
        }
        match self.0.downcast_ref::<IndexError>() {
            Some(IndexError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(IndexError::Corrupt { .. } | IndexError::DimensionMismatch { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), format!("Something went wrong: {}", self.0)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
