//! 统一的 API 错误类型与领域错误转换。

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::credentials::CredentialError;
use crate::files::FileError;
use crate::records::RecordError;
use crate::session::SessionError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    /// 记录内部错误详情，对调用方只返回概要信息。
    fn internal(context: &str, detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "{context}");
        ApiError::Internal(context.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                msg,
            )
                .into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::DuplicateUsername => ApiError::Conflict("username already exists".into()),
            CredentialError::InvalidUsername => ApiError::BadRequest("invalid username".into()),
            CredentialError::InvalidCredentials => ApiError::Unauthorized("invalid credentials".into()),
            CredentialError::UnknownUser => ApiError::internal("user record missing", error),
            CredentialError::Database(err) => ApiError::internal("storage failure", err),
            CredentialError::Io(err) => ApiError::internal("storage failure", err),
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(error: RecordError) -> Self {
        match error {
            RecordError::NotFound => ApiError::NotFound("file not found".into()),
            RecordError::Database(err) => ApiError::internal("storage failure", err),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::InvalidOrExpired => ApiError::Unauthorized(error.to_string()),
            SessionError::Signing(_) => ApiError::internal("session creation failed", error),
        }
    }
}

impl From<FileError> for ApiError {
    fn from(error: FileError) -> Self {
        match error {
            FileError::InvalidFilename => ApiError::BadRequest("invalid filename".into()),
            FileError::NotFound => ApiError::NotFound("file not found".into()),
            FileError::Stream(msg) => ApiError::BadRequest(format!("file upload error: {msg}")),
            FileError::Credentials(err) => err.into(),
            FileError::Records(err) => err.into(),
            FileError::Io(err) => ApiError::internal("save failed", err),
        }
    }
}
