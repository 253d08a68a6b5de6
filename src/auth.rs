//! 注册、登录与 Bearer 认证中间件。

use axum::body::Body as AxumBody;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use axum::middleware;
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::TypedHeaderRejection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, hash_password};
use crate::error::ApiError;
use crate::session::SessionRegistry;

/// 认证通过后注入请求扩展的用户身份。
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("authorization required")]
    Missing,
    #[error("invalid authorization format")]
    Malformed,
    #[error("invalid or expired session")]
    Invalid,
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        ApiError::Unauthorized(failure.to_string())
    }
}

/// 认证中间件：校验 `Authorization: Bearer <token>` 并注入 [`AuthUser`]。
pub async fn require_bearer(
    Extension(sessions): Extension<Arc<SessionRegistry>>,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = auth_header.map_err(|rejection| {
        if rejection.is_missing() {
            AuthFailure::Missing
        } else {
            AuthFailure::Malformed
        }
    })?;
    let token = bearer.token();
    if token.is_empty() || token.starts_with(char::is_whitespace) {
        return Err(AuthFailure::Malformed.into());
    }

    let user_id = sessions
        .validate_token(token)
        .await
        .map_err(|err| {
            debug!(error = %err, path = req.uri().path(), "bearer token rejected");
            AuthFailure::Invalid
        })?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}

#[derive(Deserialize)]
pub(crate) struct CredentialsRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub(crate) struct LoginResponse {
    token: String,
}

/// 注册接口：创建用户与主目录。
pub async fn register(
    Extension(credentials): Extension<Arc<CredentialStore>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| ApiError::BadRequest(format!("invalid request body: {rejection}")))?;

    let user = credentials
        .create_user(&payload.username, &hash_password(&payload.password))
        .await?;
    info!(user_id = user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        JsonResponse(json!({ "status": "created" })),
    )
        .into_response())
}

/// 登录接口：校验凭据并签发令牌。
pub async fn login(
    Extension(credentials): Extension<Arc<CredentialStore>>,
    Extension(sessions): Extension<Arc<SessionRegistry>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<JsonResponse<LoginResponse>, ApiError> {
    let Json(payload) = payload.map_err(|_| ApiError::BadRequest("invalid request".into()))?;

    let user_id = credentials
        .verify_credentials(&payload.username, &hash_password(&payload.password))
        .inspect_err(|_| warn!(username = payload.username, "login failed"))?;

    let token = sessions.create_session(&user_id).await?;
    info!(user_id, "login succeeded");
    Ok(JsonResponse(LoginResponse { token }))
}
