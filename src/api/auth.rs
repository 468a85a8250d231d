use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{Actor, ChangePasswordRequest, LoginRequest, LoginResponse, Role, UserResponse};
use crate::AppState;

use super::error::ApiError;

/// The signed-in user, placed in request extensions by [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserResponse);

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::User(self.0.id)
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator access required"))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Extract the token from request headers
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("Authorization").and_then(|h| h.to_str().ok())?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let response = state
        .store
        .login(&request.username, &request.password, request.device_info)
        .await?;
    Ok(Json(response))
}

/// Validate token endpoint; slides the session expiry
pub async fn validate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, ApiError> {
    let token = extract_token(&headers).ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    let user = state.store.authenticate(&token).await?;
    Ok(Json(user))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Ends the session; repeating it is harmless
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, ApiError> {
    let Some(token) = extract_token(&headers) else {
        return Ok(Json(LogoutResponse { logged_out: false }));
    };
    let actor = match state.store.session_user(&token).await? {
        Some(user) => Actor::User(user.id),
        None => Actor::System,
    };
    let logged_out = state.store.logout(&token, actor).await?;
    Ok(Json(LogoutResponse { logged_out }))
}

pub async fn me(user: CurrentUser) -> Json<UserResponse> {
    Json(user.0)
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .change_password(user.0.id, &request.current_password, &request.new_password)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Auth middleware that validates bearer tokens
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user = state.store.authenticate(&token).await?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
