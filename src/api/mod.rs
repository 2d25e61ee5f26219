use crate::core::error::ChatError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use log::error;
use serde_json::json;

pub mod guest;
pub mod manager;
pub mod realtime;
pub mod rooms;

const BEARER_PREFIX: &str = "Bearer ";

/// Raw bearer token from the `Authorization` header. Verification happens in the handler.
#[derive(Debug)]
pub struct ExtractToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
            let value = value
                .to_str()
                .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid authorization header"))?;
            let token = value
                .strip_prefix(BEARER_PREFIX)
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .ok_or((StatusCode::UNAUTHORIZED, "expected a bearer token"))?;
            Ok(ExtractToken(token.to_owned()))
        } else {
            Err((StatusCode::UNAUTHORIZED, "`Authorization` header is missing"))
        }
    }
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ChatError::InvalidState(_) => StatusCode::CONFLICT,
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Message safe to show a client; storage details stay in the log.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Storage(_) => "internal error".to_owned(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

pub fn router() -> Router {
    Router::new()
        .nest("/chat/rooms", rooms::router())
        .nest("/chat/manager", manager::router())
        .nest("/chat/guest", guest::router())
        .route("/ws", axum::routing::get(realtime::ws_handler))
}
