use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    config::StreamforgeConfig,
    session::{SessionController, SessionError},
};

pub mod socket;
pub mod stream;
pub mod system;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub config: Arc<StreamforgeConfig>,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>, config: StreamforgeConfig) -> Self {
        Self {
            controller,
            config: Arc::new(config),
        }
    }
}

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<SessionError>() {
            Some(SessionError::InvalidConfig(reason)) => {
                log::debug!("rejected request: {}", reason);
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": reason })),
                )
                    .into_response()
            }
            Some(SessionError::LaunchFailure(e)) => {
                log::error!("ApiError: {:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "success": false,
                        "error": "failed to start stream",
                        "details": e.to_string(),
                    })),
                )
                    .into_response()
            }
            None => {
                log::error!("ApiError: {:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": self.0.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
