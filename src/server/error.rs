//! Tagged HTTP error type. Every variant has a stable `detail` code.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;
use crate::engine::EngineError;

#[derive(Debug)]
pub enum ApiError {
    AuthRejected(AuthError),
    InvalidRequest(String),
    EngineFailed(String),
    ProtocolBroken(String),
    NotReady(String),
    Busy(String),
    Timeout(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthRejected(e) if e.is_forbidden() => StatusCode::FORBIDDEN,
            Self::AuthRejected(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) | Self::EngineFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ProtocolBroken(_) => StatusCode::BAD_GATEWAY,
            Self::NotReady(_) | Self::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> &'static str {
        match self {
            Self::AuthRejected(e) => e.detail(),
            Self::InvalidRequest(_) => "invalid_parameters",
            Self::EngineFailed(_) => "engine_error",
            Self::ProtocolBroken(_) => "engine_protocol_error",
            Self::NotReady(_) => "engine_not_ready",
            Self::Busy(_) => "engine_busy",
            Self::Timeout(_) => "engine_timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> Option<&str> {
        match self {
            Self::AuthRejected(_) => None,
            Self::InvalidRequest(m)
            | Self::EngineFailed(m)
            | Self::ProtocolBroken(m)
            | Self::NotReady(m)
            | Self::Busy(m)
            | Self::Timeout(m)
            | Self::Internal(m) => Some(m),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::AuthRejected(e)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::Engine(m) => Self::EngineFailed(m),
            EngineError::InvalidParams(_) | EngineError::RequestTooLarge { .. } => {
                Self::InvalidRequest(message)
            }
            EngineError::Protocol(_) => Self::ProtocolBroken(message),
            EngineError::NotReady(_) | EngineError::Crashed | EngineError::WorkerGone => {
                Self::NotReady(message)
            }
            EngineError::QueueFull(_) => Self::Busy(message),
            EngineError::Timeout(_) => Self::Timeout(message),
            EngineError::Startup(_) | EngineError::Io(_) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            detail: self.detail(),
            message: self.message(),
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
