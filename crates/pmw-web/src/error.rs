//! API error responses
//!
//! Maps every `pmw_core::Error` kind to a status code and a JSON body of the
//! form `{"error": <code>, "message": <text>}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pmw_core::{Error, LifecycleState};
use serde_json::{json, Value};
use tracing::error;

/// Error returned by handlers and the auth middleware
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::AuthUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidAction(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict { .. } | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::TransitionFailed { .. }
            | Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Yaml(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        match &self.0 {
            Error::Conflict { state, .. } | Error::InvalidTransition { state, .. } => {
                body["state"] = json!(state);
            }
            Error::TransitionFailed { reason, .. } => {
                body["state"] = json!(LifecycleState::Failed);
                body["detail"] = json!(reason);
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }

        let mut response = (status, Json(self.body())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
