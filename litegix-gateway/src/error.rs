//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use litegix_driver::DriverError;
use serde_json::json;

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error propagated from the driver.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The request body is malformed or contains invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The driver went away before answering.
    #[error("driver unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Driver(err) => match err {
                DriverError::NotFound(_) => StatusCode::NOT_FOUND,
                DriverError::TaskAlreadyExists(_)
                | DriverError::StateViolation(_)
                | DriverError::NoVm(_) => StatusCode::CONFLICT,
                DriverError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
                e if e.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use litegix_core::{CoreError, TaskId};
    use litegix_executor::ExecutorError;

    use super::*;

    #[test]
    fn driver_errors_map_to_status_codes() {
        let cases = [
            (DriverError::NotFound(TaskId::new("t1")), StatusCode::NOT_FOUND),
            (DriverError::TaskAlreadyExists(TaskId::new("t1")), StatusCode::CONFLICT),
            (DriverError::StateViolation("running".to_owned()), StatusCode::CONFLICT),
            (
                DriverError::Spec(CoreError::SpecDecode("bad".to_owned())),
                StatusCode::BAD_REQUEST,
            ),
            (
                DriverError::HandleState(CoreError::DriverState("no snapshot".to_owned())),
                StatusCode::BAD_REQUEST,
            ),
            (DriverError::NoVm(TaskId::new("t3")), StatusCode::CONFLICT),
            (DriverError::Unsupported("exec"), StatusCode::NOT_IMPLEMENTED),
            (
                DriverError::Executor(ExecutorError::SpawnFailed("vm died".to_owned())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let resp = GatewayError::from(err).into_response();
            assert_eq!(resp.status(), expected);
        }
    }

    #[test]
    fn invalid_request_is_bad_request() {
        let resp = GatewayError::InvalidRequest("missing field".to_owned()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn display_includes_driver_message() {
        let err = GatewayError::from(DriverError::NotFound(TaskId::new("web-7")));
        assert!(err.to_string().contains("web-7"));
    }
}
