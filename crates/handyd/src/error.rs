//! Command-path errors and their HTTP classification.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::link::LinkError;

/// Failures a dispatcher command can return.
///
/// Skipped moves are not errors; they come back as acknowledgements.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("session is not running")]
    Unavailable,
}

impl CommandError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CommandError::Link(_) => StatusCode::BAD_GATEWAY,
            CommandError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_failures_are_bad_gateway() {
        let err = CommandError::from(LinkError::Rejected("device busy".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "hub rejected command: device busy");
    }

    #[test]
    fn missing_actor_is_unavailable() {
        let response = CommandError::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
