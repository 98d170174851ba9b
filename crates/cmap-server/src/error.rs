use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use cmap_core::AgencyError;

/// An `AgencyError` on its way out of a handler.
pub struct ApiError(pub AgencyError);

impl From<AgencyError> for ApiError {
    fn from(e: AgencyError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AgencyError::AgentNotFound(_) => StatusCode::NOT_FOUND,
            AgencyError::DuplicateAgent(_) => StatusCode::CONFLICT,
            AgencyError::Protocol(_) => StatusCode::METHOD_NOT_ALLOWED,
            AgencyError::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::NOT_FOUND => "Resource not found".to_string(),
            StatusCode::METHOD_NOT_ALLOWED => "Method Not Allowed".to_string(),
            _ => self.0.to_string(),
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        (status, body).into_response()
    }
}
