use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::routing::provider::ProviderError;

/// Errors raised by the dispatch core. The request layer turns them into
/// `(StatusCode, String)` responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Creation-time constraint violation; the message names the rule.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Wrong actor for the action. Checked before transition validity.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Right actor, wrong state.
    #[error("invalid transition: {message} (current state: {current})")]
    InvalidTransition { current: String, message: String },

    /// Lost a claim/accept race, or the donation moved on.
    #[error("donation is no longer available")]
    NotAvailable,

    #[error("coordinates not set")]
    CoordinatesNotSet,

    #[error("volunteer location not available")]
    LocationUnavailable,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(current: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            current: current.to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InvalidTransition { .. }
            | AppError::CoordinatesNotSet
            | AppError::LocationUnavailable => StatusCode::BAD_REQUEST,
            AppError::NotAvailable => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.into())
    }
}

impl AppError {
    /// Status and client-facing message. Server-side failures are logged here
    /// and their details withheld from the client.
    pub fn into_parts(self) -> (StatusCode, String) {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
            let message = match status {
                StatusCode::BAD_GATEWAY => "upstream service unavailable",
                _ => "internal error",
            };
            return (status, message.to_string());
        }
        (status, self.to_string())
    }
}

impl From<AppError> for (StatusCode, String) {
    fn from(e: AppError) -> Self {
        e.into_parts()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_parts().into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_and_transition_errors_are_distinguishable() {
        let auth = AppError::unauthorized("volunteer is not assigned to this donation");
        let bad = AppError::invalid("pending_pickup", "use the deliver action");
        assert_eq!(auth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
        assert!(bad.to_string().contains("pending_pickup"));
    }

    #[test]
    fn internal_details_stay_server_side() {
        let (status, body): (StatusCode, String) = AppError::Internal(anyhow::anyhow!("pool timed out")).into();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "internal error");
    }

    #[test]
    fn race_loss_maps_to_conflict() {
        assert_eq!(AppError::NotAvailable.status_code(), StatusCode::CONFLICT);
        assert!(AppError::NotAvailable.to_string().contains("no longer available"));
    }
}
