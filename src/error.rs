use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Duration must be a positive multiple of 30 minutes")]
    InvalidDuration,

    #[error("Reservations cannot be made in the past")]
    PastReservation,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("This slot is already reserved by someone else")]
    SlotConflict,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Forbidden")]
    Forbidden,

    #[error("Unauthorized")]
    Unauthenticated,

    #[error("Internal error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable tag, so clients can branch without matching
    /// message text.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidDuration => "invalid_duration",
            AppError::PastReservation => "past_reservation",
            AppError::MalformedPayload(_) => "malformed_payload",
            AppError::SlotConflict => "slot_conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden => "forbidden",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Persistence(_) => "persistence",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidDuration
            | AppError::PastReservation
            | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::SlotConflict => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self:#}");
        } else {
            debug!("request rejected: {self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

// Responses are documented per-route; nothing to infer from the error type.
impl aide::OperationOutput for AppError {
    type Inner = ();
}
