//! JSON error responses for the HTTP handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use trace_core::{LedgerError, StoreError};
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    /// A route-level lookup that found nothing, such as a missing block.
    NotFound { kind: &'static str, id: String },
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    id: Option<String>,
}

impl ApiError {
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => match err {
                LedgerError::EntityNotFound { .. } | LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::UnknownTransactionType(_) | LedgerError::InvalidTransactionData { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                LedgerError::AppendFailed { .. }
                | LedgerError::ConcurrentAppendConflict { .. }
                | LedgerError::Store(StoreError::Immutable { .. })
                | LedgerError::Store(StoreError::DuplicateCode { .. }) => StatusCode::CONFLICT,
                LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Ledger(err) => ErrorBody {
                error: err.kind(),
                message: err.to_string(),
                id: err.offending_id(),
            },
            ApiError::NotFound { kind, id } => ErrorBody {
                error: kind,
                message: format!("{id} not found"),
                id: Some(id),
            },
            ApiError::Internal(message) => ErrorBody {
                error: "Internal",
                message,
                id: None,
            },
        };
        if status.is_server_error() {
            error!(kind = body.error, message = %body.message, "request failed");
        }
        (status, Json(body)).into_response()
    }
}
