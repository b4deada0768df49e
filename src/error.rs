//! Caller-visible result codes.
//!
//! Per §7 of the spec these carry reason codes and counts only — never raw
//! rows, identifiers, file names, tokens, or narrations.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    EmptyBatch,
    NoValidRows,
    LowAcceptRatio,
    DeclaredRangeViolation,
    MissingRequiredColumn(String),
    BadRequest(String),
    AlreadyIngested,
    Internal,
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::EmptyBatch => "EMPTY_BATCH",
            IngestError::NoValidRows => "NO_VALID_ROWS",
            IngestError::LowAcceptRatio => "LOW_ACCEPT_RATIO",
            IngestError::DeclaredRangeViolation => "DECLARED_RANGE_VIOLATION",
            IngestError::MissingRequiredColumn(_) => "MISSING_REQUIRED_COLUMN",
            IngestError::BadRequest(_) => "BAD_REQUEST",
            IngestError::AlreadyIngested => "ALREADY_INGESTED",
            IngestError::Internal => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            IngestError::AlreadyIngested => StatusCode::CONFLICT,
            IngestError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for IngestError {}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    code: &'static str,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            status: "rejected",
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
