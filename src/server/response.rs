//! JSON response bodies
//!
//! Success: `{"status":"ok","output":"..."}`
//! Failure: `{"status":"error","kind":"...","error":"...","output":"..."}`
//! (`output` repeats the message for clients that only read `output`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::core::{ErrorKind, ExecError};

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunResponse {
    Ok {
        output: String,
    },
    Error {
        kind: String,
        error: String,
        output: String,
    },
}

impl RunResponse {
    pub fn ok(output: String) -> Self {
        RunResponse::Ok { output }
    }

    pub fn error(kind: impl ToString, message: impl Into<String>) -> Self {
        let message = message.into();
        RunResponse::Error {
            kind: kind.to_string(),
            error: message.clone(),
            output: message,
        }
    }
}

impl IntoResponse for RunResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Compile and runtime failures are the program's fault, not the request's
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError | ErrorKind::UnsupportedHeader => StatusCode::BAD_REQUEST,
        ErrorKind::DependencyError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::CompileError | ErrorKind::RuntimeError => StatusCode::OK,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ExecError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::InternalError {
            error!("Request failed inside the service: {}", self);
        }
        (status_for(kind), Json(RunResponse::error(kind, self.to_string()))).into_response()
    }
}
