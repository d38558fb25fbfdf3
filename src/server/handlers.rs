use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::response::RunResponse;
use super::AppState;
use crate::core::{ErrorKind, ExecError};
use crate::engine::ExecutionRequest;
use crate::languages::Language;

/// Body of `POST /run-<language>`
#[derive(Debug, Deserialize)]
pub struct CodeBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

/// Body of `POST /run`
#[derive(Debug, Deserialize)]
pub struct RunBody {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub name: &'static str,
    pub route: String,
    pub compiled: bool,
    pub run_timeout_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cleanup_failures: u64,
}

/// Malformed or oversized bodies keep the extractor's status code
fn rejection_response(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    debug!("Rejected request body: {}", rejection.body_text());
    (
        status,
        Json(RunResponse::error(
            ErrorKind::ValidationError,
            rejection.body_text(),
        )),
    )
        .into_response()
}

async fn execute(state: &AppState, request: ExecutionRequest) -> Response {
    match state.engine.execute(request).await {
        Ok(output) => RunResponse::ok(output).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /run-<language>`
pub async fn run_language(
    state: AppState,
    language: Language,
    body: Result<Json<CodeBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    let request = ExecutionRequest::new(language, body.code.unwrap_or_default())
        .with_stdin(body.input);
    execute(&state, request).await
}

/// `POST /run` with the language in the body
pub async fn run_any(
    State(state): State<AppState>,
    body: Result<Json<RunBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    let name = body.language.unwrap_or_default();
    let Some(language) = state.engine.registry().resolve(&name) else {
        return ExecError::Validation(format!("Unsupported language: {}", name)).into_response();
    };

    let request = ExecutionRequest::new(language, body.code.unwrap_or_default())
        .with_stdin(body.input);
    execute(&state, request).await
}

/// `GET /languages`
pub async fn languages(State(state): State<AppState>) -> Json<Vec<LanguageInfo>> {
    let infos = state
        .engine
        .registry()
        .profiles()
        .map(|profile| LanguageInfo {
            name: profile.language.as_str(),
            route: format!("/run-{}", profile.language),
            compiled: profile.is_compiled(),
            run_timeout_secs: profile.run_timeout.as_secs(),
        })
        .collect();
    Json(infos)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cleanup_failures: state.engine.workspaces().cleanup_failures(),
    })
}
