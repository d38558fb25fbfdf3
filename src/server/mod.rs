//! HTTP surface
//!
//! Routes:
//! - `POST /run-{python,javascript,java,c,cpp}` with `{code, input?}`
//! - `POST /run` with `{language, code, input?}`
//! - `GET /languages`, `GET /health`
//!
//! Run routes are rate limited per client IP. All routes share the body
//! cap and CORS policy.

pub mod handlers;
pub mod rate_limit;
pub mod response;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::languages::Language;

pub use rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub trust_forwarded_for: bool,
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Result<Router> {
    let mut runs = Router::new().route("/run", post(handlers::run_any));
    for language in Language::ALL {
        runs = runs.route(
            &format!("/run-{}", language),
            post(
                move |State(state): State<AppState>, body: Result<Json<handlers::CodeBody>, JsonRejection>| {
                    handlers::run_language(state, language, body)
                },
            ),
        );
    }
    let runs = runs.route_layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit::limit_requests,
    ));

    let origin: HeaderValue = config
        .cors_origin
        .parse()
        .with_context(|| format!("Invalid CORS_ORIGIN {:?}", config.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/languages", get(handlers::languages))
        .merge(runs)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(router)
}
