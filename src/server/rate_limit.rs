//! Per-client-IP rate limiting
//!
//! Fixed window: each IP may make `limit` requests, counted from its first
//! request in the window; the count resets once the window has elapsed.
//! Counters live in memory only and reset on restart.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::response::RunResponse;
use super::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, ip: IpAddr) -> RateDecision {
        self.check_at(ip, Instant::now())
    }

    /// Count one request from `ip` made at `now`
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = clients.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count < self.limit {
            entry.count += 1;
            RateDecision::Allowed {
                remaining: self.limit - entry.count,
            }
        } else {
            RateDecision::Limited {
                retry_after: self
                    .window
                    .saturating_sub(now.saturating_duration_since(entry.started)),
            }
        }
    }

    /// Drop clients whose window has elapsed; returns how many were removed
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - clients.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Sweep stale entries once per window in the background
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.window);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(
                        "Rate limiter swept {} idle clients, {} still tracked",
                        removed,
                        limiter.tracked_clients()
                    );
                }
            }
        })
    }
}

/// Client address: the socket peer, or the first X-Forwarded-For entry
/// when the service runs behind a trusted proxy
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware rejecting requests over the per-IP limit with 429
pub async fn limit_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, state.trust_forwarded_for);
    let limiter = &state.rate_limiter;

    match limiter.check(ip) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { retry_after } => {
            let retry_secs = retry_after.as_secs().max(1);
            warn!(client = %ip, retry_after_secs = retry_secs, "rate limit exceeded");

            let body = RunResponse::error(
                "rate_limited",
                format!(
                    "Too many requests: limit is {} per {}s, retry in {}s",
                    limiter.limit(),
                    limiter.window().as_secs(),
                    retry_secs
                ),
            );
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
            response
        }
    }
}
