//! Request-level resilience: global rate limiting and request timeouts.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::error_response;

/// Simple token bucket shared by every client.
///
/// Pollers hit the snapshot endpoint every few seconds, so the defaults are
/// generous and the limiter is off unless enabled in config.
#[derive(Debug)]
pub struct SimpleRateLimiter {
    // (last_update, tokens)
    state: Mutex<(Instant, f32)>,
    rate_per_sec: f32,
    burst_size: f32,
}

impl SimpleRateLimiter {
    pub fn new(rate_per_sec: f32, burst_size: f32) -> Self {
        Self {
            state: Mutex::new((Instant::now(), burst_size)),
            rate_per_sec,
            burst_size,
        }
    }

    pub fn check(&self) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (last_update, tokens) = *guard;
        let now = Instant::now();
        let elapsed = now.duration_since(last_update).as_secs_f32();

        let new_tokens = (tokens + elapsed * self.rate_per_sec).min(self.burst_size);

        if new_tokens >= 1.0 {
            *guard = (now, new_tokens - 1.0);
            true
        } else {
            *guard = (now, new_tokens);
            false
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if state.config.resilience.rate_limit_enabled && !state.rate_limiter.check() {
        tracing::debug!(name: "request.rate_limited", path = %req.uri().path(), "Rate limited");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Too many requests, slow down",
        );
    }
    next.run(req).await
}

/// Fail requests that run longer than `duration` with 408.
///
/// A timed-out store write keeps running to completion in the background;
/// only the response is abandoned.
pub async fn enforce_timeout(duration: Option<Duration>, req: Request, next: Next) -> Response {
    let Some(duration) = duration else {
        return next.run(req).await;
    };

    match tokio::time::timeout(duration, next.run(req)).await {
        Ok(res) => res,
        Err(_elapsed) => error_response(
            StatusCode::REQUEST_TIMEOUT,
            "timeout",
            format!("Request timed out after {}s", duration.as_secs()),
        ),
    }
}
