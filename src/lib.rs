//! topicboard
//!
//! Backend for live sessions: an admin opens a named session and creates
//! topics, attendees submit free-text inputs against those topics, and an
//! external summarizer pushes aggregated topic content back. Frontends poll
//! the session snapshot to render the current state.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP API with tracing, CORS, timeouts and rate limiting
//! - **Session Store**: per-session documents mutated under a writer lock,
//!   read through lock-free snapshots
//! - **Backends**: atomic JSON files on disk, or memory only
//!
//! # Modules
//!
//! - [`config`]: layered CLI / env / file configuration
//! - [`error`]: store error taxonomy and its HTTP mapping
//! - [`middleware`]: rate limiting and request timeouts
//! - [`server`]: router, handlers and startup
//! - [`session`]: session store, topic documents and the updates feed
//! - [`telemetry`]: tracing subscriber setup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod server;
pub mod session;
pub mod telemetry;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::middleware::SimpleRateLimiter;
use session::SessionStore;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session store for topic documents.
    pub sessions: SessionStore,
    /// Global Rate Limiter
    pub rate_limiter: Arc<SimpleRateLimiter>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Arc<AppConfig>, sessions: SessionStore) -> Self {
        let rate_limiter = Arc::new(SimpleRateLimiter::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));
        Self {
            sessions,
            rate_limiter,
            config,
        }
    }
}
