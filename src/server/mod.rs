//! Thin HTTP adapter.
//!
//! Routing, query/body extraction, response headers and the client-facing
//! rate limiter live here; every decision about feeds is delegated to
//! [`FeedService`]. Nothing in this module is reachable from the library
//! pipeline — it only adapts it.

mod handlers;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::FeedError;
use crate::orchestrator::FeedService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FeedService>,
    limiter: Arc<RateLimiter>,
    production: bool,
}

/// Builds the router over a constructed service.
pub fn router(service: Arc<FeedService>) -> Router {
    let config = service.config();
    let state = AppState {
        limiter: Arc::new(RateLimiter::new(config.rate_window, config.rate_max)),
        production: config.production,
        service,
    };

    Router::new()
        .route("/feed", get(handlers::feed))
        .route("/feed.atom", get(handlers::feed_atom))
        .route("/preview", get(handlers::preview))
        .route("/metadata", get(handlers::metadata))
        .route("/validate", post(handlers::validate))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache", delete(handlers::cache_clear))
        .route("/health", get(handlers::health))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// Fixed-window per-client request limiter.
///
/// Deliberately simple: one window timestamp and counter per IP, reset
/// when the window rolls over. Entries for idle clients are dropped
/// during rollover checks.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    slots: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `false` when the client exceeded its window budget.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut slots = self.slots.lock().await;

        // Opportunistic cleanup keeps the map bounded by active clients
        if slots.len() > 10_000 {
            let window = self.window;
            slots.retain(|_, (start, _)| start.elapsed() < window);
        }

        let now = Instant::now();
        let slot = slots.entry(ip).or_insert((now, 0));
        if now.duration_since(slot.0) >= self.window {
            *slot = (now, 0);
        }
        slot.1 += 1;
        slot.1 <= self.max
    }
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    // ConnectInfo is absent when the router is driven without a TCP
    // listener (tests); those requests pass unlimited.
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    if let Some(ip) = ip {
        if !state.limiter.check(ip).await {
            let path = req.uri().path().to_owned();
            return handlers::error_response(&state, FeedError::RateLimited, &path);
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_allows_within_budget() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        assert!(limiter.check(ip).await);
        assert!(limiter.check(ip).await);
        assert!(limiter.check(ip).await);
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn test_rate_limiter_is_per_ip() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let a: IpAddr = "203.0.113.1".parse().unwrap();
        let b: IpAddr = "203.0.113.2".parse().unwrap();

        assert!(limiter.check(a).await);
        assert!(!limiter.check(a).await);
        assert!(limiter.check(b).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_window_rolls_over() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let ip: IpAddr = "203.0.113.3".parse().unwrap();

        assert!(limiter.check(ip).await);
        assert!(!limiter.check(ip).await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check(ip).await);
    }
}
