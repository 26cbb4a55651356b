//! Per-IP request limiter.
//!
//! Fixed windows: a caller's first request opens a window, at most
//! `max_requests` are accepted until it ends, and the next request after
//! that opens a fresh one.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct IpRateLimiter {
    /// IP → current window.
    windows: Mutex<HashMap<IpAddr, Window>>,
    window: Duration,
    max_requests: u32,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_requests: max_requests.max(1),
        }
    }

    /// Counts one request from `ip`. On rejection returns the time left in
    /// the caller's window.
    pub async fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let current = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(current.started) >= self.window {
            *current = Window {
                started: now,
                count: 0,
            };
        }

        if current.count < self.max_requests {
            current.count += 1;
            Ok(())
        } else {
            Err(self.window.saturating_sub(now.duration_since(current.started)))
        }
    }

    /// Forgets callers whose window has ended.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
        windows.shrink_to_fit();
        windows.len()
    }
}

pub async fn limit_by_ip(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);

    match state.limiter.check(ip).await {
        Ok(()) => next.run(req).await,
        Err(left) => {
            let retry_after_secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            tracing::warn!(%ip, retry_after_secs, "rate limit exceeded");
            ApiError::RateLimited {
                retry_after_secs: retry_after_secs.max(1),
            }
            .into_response()
        }
    }
}

/// Requests without peer info (in-process callers) share one bucket.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub fn spawn_pruner(
    limiter: Arc<IpRateLimiter>,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let keys = limiter.prune().await;
                    tracing::trace!(keys, "rate limiter pruned");
                }
            }
        }
    })
}
