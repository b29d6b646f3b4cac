//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{router, AppState};
use crate::config::{FailurePolicy, ServerConfig};
use crate::error::Result;
use crate::ratelimit::RateLimiterBackend;

/// HTTP server fronting the rate limiter.
pub struct HttpServer<R: RateLimiterBackend + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// State handed to request handlers
    state: AppState<R>,
}

impl<R: RateLimiterBackend + 'static> HttpServer<R> {
    /// Create a new HTTP server with default timeout and failure policy.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<R>) -> Self {
        Self::from_config(&ServerConfig { http_addr: addr, ..ServerConfig::default() }, rate_limiter)
    }

    /// Create a new HTTP server from the server section of the configuration.
    pub fn from_config(config: &ServerConfig, rate_limiter: Arc<R>) -> Self {
        Self {
            addr: config.http_addr,
            state: AppState {
                limiter: rate_limiter,
                timeout: config.request_timeout(),
                failure_policy: config.failure_policy,
            },
        }
    }

    /// The configured listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Upper bound on one rate limit decision.
    pub fn timeout(&self) -> Duration {
        self.state.timeout
    }

    /// Answer given when the limiter fails.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.state.failure_policy
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %listener.local_addr()?,
            timeout_ms = self.state.timeout.as_millis() as u64,
            failure_policy = ?self.state.failure_policy,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            })
    }
}
