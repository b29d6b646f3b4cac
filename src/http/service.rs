//! Request handling for the rate-limited resource.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::FailurePolicy;
use crate::error::TollgateError;
use crate::ratelimit::{Decision, RateLimiterBackend};

/// Identity used when a request does not name one.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// State shared by all request handlers.
pub struct AppState<R: RateLimiterBackend> {
    /// The rate limiter instance
    pub limiter: Arc<R>,
    /// Upper bound on one decision
    pub timeout: Duration,
    /// Answer used when the limiter fails
    pub failure_policy: FailurePolicy,
}

impl<R: RateLimiterBackend> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            timeout: self.timeout,
            failure_policy: self.failure_policy,
        }
    }
}

/// Query parameters of the protected endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    user_id: Option<String>,
}

/// Build the router serving the rate-limited endpoint.
pub fn router<R: RateLimiterBackend + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/api/data", get(get_data::<R>))
        .with_state(state)
}

/// Serve the resource if the caller's bucket has a token.
#[instrument(skip_all, fields(identity))]
async fn get_data<R: RateLimiterBackend + 'static>(
    State(state): State<AppState<R>>,
    Query(query): Query<DataQuery>,
) -> Response {
    let identity = query
        .user_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());
    tracing::Span::current().record("identity", identity.as_str());

    let result = match tokio::time::timeout(state.timeout, state.limiter.check(&identity)).await {
        Ok(result) => result,
        Err(_) => Err(TollgateError::Timeout(state.timeout)),
    };

    match result {
        Ok(decision) => {
            info!(
                admitted = decision.admitted,
                remaining = decision.remaining,
                "Rate limit decision made"
            );
            decision_response(state.limiter.capacity(), decision)
        }
        Err(err) => failure_response(state.failure_policy, err),
    }
}

fn decision_response(capacity: u64, decision: Decision) -> Response {
    let headers = [
        (LIMIT_HEADER, capacity.to_string()),
        (REMAINING_HEADER, (decision.remaining.floor() as u64).to_string()),
    ];

    if decision.admitted {
        (StatusCode::OK, headers, success_body()).into_response()
    } else {
        (StatusCode::TOO_MANY_REQUESTS, headers, throttled_body()).into_response()
    }
}

fn failure_response(policy: FailurePolicy, err: TollgateError) -> Response {
    if !err.is_infrastructure() {
        error!(error = %err, "Rate limiter failed");
        return internal_error(&err);
    }

    match policy {
        FailurePolicy::Error => {
            error!(error = %err, "Rate limit store unavailable");
            internal_error(&err)
        }
        FailurePolicy::Open => {
            warn!(error = %err, "Rate limit store unavailable, failing open");
            (StatusCode::OK, success_body()).into_response()
        }
        FailurePolicy::Closed => {
            warn!(error = %err, "Rate limit store unavailable, failing closed");
            (StatusCode::TOO_MANY_REQUESTS, throttled_body()).into_response()
        }
    }
}

fn success_body() -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "data": "protected resource",
    }))
}

fn throttled_body() -> Json<serde_json::Value> {
    Json(json!({
        "error": "Too Many Requests, please try again later.",
    }))
}

fn internal_error(err: &TollgateError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("Internal Server Error: {}", err) })),
    )
        .into_response()
}
