//! HTTP listener that puts the rate limiter in front of a resource.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{router, AppState, ANONYMOUS_IDENTITY};
