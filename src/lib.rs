//! Tollgate - Token Bucket Rate Limiting
//!
//! This crate admits or denies requests per client identity under a token
//! bucket budget. Bucket state lives in a shared store (Redis in production)
//! and every decision is a single atomic store operation, so any number of
//! processes can enforce the same budget concurrently.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
