//! # Tollgate
//!
//! A rate-limiting reverse-proxy API gateway with an admin plane and live
//! analytics.
//!
//! ## Features
//!
//! - Centrally-configured rate limit rules (ant-style path globs, method
//!   and host predicates, priorities)
//! - Token-bucket rejection and leaky-bucket queued delays
//! - Identifier extraction from headers, cookies, body fields and JWT
//!   claims, falling back to the client IP
//! - Anti-bot validation of write requests (honeypot, submit timing,
//!   one-time tokens, idempotency keys)
//! - Decision logging, minute-bucket analytics and a WebSocket push
//!   channel for live dashboards
//!
//! ## Architecture
//!
//! Two HTTP servers share one state store: the public data plane runs the
//! ingress filter chain and proxies admitted traffic upstream, while the
//! loopback-bound admin plane manages rules and serves analytics. See
//! [`app::App`] for the assembly.

pub mod admin;
pub mod analytics;
pub mod antibot;
pub mod app;
pub mod config;
pub mod gateway;
pub mod limiter;
pub mod model;
pub mod settings;
pub mod store;
