//! # Rate Limiting
//!
//! The request-admission pipeline: rule selection, identifier resolution,
//! window-counter accounting against the shared store, and bounded queue
//! delays for rules that prefer shaping over rejection.
//!
//! ## Flow
//!
//! 1. [`RuleCache::select`] picks the active rules matching path, method
//!    and host, specific rules before the `/**` ceiling.
//! 2. [`identifier::resolve`] maps the request onto a counter key per rule
//!    (header > cookie > body field > JWT claims > IP).
//! 3. [`RateLimiterService::check`] walks the counters and aggregates:
//!    any block wins, otherwise the largest queue delay applies.

mod body;
mod error;
mod glob;
pub mod identifier;
mod jwt;
mod queue;
mod rules;
mod service;
mod xml;

pub use error::{LimiterError, LimiterResult};
pub use glob::AntGlob;
pub use identifier::RequestIdentity;
pub use queue::{QueueAccountant, QueueSlot};
pub use rules::{CompiledRule, RuleCache};
pub use service::{LimiterStats, RateLimitOutcome, RateLimiterService};
