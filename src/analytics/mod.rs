//! # Analytics Pipeline
//!
//! Decision logging, minute-bucket aggregation and the live push channel.
//!
//! The hot path only touches [`DecisionCounters`] and the best-effort
//! [`TrafficLogWriter`]; everything heavier runs on the aggregator's tick
//! (~5 s) or the broadcaster's publish tick (~2 s).

mod aggregator;
mod broadcaster;
mod service;
mod traffic;

pub use aggregator::{DecisionCounters, StatsAggregator};
pub use broadcaster::{envelope, AnalyticsBroadcaster, PushMessage, Subscription};
pub use service::AnalyticsService;
pub use traffic::TrafficLogWriter;
