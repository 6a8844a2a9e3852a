//! # Admin Plane
//!
//! Loopback-bound management surface under
//! `/poormansRateLimit/api/admin`: rule CRUD, system configuration,
//! analytics queries and the live WebSocket push channel.

mod api;
mod server;
mod ws;

pub use api::{AdminApi, AdminError, AdminResult, BodyLimitPatch, QueuePatch};
pub use server::{AdminServer, AdminState};
pub use ws::accept_key;
