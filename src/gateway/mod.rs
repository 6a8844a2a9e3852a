//! # Public Data Plane
//!
//! The ingress filter chain, in fixed order:
//!
//! 1. **Port guard** — the admin base path does not exist on this port
//! 2. **Token endpoints** — `/api/tokens/form` and `/api/tokens/challenge`
//! 3. **Rate limit** — counter accounting, optional queue delay
//! 4. **Anti-bot** — write-method validation
//! 5. **Proxy** — forward to the matched rule's target
//!
//! Each stage either terminates the request or passes it on; terminal
//! decisions are logged and counted for the analytics pipeline.

mod error;
mod proxy;
mod server;

pub use error::{GatewayError, GatewayResult};
pub use proxy::UpstreamProxy;
pub use server::{
    empty_body, full_body, handle_request, BoxedBody, GatewayServer, GatewayState,
    ADMIN_BASE_PATH, DELAY_HEADER, DUPLICATE_HEADER, QUEUED_HEADER, REJECTION_REASON_HEADER,
};
