//! # Anti-Bot Validation
//!
//! Defenses the gateway applies to write requests:
//!
//! - **Honeypot header** that browser UIs leave empty and naive bots fill
//! - **Time-to-submit** floor against instant form submissions
//! - **One-time form tokens** against replays
//! - **Idempotency keys** against duplicate submissions
//!
//! Token issuance and the browser challenge pages live here too; the
//! public server exposes them under `/api/tokens`.

mod cache;
pub mod challenge;
mod validator;

pub use cache::TtlCache;
pub use challenge::ChallengeKind;
pub use validator::{
    AntiBotStats, AntiBotValidator, BotRejection, IssuedToken, FORM_LOAD_TIME_HEADER,
    FORM_TOKEN_HEADER, HONEYPOT_HEADER, IDEMPOTENCY_KEY_HEADER, TOKEN_CHALLENGE_COOKIE, TOKEN_TTL,
};
