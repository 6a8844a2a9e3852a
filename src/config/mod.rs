//! # Bootstrap Configuration
//!
//! The TOML file the binary starts from: listener addresses, body limits,
//! upstream defaults and logging. Everything tunable at runtime lives in
//! the state store instead (see [`crate::settings`]).

mod error;
mod loader;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{
    AdminSection, GatewayConfig, GatewaySection, LogFormat, LogLevel, LoggingConfig, ProxySection,
};
