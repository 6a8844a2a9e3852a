//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Root configuration structure for the gateway binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public data-plane listener.
    pub gateway: GatewaySection,

    /// Admin-plane listener.
    pub admin: AdminSection,

    /// Upstream proxying.
    pub proxy: ProxySection,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.gateway.port == self.admin.port
            && self.gateway.bind_address == self.admin.bind_address
        {
            return Err("gateway and admin listeners must not share an address".to_string());
        }

        if !self.admin.bind_address.is_loopback() {
            return Err(format!(
                "admin listener must bind a loopback address, got {}",
                self.admin.bind_address
            ));
        }

        if self.gateway.max_body_bytes == 0 {
            return Err("gateway.max_body_bytes must be positive".to_string());
        }

        if let Some(ref upstream) = self.proxy.default_upstream {
            if !upstream.starts_with("http://") && !upstream.starts_with("https://") {
                return Err(format!(
                    "proxy.default_upstream must be an http(s) URI, got '{upstream}'"
                ));
            }
        }

        Ok(())
    }
}

/// Public data-plane listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Gateway instance name, used in logs.
    pub name: String,

    /// Bind address for public traffic.
    pub bind_address: IpAddr,

    /// Public port.
    pub port: u16,

    /// Hard cap on buffered request bodies; larger writes get 413.
    pub max_body_bytes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            name: "tollgate".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl GatewaySection {
    /// Socket address to bind.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Admin-plane listener configuration. Loopback-only; the admin surface
/// carries no authentication of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    /// Bind address; must be loopback.
    pub bind_address: IpAddr,

    /// Admin port.
    pub port: u16,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9090,
        }
    }
}

impl AdminSection {
    /// Socket address to bind.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Upstream proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Where requests go when no matched rule names a target.
    pub default_upstream: Option<String>,

    /// Upstream response timeout in milliseconds.
    pub response_timeout_ms: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            default_upstream: None,
            response_timeout_ms: 30_000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: LogLevel,

    /// Log format (pretty or json).
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace,
    /// Debug level.
    Debug,
    /// Info level (default).
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level (least verbose).
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output (default).
    #[default]
    Pretty,
    /// Structured JSON lines.
    Json,
}
