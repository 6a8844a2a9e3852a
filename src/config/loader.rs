//! Configuration file loader.

use super::error::{ConfigError, ConfigResult};
use super::types::GatewayConfig;
use std::path::Path;

/// Configuration loader with validation.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be read, the
    /// TOML is malformed or validation fails.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<GatewayConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.load_str(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn load_str(&self, content: &str) -> ConfigResult<GatewayConfig> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    /// Load configuration or return defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<GatewayConfig> {
        let path = path.as_ref();
        if path.exists() {
            self.load(path)
        } else {
            Ok(GatewayConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_from_string() {
        let loader = ConfigLoader::new();
        let config = loader
            .load_str(
                r#"
            [gateway]
            name = "edge-1"
            port = 8888

            [admin]
            port = 9999

            [proxy]
            default_upstream = "http://127.0.0.1:3000"
            "#,
            )
            .unwrap();

        assert_eq!(config.gateway.name, "edge-1");
        assert_eq!(config.gateway.port, 8888);
        assert_eq!(config.admin.port, 9999);
        assert_eq!(
            config.proxy.default_upstream.as_deref(),
            Some("http://127.0.0.1:3000")
        );
    }

    #[test]
    fn invalid_config_fails_validation() {
        let loader = ConfigLoader::new();
        let result = loader.load_str(
            r#"
            [admin]
            bind_address = "0.0.0.0"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn load_from_file_and_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tollgate.toml");
        std::fs::write(&path, "[gateway]\nport = 8081\n").unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load(&path).unwrap();
        assert_eq!(config.gateway.port, 8081);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(loader.load(&missing), Err(ConfigError::NotFound(_))));
        assert_eq!(loader.load_or_default(&missing).unwrap().gateway.port, 8080);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let loader = ConfigLoader::new();
        assert!(matches!(
            loader.load_str("[gateway"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
