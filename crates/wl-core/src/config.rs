//! Configuration consumed by the session.
//!
//! Application metadata is fixed at construction. Transport options are
//! given per `connect`, with defaults under `[connect]` used by
//! `Session::connect_with_config`. Link options are given per `link`. All of it can be loaded
//! from TOML.
//!
//! # Example TOML
//!
//! ```toml
//! app_name = "Example dapp"
//! browser = "firefox"
//! origin = "example.org"
//!
//! [session]
//! max_channel_errors = 3
//!
//! [connect]
//! ssl = true
//! port = 60556
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wl_crypto::hash::sha256_hex;
use wl_proto::validation::{validate_chain, validate_requested_fields};
use wl_transport::ChannelOptions;

use crate::identity::Identity;

/// Default TLS port of the companion.
pub const DEFAULT_PORT: u16 = 60556;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Application metadata presented to the companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    /// Stable hash of the application, derived when empty
    #[serde(default)]
    pub app_hash: String,
    pub browser: String,
    pub origin: String,
    /// Previously exported identity to resume
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub session: SessionTuning,
    /// Defaults for `connect`
    #[serde(default)]
    pub connect: ConnectOptions,
}

/// Session policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTuning {
    /// Consecutive channel errors tolerated before a full reset
    #[serde(default = "default_max_channel_errors")]
    pub max_channel_errors: u32,
}

fn default_max_channel_errors() -> u32 {
    3
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            max_channel_errors: default_max_channel_errors(),
        }
    }
}

impl AppConfig {
    pub fn new(
        app_name: impl Into<String>,
        browser: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        let mut config = Self {
            app_name: app_name.into(),
            app_hash: String::new(),
            browser: browser.into(),
            origin: origin.into(),
            identity: None,
            session: SessionTuning::default(),
            connect: ConnectOptions::default(),
        };
        config.app_hash = config.derived_app_hash();
        config
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// sha256 over browser, origin and app name.
    pub fn derived_app_hash(&self) -> String {
        sha256_hex(format!("{} {} {}", self.browser, self.origin, self.app_name).as_bytes())
    }

    /// Parse and validate; fills in a missing app hash.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(raw)?;
        if config.app_hash.is_empty() {
            config.app_hash = config.derived_app_hash();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::ValidationError("app_name must not be empty".into()));
        }
        if self.origin.trim().is_empty() {
            return Err(ConfigError::ValidationError("origin must not be empty".into()));
        }
        if self.browser.trim().is_empty() {
            return Err(ConfigError::ValidationError("browser must not be empty".into()));
        }
        if self.session.max_channel_errors == 0 {
            return Err(ConfigError::ValidationError(
                "max_channel_errors must be at least 1".into(),
            ));
        }
        if self.connect.port == 0 {
            return Err(ConfigError::ValidationError("port must not be 0".into()));
        }
        Ok(())
    }
}

/// Per-connect options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Identity to resume, replacing the session's current one
    #[serde(default, skip_serializing)]
    pub identity: Option<Identity>,
    #[serde(default = "default_ssl")]
    pub ssl: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_ssl() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            identity: None,
            ssl: default_ssl(),
            port: default_port(),
            host: default_host(),
        }
    }
}

impl ConnectOptions {
    pub fn new(ssl: bool, port: u16) -> Self {
        Self {
            ssl,
            port,
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions::new(self.host.clone(), self.port, self.ssl)
    }
}

/// Per-link options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOptions {
    pub chain: String,
    /// Data fields the application asks the companion to grant
    #[serde(default)]
    pub request_details: Vec<String>,
}

impl LinkOptions {
    pub fn new(chain: impl Into<String>, request_details: &[&str]) -> Self {
        Self {
            chain: chain.into(),
            request_details: request_details.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chain(&self.chain).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        validate_requested_fields(&self.request_details)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_toml_gets_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            app_name = "demo"
            browser = "firefox"
            origin = "example.org"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.max_channel_errors, 3);
        assert_eq!(config.connect.port, DEFAULT_PORT);
        assert!(config.connect.ssl);
        assert_eq!(config.connect.host, "localhost");
        assert_eq!(config.app_hash, config.derived_app_hash());
        assert_eq!(config.app_hash.len(), 64);
    }

    #[test]
    fn test_explicit_values() {
        let config = AppConfig::from_toml_str(
            r#"
            app_name = "demo"
            app_hash = "fixed"
            browser = "chrome"
            origin = "localhost"

            [session]
            max_channel_errors = 5

            [connect]
            ssl = false
            port = 60555
            "#,
        )
        .unwrap();

        assert_eq!(config.app_hash, "fixed");
        assert_eq!(config.session.max_channel_errors, 5);
        assert_eq!(config.connect.channel_options().url(), "ws://localhost:60555");
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let err = AppConfig::from_toml_str(
            r#"
            app_name = ""
            browser = "firefox"
            origin = "example.org"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let mut config = AppConfig::new("demo", "firefox", "example.org");
        config.session.max_channel_errors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = AppConfig::from_toml_str("app_name = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "app_name = \"demo\"\nbrowser = \"firefox\"\norigin = \"example.org\"").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.app_name, "demo");

        let missing = AppConfig::load(Path::new("/nonexistent/wl-config.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_app_hash_depends_on_all_fields() {
        let a = AppConfig::new("demo", "firefox", "example.org");
        let b = AppConfig::new("demo", "chrome", "example.org");
        let c = AppConfig::new("other", "firefox", "example.org");
        assert_ne!(a.app_hash, b.app_hash);
        assert_ne!(a.app_hash, c.app_hash);
    }

    #[test]
    fn test_link_options_validation() {
        assert!(LinkOptions::new("BTS", &["account"]).validate().is_ok());
        assert!(LinkOptions::new("bts", &["account"]).validate().is_err());
        assert!(LinkOptions::new("BTS", &[]).validate().is_err());
    }
}
